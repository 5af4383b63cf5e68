/*
 * Copyright (C) 2015-2022 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 */
use serde::{Deserialize, Serialize};
use afbv4::prelude::*;

AfbDataConverter!(chmgr_msg, ChmgrMsg);
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
// allocation notifications pushed to subscribed clients
pub enum ChmgrMsg {
    Allocated(u16),
    Starved,
}

AfbDataConverter!(chmgr_status, ChmgrStatus);
// allocation view returned by the status verb
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChmgrStatus {
    pub peer: Option<String>,
    pub last_seen_sequence: Option<u8>,
    pub next_tx_sequence: u8,
    pub allocated_current: u16,
    pub starved: bool,
}

pub fn chmgr_registers() -> Result <(), AfbError> {
    // add binding custom converters
    chmgr_msg::register()?;
    chmgr_status::register()?;
    Ok(())
}
