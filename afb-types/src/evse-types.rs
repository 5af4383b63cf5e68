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

AfbDataConverter!(evse_state, EvseState);
// charging circuit snapshot as exposed by the evse device api
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct EvseState {
    pub iec61851_state: u8,
    pub vehicle_state: u8,
    pub error_state: u8,
    pub charge_release: u8,
    pub allowed_charging_current: u16,
    pub uptime: u32,
}

pub fn evse_registers() -> Result <(), AfbError> {
    // add binding custom converter
    evse_state::register()?;
    Ok(())
}
