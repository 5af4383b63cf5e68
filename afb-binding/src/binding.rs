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

use afbv4::prelude::*;
use privcomm::prelude::*;
use typesv4::prelude::*;

use crate::prelude::*;

pub(crate) fn to_static_str(value: String) -> &'static str {
    Box::leak(value.into_boxed_str())
}

pub struct ApiConfig {
    pub uid: &'static str,
    pub event: &'static str,
    pub evse_api: &'static str,
    pub privcomm: PrivCommConfig,
    pub chmgr: ChmgrConfig,
    pub send_period: u32,
    pub watchdog_period: u32,
}

// Binding init callback started at binding load time before any API exist
// -----------------------------------------
pub fn binding_init(rootv4: AfbApiV4, jconf: JsoncObj) -> Result<&'static AfbApi, AfbError> {
    afb_log_msg!(Info, rootv4, "config:{}", jconf);

    let uid = if let Ok(value) = jconf.get::<String>("uid") {
        to_static_str(value)
    } else {
        "privcomm"
    };

    let info = if let Ok(value) = jconf.get::<String>("info") {
        to_static_str(value)
    } else {
        ""
    };

    let uart = if let Ok(value) = jconf.get::<String>("uart") {
        to_static_str(value)
    } else {
        PRIVCOMM_DEFAULT_DEVICE
    };

    let rate = if let Ok(value) = jconf.get::<u32>("rate") {
        value
    } else {
        PRIVCOMM_DEFAULT_RATE
    };

    let udp_port = if let Ok(value) = jconf.get::<u32>("udp_port") {
        value as u16
    } else {
        CHMGR_UDP_PORT
    };

    // name of the evse device api driving the charging circuit
    let evse_api = if let Ok(value) = jconf.get::<String>("evse_api") {
        to_static_str(value)
    } else {
        "evse"
    };

    let event = if let Ok(value) = jconf.get::<String>("event") {
        to_static_str(value)
    } else {
        "chmgr"
    };

    let send_period = if let Ok(value) = jconf.get::<u32>("send_period") {
        value
    } else {
        CHMGR_SEND_PERIOD_MS
    };

    let watchdog_period = if let Ok(value) = jconf.get::<u32>("watchdog_period") {
        value
    } else {
        CHMGR_WATCHDOG_PERIOD_MS
    };

    let timeout = if let Ok(value) = jconf.get::<u32>("timeout") {
        value
    } else {
        CHMGR_TIMEOUT_MS
    };

    let acls = if let Ok(value) = jconf.get::<String>("acls") {
        AfbPermission::new(to_static_str(value))
    } else {
        AfbPermission::new("acl:evse:privcomm")
    };

    // register binding custom converters
    evse_registers()?;
    chmgr_registers()?;

    let api_config = ApiConfig {
        uid,
        event,
        evse_api,
        privcomm: PrivCommConfig { device: uart, rate },
        chmgr: ChmgrConfig {
            port: udp_port,
            version: firmware_version(),
            timeout,
        },
        send_period,
        watchdog_period,
    };

    // create a new api
    let api = AfbApi::new(uid).set_info(info).set_permission(acls);

    // register verbs, timers and transport handlers
    register(rootv4, api, api_config)?;

    // finalize api
    Ok(api.finalize()?)
}

// register binding within afbv4
AfbBindingRegister!(binding_init);
