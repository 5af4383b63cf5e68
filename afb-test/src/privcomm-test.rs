/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk samples code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use afbv4::prelude::*;
use privcomm::prelude::*;
use typesv4::prelude::*;

// This binding tests the privcomm api loaded within the same afb-binder
// process and security context. It also mocks the evse device api the
// binding subcalls, so the suite runs without any charging hardware.
// It leverages TAP (Test Anything Protocol) and is compatible with redpesk
// testing reports.
struct TapUserData {
    autostart: bool,
    autoexit: bool,
    output: AfbTapOutput,
    target: &'static str,
    uid: &'static str,
}

// AfbApi userdata implements AfbApiControls trait
impl AfbApiControls for TapUserData {
    fn start(&mut self, api: &AfbApi) -> Result<(), AfbError> {
        afb_log_msg!(Notice, api, "starting privcomm testing");

        let subscribe = AfbTapTest::new("subscribe", self.target, "subscribe")
            .set_info("subscribe allocation event")
            .add_arg(true)?
            .finalize()?;

        let inject = AfbTapTest::new("inject", self.uid, "inject")
            .set_info("forge one allocation request datagram")
            .add_arg(12000)?
            .finalize()?;

        let status = AfbTapTest::new("status", self.target, "status")
            .set_info("read allocation status")
            .finalize()?;

        let unsubscribe = AfbTapTest::new("unsubscribe", self.target, "subscribe")
            .set_info("unsubscribe allocation event")
            .add_arg(false)?
            .finalize()?;

        AfbTapSuite::new(api, "Tap Privcomm Test")
            .set_info("privcomm binding verbs with mocked evse api")
            .set_timeout(0)
            .add_test(subscribe)
            .add_test(inject)
            .add_test(status)
            .add_test(unsubscribe)
            .set_autorun(self.autostart)
            .set_autoexit(self.autoexit)
            .set_output(self.output)
            .finalize()?;
        Ok(())
    }

    fn config(&mut self, api: &AfbApi, jconf: JsoncObj) -> Result<(), AfbError> {
        afb_log_msg!(Debug, api, "api={} config={}", api.get_uid(), jconf);
        match jconf.get::<bool>("autostart") {
            Ok(value) => self.autostart = value,
            Err(_error) => {}
        };

        match jconf.get::<bool>("autoexit") {
            Ok(value) => self.autoexit = value,
            Err(_error) => {}
        };

        match jconf.get::<String>("output") {
            Err(_error) => {}
            Ok(value) => match value.to_uppercase().as_str() {
                "JSON" => self.output = AfbTapOutput::JSON,
                "TAP" => self.output = AfbTapOutput::TAP,
                "NONE" => self.output = AfbTapOutput::NONE,
                _ => {
                    afb_log_msg!(
                        Error,
                        api,
                        "Invalid output should be json|tap (default used)"
                    );
                }
            },
        };

        Ok(())
    }

    // mandatory for downcasting back to custom apidata object
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

// mock of the evse device state verb, replies a plausible charging snapshot
struct EvseStateMockCtx {}
AfbVerbRegister!(EvseStateMockCtrl, evse_state_mock_cb, EvseStateMockCtx);
fn evse_state_mock_cb(
    request: &AfbRequest,
    _args: &AfbData,
    _ctx: &mut EvseStateMockCtx,
) -> Result<(), AfbError> {
    let snapshot = EvseState {
        iec61851_state: 2,
        vehicle_state: 2,
        error_state: 0,
        charge_release: 1,
        allowed_charging_current: 8000,
        uptime: 123456,
    };
    request.reply(snapshot, 0);
    Ok(())
}

// mock of the evse device current limit verb
struct EvseCurrentMockCtx {}
AfbVerbRegister!(EvseCurrentMockCtrl, evse_current_mock_cb, EvseCurrentMockCtx);
fn evse_current_mock_cb(
    request: &AfbRequest,
    args: &AfbData,
    _ctx: &mut EvseCurrentMockCtx,
) -> Result<(), AfbError> {
    let current = args.get::<u32>(0)?;
    afb_log_msg!(Notice, request, "evse mock managed-current:{}mA", current);
    request.reply(AFB_NO_DATA, 0);
    Ok(())
}

// forge a valid allocation request toward the binding udp port, walking the
// same wire path a real allocation controller would
struct InjectMockCtx {
    sock: SockUdp,
    station: PeerAddr,
    sequence: u8,
}
AfbVerbRegister!(InjectMockCtrl, inject_mock_cb, InjectMockCtx);
fn inject_mock_cb(
    request: &AfbRequest,
    args: &AfbData,
    ctx: &mut InjectMockCtx,
) -> Result<(), AfbError> {
    let current = args.get::<u32>(0)? as u16;
    ctx.sequence = ctx.sequence.wrapping_add(1);

    let packet = ChmgrRequest {
        version: firmware_version(),
        sequence: ctx.sequence,
        allocated_current: current,
    };
    ctx.sock.sendto(&packet.to_bytes(), &ctx.station)?;
    afb_log_msg!(Notice, request, "injected {}", packet);
    request.reply(AFB_NO_DATA, 0);
    Ok(())
}

// init callback started at binding load time before any API exist
// ---------------------------------------------------------------
pub fn binding_test_init(rootv4: AfbApiV4, jconf: JsoncObj) -> Result<&'static AfbApi, AfbError> {
    let uid = jconf.get::<&'static str>("uid")?;
    let target = jconf.get::<&'static str>("target")?;

    let udp_port = if let Ok(value) = jconf.get::<u32>("udp_port") {
        value as u16
    } else {
        CHMGR_UDP_PORT
    };

    let tap_config = TapUserData {
        autostart: jconf.default::<bool>("autostart", true)?,
        autoexit: jconf.default::<bool>("autoexit", true)?,
        output: AfbTapOutput::TAP,
        target,
        uid,
    };

    // custom types should register once per binder
    evse_registers()?;
    chmgr_registers()?;

    // the binder config should alias this api as the binding's evse_api
    let state_verb = AfbVerb::new("Evse state simulation")
        .set_name("state")
        .set_info("Mock evse charging snapshot")
        .set_callback(Box::new(EvseStateMockCtrl {}))
        .finalize()?;

    let current_verb = AfbVerb::new("Evse current simulation")
        .set_name("managed-current")
        .set_info("Mock evse managed current limit")
        .set_usage("current-mA")
        .set_callback(Box::new(EvseCurrentMockCtrl {}))
        .finalize()?;

    let inject_verb = AfbVerb::new("Allocation controller simulation")
        .set_name("inject")
        .set_info("Mock one allocation request datagram")
        .set_usage("current-mA")
        .set_callback(Box::new(InjectMockCtrl {
            sock: SockUdp::open(0)?,
            station: PeerAddr::new([127, 0, 0, 1], udp_port),
            sequence: 0,
        }))
        .finalize()?;

    afb_log_msg!(Notice, rootv4, "privcomm test uid:{} target:{}", uid, target);
    let api = AfbApi::new(uid)
        .set_info("Testing privcomm tap reporting")
        .require_api(target)
        .set_callback(Box::new(tap_config))
        .add_verb(state_verb)
        .add_verb(current_verb)
        .add_verb(inject_verb)
        .seal(false)
        .finalize()?;
    Ok(api)
}

// register binding within afbv4
AfbBindingRegister!(binding_test_init);
