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
use std::rc::Rc;
use std::time::Instant;

use crate::prelude::*;
use afbv4::prelude::*;
use privcomm::prelude::*;
use typesv4::prelude::*;

// this method is called each time bytes are waiting on the companion uart
struct UartEvtCtx {
    privcomm: Rc<PrivCommSession>,
}
AfbEvtFdRegister!(UartAsyncCtrl, uart_async_cb, UartEvtCtx);
fn uart_async_cb(evtfd: &AfbEvtFd, revent: u32, ctx: &mut UartEvtCtx) -> Result<(), AfbError> {
    if revent != AfbEvtFdPoll::IN.bits() {
        return Ok(());
    }

    // drain every buffered byte before yielding back to the event loop
    let mut buffer = [0u8; 256];
    loop {
        let count = match ctx.privcomm.get_uart().read(&mut buffer)? {
            None => break,
            Some(count) => count,
        };

        for idx in 0..count {
            match ctx.privcomm.process_byte(buffer[idx]) {
                Ok(None) => {}
                Ok(Some(frame)) => {
                    afb_log_msg!(Debug, evtfd, "privcomm rx {}", frame);
                    if !ctx.privcomm.dispatch(&frame)? {
                        afb_log_msg!(Notice, evtfd, "privcomm no handler for {}", frame);
                    }
                }
                // sync loss is recovered in place, worth a trace only
                Err(error) => afb_log_msg!(Notice, evtfd, "privcomm decode: {}", error),
            }
        }
    }
    Ok(())
}

// this method is called each time a datagram is waiting on the chmgr socket
struct ChmgrEvtCtx {
    chmgr: Rc<ChmgrSession>,
    event: &'static AfbEvent,
    apiv4: AfbApiV4,
    evse_api: &'static str,
}
AfbEvtFdRegister!(ChmgrAsyncCtrl, chmgr_async_cb, ChmgrEvtCtx);
fn chmgr_async_cb(evtfd: &AfbEvtFd, revent: u32, ctx: &mut ChmgrEvtCtx) -> Result<(), AfbError> {
    if revent != AfbEvtFdPoll::IN.bits() {
        return Ok(());
    }

    let mut buffer = [0u8; 64];
    loop {
        let (size, source) = match ctx.chmgr.get_socket().recvfrom(&mut buffer)? {
            None => break,
            Some(value) => value,
        };

        match ctx.chmgr.on_datagram(&buffer[0..size], &source, Instant::now()) {
            Ok(current) => {
                afb_log_msg!(Debug, evtfd, "chmgr allocated:{}mA peer:{}", current, source);
                // device may be rebooting or in bootloader, report and keep going
                if let Err(error) =
                    AfbSubCall::call_sync(ctx.apiv4, ctx.evse_api, "managed-current", current as u32)
                {
                    afb_log_msg!(Error, evtfd, "evse managed-current refused: {}", error);
                }
                ctx.event.push(ChmgrMsg::Allocated(current));
            }
            Err(error) => afb_log_msg!(Notice, evtfd, "chmgr datagram dropped: {}", error),
        }
    }
    Ok(())
}

// periodic status report toward the last validated allocation controller
struct TxTimerCtx {
    chmgr: Rc<ChmgrSession>,
    apiv4: AfbApiV4,
    evse_api: &'static str,
}
AfbTimerRegister!(TxTimerCtrl, tx_timer_cb, TxTimerCtx);
fn tx_timer_cb(timer: &AfbTimer, _decount: u32, ctx: &mut TxTimerCtx) -> Result<(), AfbError> {
    // nothing to send to while no controller was ever validated
    if !ctx.chmgr.has_peer() {
        return Ok(());
    }

    let answer = AfbSubCall::call_sync(ctx.apiv4, ctx.evse_api, "state", AFB_NO_DATA)?;
    let evse = answer.get::<&EvseState>(0)?;

    if let Some((response, peer)) = ctx.chmgr.build_response(evse) {
        let bytes = response.to_bytes();
        match ctx.chmgr.get_socket().sendto(&bytes, &peer)? {
            // transient would-block, simply retry next period
            None => {}
            Some(count) => {
                if count != bytes.len() {
                    afb_log_msg!(
                        Error,
                        timer,
                        "chmgr response truncated ({} of {} bytes) to {}",
                        count,
                        bytes.len(),
                        peer
                    );
                }
            }
        }
    }
    Ok(())
}

// allocation starvation fallback, the single safety critical behavior here
struct WatchdogTimerCtx {
    chmgr: Rc<ChmgrSession>,
    event: &'static AfbEvent,
    apiv4: AfbApiV4,
    evse_api: &'static str,
}
AfbTimerRegister!(WatchdogTimerCtrl, watchdog_timer_cb, WatchdogTimerCtx);
fn watchdog_timer_cb(timer: &AfbTimer, _decount: u32, ctx: &mut WatchdogTimerCtx) -> Result<(), AfbError> {
    match ctx.chmgr.watchdog_check(Instant::now()) {
        WatchdogVerdict::Running => {}
        WatchdogVerdict::Starved => {
            afb_log_msg!(
                Warning,
                timer,
                "no allocation for more than {}ms, forcing managed current to 0",
                ctx.chmgr.config.timeout
            );
            if let Err(error) =
                AfbSubCall::call_sync(ctx.apiv4, ctx.evse_api, "managed-current", 0u32)
            {
                afb_log_msg!(Error, timer, "evse managed-current refused: {}", error);
            }
            ctx.event.push(ChmgrMsg::Starved);
        }
    }
    Ok(())
}

struct SubscribeCtx {
    event: &'static AfbEvent,
}
AfbVerbRegister!(SubscribeCtrl, subscribe_callback, SubscribeCtx);
fn subscribe_callback(
    request: &AfbRequest,
    args: &AfbData,
    ctx: &mut SubscribeCtx,
) -> Result<(), AfbError> {
    let subcription = args.get::<bool>(0)?;
    if subcription {
        ctx.event.subscribe(request)?;
    } else {
        ctx.event.unsubscribe(request)?;
    }
    request.reply(AFB_NO_DATA, 0);
    Ok(())
}

struct StatusCtx {
    chmgr: Rc<ChmgrSession>,
}
AfbVerbRegister!(StatusCtrl, status_callback, StatusCtx);
fn status_callback(
    request: &AfbRequest,
    _args: &AfbData,
    ctx: &mut StatusCtx,
) -> Result<(), AfbError> {
    request.reply(ctx.chmgr.status(), 0);
    Ok(())
}

struct PingCtx {
    privcomm: Rc<PrivCommSession>,
    sequence: u8,
}
AfbVerbRegister!(PingCtrl, ping_callback, PingCtx);
fn ping_callback(
    request: &AfbRequest,
    _args: &AfbData,
    ctx: &mut PingCtx,
) -> Result<(), AfbError> {
    let sequence = ctx.sequence;
    ctx.sequence = ctx.sequence.wrapping_add(1);
    ctx.privcomm.send_frame(PRIVCOMM_CMD_HEARTBEAT, sequence, &[])?;
    request.reply(AFB_NO_DATA, 0);
    Ok(())
}

pub(crate) fn register(rootv4: AfbApiV4, api: &mut AfbApi, config: ApiConfig) -> Result<(), AfbError> {
    // one afb event for allocation notifications
    let event = AfbEvent::new(config.event);

    // open both protocol sessions, sockets and uart are non blocking
    let chmgr = Rc::new(ChmgrSession::new(&config.chmgr)?);
    let privcomm = Rc::new(PrivCommSession::new(&config.privcomm)?);
    afb_log_msg!(
        Notice,
        rootv4,
        "privcomm up uart:{} rate:{} udp:{}",
        privcomm.get_device(),
        config.privcomm.rate,
        chmgr.get_socket().get_port()
    );

    // heartbeat keeps the companion link observable, reply wiring comes with
    // the first bidirectional transaction
    privcomm.register_command(
        PRIVCOMM_CMD_HEARTBEAT,
        Box::new(|frame: &Frame| {
            afb_log_msg!(Notice, None, "privcomm heartbeat seq:{}", frame.sequence);
            Ok(())
        }),
    );

    // register transport handlers within listening event loop
    AfbEvtFd::new("privcomm-uart")
        .set_fd(privcomm.get_uart().get_fd())
        .set_events(AfbEvtFdPoll::IN)
        .set_callback(Box::new(UartEvtCtx {
            privcomm: privcomm.clone(),
        }))
        .start()?;

    AfbEvtFd::new("chmgr-sock")
        .set_fd(chmgr.get_socket().get_sockfd())
        .set_events(AfbEvtFdPoll::IN)
        .set_callback(Box::new(ChmgrEvtCtx {
            chmgr: chmgr.clone(),
            event,
            apiv4: rootv4,
            evse_api: config.evse_api,
        }))
        .start()?;

    // periodic status responses toward the allocation controller
    AfbTimer::new("chmgr-tx")
        .set_period(config.send_period)
        .set_decount(0)
        .set_callback(Box::new(TxTimerCtx {
            chmgr: chmgr.clone(),
            apiv4: rootv4,
            evse_api: config.evse_api,
        }))
        .start()?;

    // starvation watchdog, falls back to 0mA when the controller goes silent
    AfbTimer::new("chmgr-watchdog")
        .set_period(config.watchdog_period)
        .set_decount(0)
        .set_callback(Box::new(WatchdogTimerCtx {
            chmgr: chmgr.clone(),
            event,
            apiv4: rootv4,
            evse_api: config.evse_api,
        }))
        .start()?;

    let subscribe = AfbVerb::new("subscribe")
        .set_callback(Box::new(SubscribeCtrl { event }))
        .set_info("subscribe allocation events")
        .set_usage("true|false")
        .finalize()?;

    let status = AfbVerb::new("status")
        .set_callback(Box::new(StatusCtrl {
            chmgr: chmgr.clone(),
        }))
        .set_info("current allocation view: peer, sequences, granted current")
        .finalize()?;

    let ping = AfbVerb::new("ping")
        .set_callback(Box::new(PingCtrl {
            privcomm: privcomm.clone(),
            sequence: 0,
        }))
        .set_info("emit one heartbeat frame on the companion uart")
        .finalize()?;

    // register verb, event & handler into api
    api.add_verb(subscribe);
    api.add_verb(status);
    api.add_verb(ping);
    api.add_event(event);

    Ok(())
}
