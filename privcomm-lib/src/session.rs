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
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::cell::{RefCell, RefMut};
use std::time::{Duration, Instant};

use crate::prelude::*;
use afbv4::prelude::*;
use typesv4::prelude::*;

pub type CmdHandlerCallback = Box<dyn Fn(&Frame) -> Result<(), AfbError>>;

// command code to handler lookup, decoder stays fully decoupled from
// command semantics and new commands register without touching it
pub struct CommandTable {
    handlers: RefCell<Vec<(u8, CmdHandlerCallback)>>,
}

impl CommandTable {
    pub fn new() -> CommandTable {
        CommandTable {
            handlers: RefCell::new(Vec::new()),
        }
    }

    pub fn register(&self, command: u8, handler: CmdHandlerCallback) {
        self.handlers.borrow_mut().push((command, handler));
    }

    // Ok(false) flags an unknown command, an observability event only
    pub fn dispatch(&self, frame: &Frame) -> Result<bool, AfbError> {
        let handlers = match self.handlers.try_borrow() {
            Err(_) => return afb_error!("privcomm-dispatch", "fail to access command table"),
            Ok(value) => value,
        };
        for (command, handler) in handlers.iter() {
            if *command == frame.command {
                handler(frame)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Clone)]
pub struct PrivCommConfig {
    pub device: &'static str,
    pub rate: u32,
}

// serial side session: one tty, one decoder, one command table, all owned
// by the binder event loop thread
pub struct PrivCommSession {
    pub config: PrivCommConfig,
    uart: TtyUart,
    decoder: RefCell<FrameDecoder>,
    commands: CommandTable,
}

impl PrivCommSession {
    pub fn new(config: &PrivCommConfig) -> Result<PrivCommSession, AfbError> {
        let uart = TtyUart::open(config.device, config.rate)?;
        Ok(PrivCommSession {
            config: config.clone(),
            uart,
            decoder: RefCell::new(FrameDecoder::new()),
            commands: CommandTable::new(),
        })
    }

    pub fn get_uart(&self) -> &TtyUart {
        &self.uart
    }

    pub fn get_device(&self) -> &'static str {
        self.config.device
    }

    pub fn register_command(&self, command: u8, handler: CmdHandlerCallback) {
        self.commands.register(command, handler);
    }

    pub fn process_byte(&self, byte: u8) -> Result<Option<Frame>, FrameError> {
        self.decoder.borrow_mut().feed(byte)
    }

    pub fn dispatch(&self, frame: &Frame) -> Result<bool, AfbError> {
        self.commands.dispatch(frame)
    }

    pub fn send_frame(&self, command: u8, sequence: u8, payload: &[u8]) -> Result<(), AfbError> {
        let bytes = match encode_frame(command, sequence, payload) {
            Err(error) => return afb_error!("privcomm-send-frame", "{}", error),
            Ok(value) => value,
        };
        let count = self.uart.write(&bytes)?;
        if count != bytes.len() {
            return afb_error!(
                "privcomm-send-frame",
                "truncated tx ({} of {} bytes) on {}",
                count,
                bytes.len(),
                self.config.device
            );
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ChmgrConfig {
    pub port: u16,
    pub version: [u8; 3],
    pub timeout: u32, // allocation starvation fallback in ms
}

pub struct ChmgrState {
    // None until the first request, so any initial sequence is accepted
    pub last_seen_sequence: Option<u8>,
    // set only after a request passed every validation
    pub peer: Option<PeerAddr>,
    pub last_accepted: Instant,
    // starvation episode latch, keeps the fallback edge triggered
    pub starved: bool,
    // response counter, independent from the receive side, wraps mod 256
    pub next_tx_sequence: u8,
    pub allocated_current: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Running,
    // returned exactly once per starvation episode, the caller forces the
    // charge current to zero and reports
    Starved,
}

// datagram side session: socket plus allocation state, single writer from
// the binder event loop
pub struct ChmgrSession {
    pub config: ChmgrConfig,
    state: RefCell<ChmgrState>,
    socket: SockUdp,
}

impl ChmgrSession {
    pub fn new(config: &ChmgrConfig) -> Result<ChmgrSession, AfbError> {
        let socket = SockUdp::open(config.port)?;
        let state = RefCell::new(ChmgrState {
            last_seen_sequence: None,
            peer: None,
            last_accepted: Instant::now(),
            starved: false,
            next_tx_sequence: 0,
            allocated_current: 0,
        });
        Ok(ChmgrSession {
            config: config.clone(),
            state,
            socket,
        })
    }

    pub fn get_socket(&self) -> &SockUdp {
        &self.socket
    }

    #[track_caller]
    fn get_cell(&self) -> RefMut<'_, ChmgrState> {
        self.state.borrow_mut()
    }

    pub fn has_peer(&self) -> bool {
        self.get_cell().peer.is_some()
    }

    // Validation order is size, version, freshness; a reject never touches
    // peer, sequence or deadline state. Acceptance re-arms the watchdog and
    // returns the granted current for the caller to apply on the device.
    pub fn on_datagram(
        &self,
        data: &[u8],
        source: &PeerAddr,
        now: Instant,
    ) -> Result<u16, ChmgrError> {
        let request = ChmgrRequest::from_bytes(data)?;

        if request.version != self.config.version {
            return Err(ChmgrError::VersionMismatch {
                local: self.config.version,
                remote: request.version,
            });
        }

        let mut state = self.get_cell();
        if let Some(last) = state.last_seen_sequence {
            if sequence_is_stale(last, request.sequence) {
                return Err(ChmgrError::Stale {
                    last,
                    received: request.sequence,
                });
            }
        }

        state.last_seen_sequence = Some(request.sequence);
        state.peer = Some(*source);
        state.last_accepted = now;
        state.starved = false;
        state.allocated_current = request.allocated_current;
        Ok(request.allocated_current)
    }

    // None while no controller was ever validated, nothing to send to
    pub fn build_response(&self, evse: &EvseState) -> Option<(ChmgrResponse, PeerAddr)> {
        let mut state = self.get_cell();
        let peer = state.peer?;

        let sequence = state.next_tx_sequence;
        state.next_tx_sequence = state.next_tx_sequence.wrapping_add(1);

        let response = ChmgrResponse {
            sequence,
            version: self.config.version,
            iec61851_state: evse.iec61851_state,
            vehicle_state: evse.vehicle_state,
            error_state: evse.error_state,
            uptime: evse.uptime,
            allowed_charging_current: evse.allowed_charging_current,
            charge_release: evse.charge_release,
        };
        Some((response, peer))
    }

    pub fn watchdog_check(&self, now: Instant) -> WatchdogVerdict {
        let timeout = Duration::from_millis(self.config.timeout as u64);
        let mut state = self.get_cell();

        if !state.starved && now.duration_since(state.last_accepted) >= timeout {
            state.starved = true;
            state.allocated_current = 0;
            return WatchdogVerdict::Starved;
        }
        WatchdogVerdict::Running
    }

    pub fn status(&self) -> ChmgrStatus {
        let state = self.state.borrow();
        ChmgrStatus {
            peer: state.peer.map(|peer| format!("{}", peer)),
            last_seen_sequence: state.last_seen_sequence,
            next_tx_sequence: state.next_tx_sequence,
            allocated_current: state.allocated_current,
            starved: state.starved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn mk_session() -> ChmgrSession {
        // port 0 lets the kernel pick an ephemeral port, no privileges needed
        let config = ChmgrConfig {
            port: 0,
            version: [2, 4, 0],
            timeout: CHMGR_TIMEOUT_MS,
        };
        match ChmgrSession::new(&config) {
            Ok(session) => session,
            Err(error) => panic!("chmgr session open failed: {}", error),
        }
    }

    fn mk_request(sequence: u8, current: u16) -> [u8; CHMGR_REQUEST_LEN] {
        ChmgrRequest {
            version: [2, 4, 0],
            sequence,
            allocated_current: current,
        }
        .to_bytes()
    }

    fn mk_evse() -> EvseState {
        EvseState {
            iec61851_state: 2,
            vehicle_state: 2,
            error_state: 0,
            charge_release: 1,
            allowed_charging_current: 16000,
            uptime: 4242,
        }
    }

    #[test]
    fn first_request_is_always_accepted() {
        let session = mk_session();
        let peer = PeerAddr::new([10, 0, 0, 1], 40000);
        let now = Instant::now();

        // sequence 255 would have been inside the legacy reject window
        let granted = session.on_datagram(&mk_request(255, 6000), &peer, now);
        assert_eq!(granted, Ok(6000));
        assert!(session.has_peer());
    }

    #[test]
    fn wrong_size_never_touches_state() {
        let session = mk_session();
        let peer = PeerAddr::new([10, 0, 0, 1], 40000);
        let now = Instant::now();

        let outcome = session.on_datagram(&[0u8; 12], &peer, now);
        assert_eq!(outcome, Err(ChmgrError::WrongSize(12)));
        assert!(!session.has_peer());
        assert_eq!(session.status().last_seen_sequence, None);
    }

    #[test]
    fn cross_version_controller_is_rejected() {
        let session = mk_session();
        let peer = PeerAddr::new([10, 0, 0, 1], 40000);
        let now = Instant::now();

        let mut data = mk_request(1, 6000);
        data[1] = 5; // minor differs
        let outcome = session.on_datagram(&data, &peer, now);
        assert_eq!(
            outcome,
            Err(ChmgrError::VersionMismatch {
                local: [2, 4, 0],
                remote: [2, 5, 0],
            })
        );
        assert!(!session.has_peer());
    }

    #[test]
    fn stale_sequences_are_dropped() {
        let session = mk_session();
        let peer = PeerAddr::new([10, 0, 0, 1], 40000);
        let now = Instant::now();

        assert_eq!(session.on_datagram(&mk_request(10, 8000), &peer, now), Ok(8000));
        assert_eq!(
            session.on_datagram(&mk_request(10, 7000), &peer, now),
            Err(ChmgrError::Stale { last: 10, received: 10 })
        );
        assert_eq!(
            session.on_datagram(&mk_request(6, 7000), &peer, now),
            Err(ChmgrError::Stale { last: 10, received: 6 })
        );
        assert_eq!(session.on_datagram(&mk_request(11, 7000), &peer, now), Ok(7000));
        assert_eq!(session.status().allocated_current, 7000);
    }

    #[test]
    fn sender_is_gated_until_a_peer_is_valid() {
        let session = mk_session();
        assert!(session.build_response(&mk_evse()).is_none());

        let peer = PeerAddr::new([192, 168, 1, 9], 34128);
        let now = Instant::now();
        session.on_datagram(&mk_request(1, 12000), &peer, now).unwrap();

        let (response, target) = session.build_response(&mk_evse()).unwrap();
        assert_eq!(target, peer);
        assert_eq!(response.sequence, 0);
        assert_eq!(response.version, [2, 4, 0]);
        assert_eq!(response.allowed_charging_current, 16000);

        // tx counter is independent and keeps counting
        let (response, _) = session.build_response(&mk_evse()).unwrap();
        assert_eq!(response.sequence, 1);
    }

    #[test]
    fn watchdog_trips_once_per_episode_and_rearms() {
        let session = mk_session();
        let peer = PeerAddr::new([10, 0, 0, 1], 40000);
        let start = Instant::now();

        session.on_datagram(&mk_request(1, 12000), &peer, start).unwrap();

        let before = start + Duration::from_millis(29_999);
        assert_eq!(session.watchdog_check(before), WatchdogVerdict::Running);

        let expired = start + Duration::from_millis(30_000);
        assert_eq!(session.watchdog_check(expired), WatchdogVerdict::Starved);
        assert_eq!(session.status().allocated_current, 0);
        assert!(session.status().starved);

        // still starved, but the fallback already fired
        let later = start + Duration::from_millis(90_000);
        assert_eq!(session.watchdog_check(later), WatchdogVerdict::Running);

        // a fresh acceptance re-arms the episode latch
        session.on_datagram(&mk_request(2, 9000), &peer, later).unwrap();
        assert!(!session.status().starved);
        assert_eq!(
            session.watchdog_check(later + Duration::from_millis(30_000)),
            WatchdogVerdict::Starved
        );
    }

    #[test]
    fn watchdog_trips_when_no_controller_ever_showed_up() {
        let session = mk_session();
        let expired = Instant::now() + Duration::from_millis(31_000);
        assert_eq!(session.watchdog_check(expired), WatchdogVerdict::Starved);
    }

    #[test]
    fn allocation_scenario_end_to_end() {
        let session = mk_session();
        let peer = PeerAddr::new([192, 168, 1, 50], 34128);
        let start = Instant::now();

        // controller grants 12A
        let granted = session.on_datagram(&mk_request(1, 12000), &peer, start);
        assert_eq!(granted, Ok(12000));
        let status = session.status();
        assert_eq!(status.allocated_current, 12000);
        assert_eq!(status.peer, Some("192.168.1.50:34128".to_string()));

        // duplicate sequence is dropped, grant stays at 12A
        let replay = session.on_datagram(&mk_request(1, 6000), &peer, start);
        assert_eq!(replay, Err(ChmgrError::Stale { last: 1, received: 1 }));
        assert_eq!(session.status().allocated_current, 12000);

        // 31s of silence, the watchdog falls back to 0mA
        let starved = start + Duration::from_millis(31_000);
        assert_eq!(session.watchdog_check(starved), WatchdogVerdict::Starved);
        assert_eq!(session.status().allocated_current, 0);
    }

    #[test]
    fn command_table_dispatches_by_code() {
        let table = CommandTable::new();
        let seen = Rc::new(Cell::new(0u8));

        let captured = seen.clone();
        table.register(
            PRIVCOMM_CMD_HEARTBEAT,
            Box::new(move |frame| {
                captured.set(frame.sequence);
                Ok(())
            }),
        );

        let heartbeat = Frame {
            command: PRIVCOMM_CMD_HEARTBEAT,
            sequence: 9,
            payload: Vec::new(),
            crc: 0,
        };
        assert!(matches!(table.dispatch(&heartbeat), Ok(true)));
        assert_eq!(seen.get(), 9);

        let unknown = Frame {
            command: 0x7F,
            sequence: 1,
            payload: Vec::new(),
            crc: 0,
        };
        assert!(matches!(table.dispatch(&unknown), Ok(false)));
    }
}
