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

// Serial link wire contract, shared with the charge controller companion chip.
// A frame on the line is laid out as:
//   magic(0xFA) version(0x03) address(0x0000) command seq length(u16 LE)
//   payload(length bytes) crc16(u16 LE, CCITT-FALSE over header+payload)

pub const PRIVCOMM_MAGIC: u8 = 0xFA;
pub const PRIVCOMM_PROTO_VERSION: u8 = 0x03;
pub const PRIVCOMM_ADDR: u16 = 0x0000;

// header is magic+version+address+command+seq+length
pub const PRIVCOMM_HEADER_LEN: usize = 8;
pub const PRIVCOMM_CRC_LEN: usize = 2;

// accumulation buffer bound, a frame can never grow past it
pub const PRIVCOMM_BUFFER_SIZE: usize = 1024;

// largest payload the companion chip emits, length fields above it are
// treated as line corruption
pub const PRIVCOMM_MAX_PAYLOAD: usize = 1007;

// companion chip communication heartbeat / time request
pub const PRIVCOMM_CMD_HEARTBEAT: u8 = 0x04;

pub const PRIVCOMM_DEFAULT_DEVICE: &str = "/dev/ttyS2";
pub const PRIVCOMM_DEFAULT_RATE: u32 = 115200;

// Charge management datagram protocol. One controller distributes the site
// current budget over UDP; stations answer with their state snapshot.

pub const CHMGR_UDP_PORT: u16 = 34128;
pub const CHMGR_SEND_PERIOD_MS: u32 = 1000;
pub const CHMGR_WATCHDOG_PERIOD_MS: u32 = 1000;

// a station must fall back to 0mA when the controller stays silent
pub const CHMGR_TIMEOUT_MS: u32 = 30000;

// wrap tolerant window of the receive sequence staleness check
pub const CHMGR_SEQ_WINDOW: u8 = 5;

// station firmware version triple, cross version controllers are never trusted
pub fn firmware_version() -> [u8; 3] {
    [
        env!("CARGO_PKG_VERSION_MAJOR").parse::<u8>().unwrap_or(0),
        env!("CARGO_PKG_VERSION_MINOR").parse::<u8>().unwrap_or(0),
        env!("CARGO_PKG_VERSION_PATCH").parse::<u8>().unwrap_or(0),
    ]
}
