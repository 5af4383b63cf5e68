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

use std::fmt;

use crate::prelude::*;

// Charge management datagrams are fixed size, exact match validated, and
// little endian for every multi byte field. Both stations of a deployment
// must be built from this definition.
//
// request (controller -> station), 6 bytes:
//   version[3] | sequence | allocated_current(u16 LE)
// response (station -> controller), 14 bytes:
//   sequence | version[3] | iec61851_state | vehicle_state | error_state |
//   uptime(u32 LE) | allowed_charging_current(u16 LE) | charge_release

pub const CHMGR_REQUEST_LEN: usize = 6;
pub const CHMGR_RESPONSE_LEN: usize = 14;

// datagram level rejects, dropped and reported without touching any state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChmgrError {
    WrongSize(usize),
    VersionMismatch { local: [u8; 3], remote: [u8; 3] },
    Stale { last: u8, received: u8 },
}

impl fmt::Display for ChmgrError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChmgrError::WrongSize(size) => format!("datagram of unexpected size:{}", size),
            ChmgrError::VersionMismatch { local, remote } => format!(
                "incompatible controller firmware, ours:{}.{}.{} received:{}.{}.{}",
                local[0], local[1], local[2], remote[0], remote[1], remote[2]
            ),
            ChmgrError::Stale { last, received } => format!(
                "stale (out of order?) sequence, last seen:{} received:{}",
                last, received
            ),
        };
        fmt.pad(&text)
    }
}

// current budget grant from the allocation controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChmgrRequest {
    pub version: [u8; 3],
    pub sequence: u8,
    pub allocated_current: u16,
}

impl ChmgrRequest {
    pub fn from_bytes(data: &[u8]) -> Result<ChmgrRequest, ChmgrError> {
        if data.len() != CHMGR_REQUEST_LEN {
            return Err(ChmgrError::WrongSize(data.len()));
        }
        Ok(ChmgrRequest {
            version: [data[0], data[1], data[2]],
            sequence: data[3],
            allocated_current: u16::from_le_bytes([data[4], data[5]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; CHMGR_REQUEST_LEN] {
        let current = self.allocated_current.to_le_bytes();
        [
            self.version[0],
            self.version[1],
            self.version[2],
            self.sequence,
            current[0],
            current[1],
        ]
    }
}

impl fmt::Display for ChmgrRequest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!(
            "chmgr-request:{{version:{}.{}.{}, seq:{}, current:{}mA}}",
            self.version[0], self.version[1], self.version[2], self.sequence, self.allocated_current
        );
        fmt.pad(&text)
    }
}

// station state snapshot returned to the allocation controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChmgrResponse {
    pub sequence: u8,
    pub version: [u8; 3],
    pub iec61851_state: u8,
    pub vehicle_state: u8,
    pub error_state: u8,
    pub uptime: u32,
    pub allowed_charging_current: u16,
    pub charge_release: u8,
}

impl ChmgrResponse {
    pub fn to_bytes(&self) -> [u8; CHMGR_RESPONSE_LEN] {
        let uptime = self.uptime.to_le_bytes();
        let allowed = self.allowed_charging_current.to_le_bytes();
        [
            self.sequence,
            self.version[0],
            self.version[1],
            self.version[2],
            self.iec61851_state,
            self.vehicle_state,
            self.error_state,
            uptime[0],
            uptime[1],
            uptime[2],
            uptime[3],
            allowed[0],
            allowed[1],
            self.charge_release,
        ]
    }

    pub fn from_bytes(data: &[u8]) -> Result<ChmgrResponse, ChmgrError> {
        if data.len() != CHMGR_RESPONSE_LEN {
            return Err(ChmgrError::WrongSize(data.len()));
        }
        Ok(ChmgrResponse {
            sequence: data[0],
            version: [data[1], data[2], data[3]],
            iec61851_state: data[4],
            vehicle_state: data[5],
            error_state: data[6],
            uptime: u32::from_le_bytes([data[7], data[8], data[9], data[10]]),
            allowed_charging_current: u16::from_le_bytes([data[11], data[12]]),
            charge_release: data[13],
        })
    }
}

impl fmt::Display for ChmgrResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!(
            "chmgr-response:{{seq:{}, version:{}.{}.{}, iec:{}, vehicle:{}, error:{}, uptime:{}, allowed:{}mA, release:{}}}",
            self.sequence,
            self.version[0],
            self.version[1],
            self.version[2],
            self.iec61851_state,
            self.vehicle_state,
            self.error_state,
            self.uptime,
            self.allowed_charging_current,
            self.charge_release
        );
        fmt.pad(&text)
    }
}

// Wrap tolerant staleness rule: a request is stale when its sequence does
// not progress and the wrapping distance stays inside the window. A small
// sequence after 255 is forward progress, not a replay.
pub fn sequence_is_stale(last: u8, received: u8) -> bool {
    received <= last && last.wrapping_sub(received) < CHMGR_SEQ_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let request = ChmgrRequest {
            version: [2, 4, 0],
            sequence: 17,
            allocated_current: 12000,
        };
        let bytes = request.to_bytes();
        assert_eq!(bytes.len(), CHMGR_REQUEST_LEN);
        assert_eq!(ChmgrRequest::from_bytes(&bytes), Ok(request));
    }

    #[test]
    fn request_wire_layout_is_little_endian() {
        let request = ChmgrRequest {
            version: [2, 4, 0],
            sequence: 1,
            allocated_current: 0x2EE0, // 12000
        };
        assert_eq!(request.to_bytes(), [2, 4, 0, 1, 0xE0, 0x2E]);
    }

    #[test]
    fn request_rejects_any_other_size() {
        assert_eq!(
            ChmgrRequest::from_bytes(&[0u8; 5]),
            Err(ChmgrError::WrongSize(5))
        );
        assert_eq!(
            ChmgrRequest::from_bytes(&[0u8; 7]),
            Err(ChmgrError::WrongSize(7))
        );
    }

    #[test]
    fn response_round_trip() {
        let response = ChmgrResponse {
            sequence: 200,
            version: [2, 4, 0],
            iec61851_state: 2,
            vehicle_state: 2,
            error_state: 0,
            uptime: 0x01020304,
            allowed_charging_current: 16000,
            charge_release: 1,
        };
        let bytes = response.to_bytes();
        assert_eq!(bytes.len(), CHMGR_RESPONSE_LEN);
        assert_eq!(ChmgrResponse::from_bytes(&bytes), Ok(response));
        // uptime occupies bytes 7..11 little endian
        assert_eq!(&bytes[7..11], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn staleness_window_boundaries() {
        // forward progress always accepted
        assert!(!sequence_is_stale(10, 11));
        assert!(!sequence_is_stale(10, 200));

        // duplicates and recent reordering rejected
        assert!(sequence_is_stale(10, 10));
        assert!(sequence_is_stale(10, 6));

        // exact boundary: distance 4 rejects, distance 5 accepts
        assert!(sequence_is_stale(10, 7));
        assert!(!sequence_is_stale(10, 5));
    }

    #[test]
    fn staleness_tolerates_counter_wrap() {
        // controller wrapped past 255 -> 0, numerically smaller sequences
        // keep flowing as long as the wrapping distance leaves the window
        assert!(!sequence_is_stale(2, 250));
        assert!(sequence_is_stale(2, 0));
        assert!(sequence_is_stale(255, 251));
        assert!(!sequence_is_stale(255, 250));
    }
}
