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

// a validated, length delimited unit decoded from the serial byte stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub sequence: u8,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!(
            "frame:{{cmd:{:#04X}, seq:{}, len:{}, crc:{:#06X}}}",
            self.command,
            self.sequence,
            self.payload.len(),
            self.crc
        );
        fmt.pad(&text)
    }
}

// every decode failure is recoverable, the decoder resynchronizes itself
// before reporting and the stream keeps flowing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    OutOfSync(u8),
    BadVersion(u8),
    BadAddress(u8),
    Oversize(u16),
    CrcMismatch { expected: u16, received: u16 },
    PayloadTooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FrameError::OutOfSync(byte) => format!("out of sync byte:{:#04X}", byte),
            FrameError::BadVersion(byte) => format!("wrong protocol version:{:#04X}", byte),
            FrameError::BadAddress(byte) => format!("wrong address byte:{:#04X}", byte),
            FrameError::Oversize(length) => format!("length field:{} above payload bound", length),
            FrameError::CrcMismatch { expected, received } => {
                format!("crc mismatch expected:{:#06X} received:{:#06X}", expected, received)
            }
            FrameError::PayloadTooLarge(length) => format!("payload:{} above frame bound", length),
        };
        fmt.pad(&text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    Magic,
    Version,
    Address,
    Command,
    Sequence,
    Length,
    Payload,
    Crc,
}

// CRC-16/CCITT-FALSE, init 0xFFFF poly 0x1021, carried little endian on the
// wire as part of the link contract
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// Byte at a time resynchronizing decoder. State and accumulation buffer
// persist across calls; any malformed sequence self heals within one
// maximum frame length of consumed bytes.
pub struct FrameDecoder {
    state: DecodeState,
    buffer: Vec<u8>,
    length: usize,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder {
            state: DecodeState::Magic,
            buffer: Vec::with_capacity(PRIVCOMM_BUFFER_SIZE),
            length: 0,
        }
    }

    fn reset(&mut self) {
        self.state = DecodeState::Magic;
        self.buffer.clear();
        self.length = 0;
    }

    // Returns Ok(Some(frame)) exactly when the final crc byte of a well
    // formed frame is consumed. Errors leave the decoder back in sync
    // waiting for the next magic byte, the caller only reports them.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        // the buffer index may never pass its bound, drop everything instead
        if self.buffer.len() >= PRIVCOMM_BUFFER_SIZE {
            self.reset();
        }

        match self.state {
            DecodeState::Magic => {
                if byte != PRIVCOMM_MAGIC {
                    return Err(FrameError::OutOfSync(byte));
                }
                self.buffer.push(byte);
                self.state = DecodeState::Version;
            }

            DecodeState::Version => {
                if byte != PRIVCOMM_PROTO_VERSION {
                    self.reset();
                    return Err(FrameError::BadVersion(byte));
                }
                self.buffer.push(byte);
                self.state = DecodeState::Address;
            }

            DecodeState::Address => {
                if byte != 0x00 {
                    self.reset();
                    return Err(FrameError::BadAddress(byte));
                }
                self.buffer.push(byte);
                if self.buffer.len() == 4 {
                    // second address byte received, move on
                    self.state = DecodeState::Command;
                }
            }

            DecodeState::Command => {
                self.buffer.push(byte);
                self.state = DecodeState::Sequence;
            }

            DecodeState::Sequence => {
                self.buffer.push(byte);
                self.state = DecodeState::Length;
            }

            DecodeState::Length => {
                self.buffer.push(byte);
                if self.buffer.len() == PRIVCOMM_HEADER_LEN {
                    let length = u16::from_le_bytes([self.buffer[6], self.buffer[7]]);
                    if length as usize > PRIVCOMM_MAX_PAYLOAD {
                        self.reset();
                        return Err(FrameError::Oversize(length));
                    }
                    self.length = length as usize;
                    self.state = if self.length == 0 {
                        DecodeState::Crc
                    } else {
                        DecodeState::Payload
                    };
                }
            }

            DecodeState::Payload => {
                self.buffer.push(byte);
                if self.buffer.len() == PRIVCOMM_HEADER_LEN + self.length {
                    self.state = DecodeState::Crc;
                }
            }

            DecodeState::Crc => {
                self.buffer.push(byte);
                if self.buffer.len() == PRIVCOMM_HEADER_LEN + self.length + PRIVCOMM_CRC_LEN {
                    let body = PRIVCOMM_HEADER_LEN + self.length;
                    let received = u16::from_le_bytes([self.buffer[body], self.buffer[body + 1]]);
                    let expected = crc16(&self.buffer[0..body]);
                    if expected != received {
                        self.reset();
                        return Err(FrameError::CrcMismatch { expected, received });
                    }

                    let frame = Frame {
                        command: self.buffer[4],
                        sequence: self.buffer[5],
                        payload: self.buffer[PRIVCOMM_HEADER_LEN..body].to_vec(),
                        crc: received,
                    };
                    self.reset();
                    return Ok(Some(frame));
                }
            }
        }

        Ok(None)
    }
}

// matching encoder for the outbound path, the companion chip runs the same
// decoder on its side
pub fn encode_frame(command: u8, sequence: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > PRIVCOMM_MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(PRIVCOMM_HEADER_LEN + payload.len() + PRIVCOMM_CRC_LEN);
    frame.push(PRIVCOMM_MAGIC);
    frame.push(PRIVCOMM_PROTO_VERSION);
    frame.extend_from_slice(&PRIVCOMM_ADDR.to_be_bytes());
    frame.push(command);
    frame.push(sequence);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if let Ok(Some(frame)) = decoder.feed(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn crc16_check_value() {
        // standard CRC-16/CCITT-FALSE check input
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn encode_decode_round_trip() {
        let bytes = encode_frame(0x04, 7, &[0x01, 0x02, 0x03]).unwrap();
        let mut decoder = FrameDecoder::new();

        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x04);
        assert_eq!(frames[0].sequence, 7);
        assert_eq!(frames[0].payload, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn empty_payload_round_trip() {
        let bytes = encode_frame(0x04, 0, &[]).unwrap();
        assert_eq!(bytes.len(), PRIVCOMM_HEADER_LEN + PRIVCOMM_CRC_LEN);

        let mut decoder = FrameDecoder::new();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn garbage_never_yields_a_frame() {
        let mut decoder = FrameDecoder::new();
        let garbage: Vec<u8> = (0..2048u32).map(|idx| (idx % 251) as u8).collect();
        let mut frames = 0;
        for &byte in garbage.iter() {
            if let Ok(Some(_)) = decoder.feed(byte) {
                frames += 1;
            }
        }
        assert_eq!(frames, 0);

        // decoder recovered, a clean frame still decodes
        let bytes = encode_frame(0x11, 1, &[0xAA]).unwrap();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn out_of_sync_byte_is_reported_and_skipped() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(0x42), Err(FrameError::OutOfSync(0x42)));

        let bytes = encode_frame(0x04, 3, &[]).unwrap();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 3);
    }

    #[test]
    fn wrong_version_resynchronizes() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(PRIVCOMM_MAGIC), Ok(None));
        assert_eq!(decoder.feed(0x02), Err(FrameError::BadVersion(0x02)));

        let bytes = encode_frame(0x04, 9, &[0x55]).unwrap();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 9);
    }

    #[test]
    fn wrong_address_resynchronizes() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(PRIVCOMM_MAGIC), Ok(None));
        assert_eq!(decoder.feed(PRIVCOMM_PROTO_VERSION), Ok(None));
        assert_eq!(decoder.feed(0x01), Err(FrameError::BadAddress(0x01)));
    }

    #[test]
    fn oversized_length_field_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let header = [
            PRIVCOMM_MAGIC,
            PRIVCOMM_PROTO_VERSION,
            0x00,
            0x00,
            0x04,
            0x01,
            0x00,
            0x04, // length 0x0400 = 1024, above the payload bound
        ];
        let mut outcome = Ok(None);
        for &byte in header.iter() {
            outcome = decoder.feed(byte);
        }
        assert_eq!(outcome, Err(FrameError::Oversize(1024)));

        // stream resumes with the next clean frame
        let bytes = encode_frame(0x04, 2, &[]).unwrap();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn corrupted_crc_drops_the_frame() {
        let mut bytes = encode_frame(0x04, 5, &[0x10, 0x20]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        let mut saw_mismatch = false;
        for &byte in bytes.iter() {
            if let Err(FrameError::CrcMismatch { .. }) = decoder.feed(byte) {
                saw_mismatch = true;
            }
        }
        assert!(saw_mismatch);

        let clean = encode_frame(0x04, 6, &[0x10, 0x20]).unwrap();
        let frames = feed_all(&mut decoder, &clean);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 6);
    }

    #[test]
    fn frame_decodes_after_leading_noise() {
        let mut stream = vec![0x00, 0xFF, 0x13, 0x37];
        stream.extend(encode_frame(0x04, 42, &[0xDE, 0xAD]).unwrap());

        let mut decoder = FrameDecoder::new();
        let frames = feed_all(&mut decoder, &stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 42);
        assert_eq!(frames[0].payload, vec![0xDE, 0xAD]);
    }

    #[test]
    fn back_to_back_frames_decode_independently() {
        let mut stream = encode_frame(0x04, 1, &[]).unwrap();
        stream.extend(encode_frame(0x11, 2, &[0x01]).unwrap());

        let mut decoder = FrameDecoder::new();
        let frames = feed_all(&mut decoder, &stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, 0x04);
        assert_eq!(frames[1].command, 0x11);
        assert_eq!(frames[1].payload, vec![0x01]);
    }

    #[test]
    fn encoder_refuses_oversized_payload() {
        let payload = vec![0u8; PRIVCOMM_MAX_PAYLOAD + 1];
        assert_eq!(
            encode_frame(0x04, 0, &payload),
            Err(FrameError::PayloadTooLarge(PRIVCOMM_MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn largest_legal_payload_round_trips() {
        let payload = vec![0x5Au8; PRIVCOMM_MAX_PAYLOAD];
        let bytes = encode_frame(0x11, 255, &payload).unwrap();
        assert!(bytes.len() <= PRIVCOMM_BUFFER_SIZE);

        let mut decoder = FrameDecoder::new();
        let frames = feed_all(&mut decoder, &bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), PRIVCOMM_MAX_PAYLOAD);
    }
}
