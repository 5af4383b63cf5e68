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

use std::ffi::CStr;
use std::ffi::CString;
use std::fmt;
use std::mem;

use afbv4::prelude::*;

pub type Cchar = ::std::os::raw::c_char;

const MAX_ERROR_LEN: usize = 256;
pub mod cglue {
    #![allow(dead_code)]
    #![allow(non_upper_case_globals)]
    #![allow(non_camel_case_types)]
    #![allow(non_snake_case)]
    include!("_capi-map.rs");
}

pub fn get_perror() -> String {
    let mut buffer = [0 as ::std::os::raw::c_char; MAX_ERROR_LEN];
    unsafe {
        cglue::strerror_r(
            *cglue::__errno_location(),
            &mut buffer as *mut Cchar,
            MAX_ERROR_LEN,
        )
    };
    let cstring = unsafe { CStr::from_ptr(&buffer as *const Cchar) };
    match cstring.to_str() {
        Ok(slice) => slice.to_owned(),
        Err(_) => "unprintable errno".to_owned(),
    }
}

// EAGAIN/EWOULDBLOCK are the expected idle path of every non blocking poll
pub fn would_block() -> bool {
    let errno = unsafe { *cglue::__errno_location() };
    errno == cglue::CLIB_EAGAIN || errno == cglue::CLIB_EWOULDBLOCK
}

// copyable ipv4 endpoint of the last trusted allocation controller
#[derive(Clone, Copy)]
pub struct PeerAddr {
    addr: cglue::sockaddr_in,
}

impl PeerAddr {
    pub fn new(ip: [u8; 4], port: u16) -> PeerAddr {
        let mut addr: cglue::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = cglue::INET_AF_INET as cglue::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from_ne_bytes(ip);
        PeerAddr { addr }
    }

    pub fn get_ip(&self) -> [u8; 4] {
        self.addr.sin_addr.s_addr.to_ne_bytes()
    }

    pub fn get_port(&self) -> u16 {
        u16::from_be(self.addr.sin_port)
    }
}

impl PartialEq for PeerAddr {
    fn eq(&self, other: &Self) -> bool {
        self.addr.sin_addr.s_addr == other.addr.sin_addr.s_addr
            && self.addr.sin_port == other.addr.sin_port
    }
}
impl Eq for PeerAddr {}

impl fmt::Display for PeerAddr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self.get_ip();
        let text = format!("{}.{}.{}.{}:{}", ip[0], ip[1], ip[2], ip[3], self.get_port());
        fmt.pad(&text)
    }
}

// non blocking ipv4/udp socket for the charge management datagram protocol
pub struct SockUdp {
    port: u16,
    sockfd: ::std::os::raw::c_int,
}

impl fmt::Display for SockUdp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!("sockudp:{{port:{}, sockfd:{}}}", self.port, self.sockfd);
        fmt.pad(&text)
    }
}

impl SockUdp {
    pub fn open(port: u16) -> Result<SockUdp, AfbError> {
        let sockfd = unsafe { cglue::socket(cglue::INET_AF_INET, cglue::INET_SOCK_DGRAM, 0) };
        if sockfd < 0 {
            return afb_error!("chmgr-sock-open", "udp socket creation failed, info:{}", get_perror());
        }

        let mut sockaddr: cglue::sockaddr_in = unsafe { mem::zeroed() };
        sockaddr.sin_family = cglue::INET_AF_INET as cglue::sa_family_t;
        sockaddr.sin_port = port.to_be();
        sockaddr.sin_addr.s_addr = cglue::INET_INADDR_ANY;

        let status = unsafe {
            cglue::bind(
                sockfd,
                &sockaddr as *const _ as *const cglue::sockaddr,
                mem::size_of::<cglue::sockaddr_in>() as cglue::socklen_t,
            )
        };
        if status < 0 {
            unsafe { cglue::close(sockfd) };
            return afb_error!("chmgr-sock-bind", "udp port:{} bind failed, info:{}", port, get_perror());
        }

        let status = unsafe { cglue::fcntl(sockfd, cglue::CLIB_F_SETFL, cglue::CLIB_O_NONBLOCK) };
        if status < 0 {
            unsafe { cglue::close(sockfd) };
            return afb_error!("chmgr-sock-fcntl", "udp port:{} nonblock failed, info:{}", port, get_perror());
        }

        Ok(SockUdp { port, sockfd })
    }

    pub fn get_sockfd(&self) -> ::std::os::raw::c_int {
        self.sockfd
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    // Ok(None) when nothing is pending, which is the normal case of most polls
    pub fn recvfrom(&self, buffer: &mut [u8]) -> Result<Option<(usize, PeerAddr)>, AfbError> {
        let mut source: cglue::sockaddr_in = unsafe { mem::zeroed() };
        let mut socklen = mem::size_of::<cglue::sockaddr_in>() as cglue::socklen_t;

        let count = unsafe {
            cglue::recvfrom(
                self.sockfd,
                buffer.as_mut_ptr() as *mut ::std::os::raw::c_void,
                buffer.len(),
                0,
                &mut source as *mut _ as *mut cglue::sockaddr,
                &mut socklen,
            )
        };

        if count < 0 {
            if would_block() {
                return Ok(None);
            }
            return afb_error!("chmgr-sock-recv", "recvfrom failed, info:{}", get_perror());
        }

        Ok(Some((count as usize, PeerAddr { addr: source })))
    }

    // Ok(None) on transient would-block, Ok(Some(count)) otherwise; a short
    // count means the transport truncated the datagram
    pub fn sendto(&self, data: &[u8], peer: &PeerAddr) -> Result<Option<usize>, AfbError> {
        let count = unsafe {
            cglue::sendto(
                self.sockfd,
                data.as_ptr() as *const ::std::os::raw::c_void,
                data.len(),
                0,
                &peer.addr as *const _ as *const cglue::sockaddr,
                mem::size_of::<cglue::sockaddr_in>() as cglue::socklen_t,
            )
        };

        if count < 0 {
            if would_block() {
                return Ok(None);
            }
            return afb_error!("chmgr-sock-send", "sendto {} failed, info:{}", peer, get_perror());
        }

        Ok(Some(count as usize))
    }
}

// raw 8N1 serial line toward the charge controller companion chip
pub struct TtyUart {
    device: &'static str,
    fd: ::std::os::raw::c_int,
}

impl fmt::Display for TtyUart {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!("ttyuart:{{device:{}, fd:{}}}", self.device, self.fd);
        fmt.pad(&text)
    }
}

impl TtyUart {
    pub fn open(device: &'static str, rate: u32) -> Result<TtyUart, AfbError> {
        let speed = match rate {
            9600 => cglue::CLIB_B9600,
            19200 => cglue::CLIB_B19200,
            38400 => cglue::CLIB_B38400,
            57600 => cglue::CLIB_B57600,
            115200 => cglue::CLIB_B115200,
            _ => return afb_error!("privcomm-tty-rate", "unsupported bit rate:{}", rate),
        };

        let cdev = match CString::new(device) {
            Err(_) => return afb_error!("privcomm-tty-open", "invalid device path:{}", device),
            Ok(value) => value,
        };

        let fd = unsafe {
            cglue::open(
                cdev.as_ptr(),
                cglue::CLIB_O_RDWR | cglue::CLIB_O_NOCTTY | cglue::CLIB_O_NONBLOCK,
            )
        };
        if fd < 0 {
            return afb_error!("privcomm-tty-open", "fail to open {}, info:{}", device, get_perror());
        }

        let mut tio: cglue::termios = unsafe { mem::zeroed() };
        if unsafe { cglue::tcgetattr(fd, &mut tio) } < 0 {
            unsafe { cglue::close(fd) };
            return afb_error!("privcomm-tty-attr", "tcgetattr {} failed, info:{}", device, get_perror());
        }

        // raw mode is 8 data bits, no parity, one stop bit, no flow control
        unsafe {
            cglue::cfmakeraw(&mut tio);
            cglue::cfsetispeed(&mut tio, speed);
            cglue::cfsetospeed(&mut tio, speed);
        }

        if unsafe { cglue::tcsetattr(fd, cglue::CLIB_TCSANOW, &tio) } < 0 {
            unsafe { cglue::close(fd) };
            return afb_error!("privcomm-tty-attr", "tcsetattr {} failed, info:{}", device, get_perror());
        }

        Ok(TtyUart { device, fd })
    }

    pub fn get_fd(&self) -> ::std::os::raw::c_int {
        self.fd
    }

    pub fn get_device(&self) -> &'static str {
        self.device
    }

    // Ok(None) when the line is idle (would-block) or drained
    pub fn read(&self, buffer: &mut [u8]) -> Result<Option<usize>, AfbError> {
        let count = unsafe {
            cglue::read(
                self.fd,
                buffer.as_mut_ptr() as *mut ::std::os::raw::c_void,
                buffer.len(),
            )
        };

        if count < 0 {
            if would_block() {
                return Ok(None);
            }
            return afb_error!("privcomm-tty-read", "read {} failed, info:{}", self.device, get_perror());
        }
        if count == 0 {
            return Ok(None);
        }

        Ok(Some(count as usize))
    }

    pub fn write(&self, data: &[u8]) -> Result<usize, AfbError> {
        let count = unsafe {
            cglue::write(
                self.fd,
                data.as_ptr() as *const ::std::os::raw::c_void,
                data.len(),
            )
        };

        if count < 0 {
            return afb_error!("privcomm-tty-write", "write {} failed, info:{}", self.device, get_perror());
        }

        Ok(count as usize)
    }
}
