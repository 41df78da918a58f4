//! # Raw L2 Send
//!
//! ## Purpose
//!
//! Sends a fully-built Ethernet frame (ARP request or IPv6 Neighbor
//! Solicitation, built by `neighd_core::packet`) out a given interface via
//! `AF_PACKET/SOCK_RAW`. One socket per process is bound generically and
//! addressed per-send with `sockaddr_ll`, rather than reopening a socket
//! per probe.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

const ETH_ALEN: usize = 6;

pub struct L2Socket {
    fd: OwnedFd,
}

impl L2Socket {
    pub fn new() -> io::Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(L2Socket {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Sends `frame` (already including the Ethernet header) out `ifindex`.
    pub fn send_on(&self, ifindex: u32, frame: &[u8]) -> io::Result<()> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_ifindex = ifindex as i32;
        addr.sll_halen = ETH_ALEN as u8;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();

        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        if sent as usize != frame.len() {
            return Err(io::Error::other("short write on raw L2 send"));
        }
        Ok(())
    }
}
