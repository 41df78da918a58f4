//! # Sysctl Read
//!
//! ## Purpose
//!
//! Reads `base_reachable_time_ms` for a given interface and address family
//! from `/proc/sys/net/{ipv4,ipv6}/neigh/<ifname>/base_reachable_time_ms`,
//! the value the refresh scheduler's jitter calculation is based on.

use std::fs;
use std::io;

pub fn base_reachable_time_ms(ifname: &str, is_v4: bool) -> io::Result<u64> {
    let family = if is_v4 { "ipv4" } else { "ipv6" };
    let path = format!("/proc/sys/net/{family}/neigh/{ifname}/base_reachable_time_ms");
    let text = fs::read_to_string(&path)?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
