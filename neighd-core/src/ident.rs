//! # Identifier Helpers
//!
//! ## Purpose
//!
//! Small, dependency-light helpers shared by every other module: MAC address
//! formatting, canonical 128-bit IP storage (IPv4 is always carried as an
//! IPv4-mapped IPv6 address so the rest of the cache never branches on
//! family), CIDR masking, and byte-exact equality.
//!
//! ## How it works
//!
//! `Ip128` wraps the 16-byte form the kernel and the eBPF side both use for
//! addresses. `mask()` zeroes every bit beyond `prefixlen`, which is how the
//! topology engine computes a canonical network address from an advertised
//! address, and how it decides whether a neighbor's IP belongs to a cached
//! network.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A 6-byte hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(b: [u8; 6]) -> Self {
        MacAddr(b)
    }
}

impl TryFrom<&[u8]> for MacAddr {
    type Error = ();
    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        if b.len() != 6 {
            return Err(());
        }
        let mut out = [0u8; 6];
        out.copy_from_slice(b);
        Ok(MacAddr(out))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Canonical 128-bit address storage. IPv4 addresses are stored IPv4-mapped
/// (`::ffff:a.b.c.d`) so every index keyed on "an address" hashes the same
/// 16 bytes regardless of family.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ip128(pub [u8; 16]);

impl Ip128 {
    pub fn from_v4(ip: Ipv4Addr) -> Self {
        Ip128(ip.to_ipv6_mapped().octets())
    }

    pub fn from_v6(ip: Ipv6Addr) -> Self {
        Ip128(ip.octets())
    }

    /// True if these 16 bytes encode an IPv4-mapped address
    /// (`::ffff:0:0/96`).
    pub fn is_ipv4_mapped(&self) -> bool {
        self.0[..10] == [0u8; 10] && self.0[10] == 0xff && self.0[11] == 0xff
    }

    pub fn to_v4(&self) -> Option<Ipv4Addr> {
        if self.is_ipv4_mapped() {
            Some(Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15]))
        } else {
            None
        }
    }

    pub fn to_v6(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }

    pub fn is_ipv6_link_local(&self) -> bool {
        !self.is_ipv4_mapped() && self.0[0] == 0xfe && (self.0[1] & 0xc0) == 0x80
    }

    /// Zeroes every bit beyond `prefixlen`. For IPv4-mapped addresses,
    /// `prefixlen` is interpreted against the full 128-bit form, i.e. the
    /// caller must pass `advertised_prefixlen + 96`. `true_prefixlen_v4` and
    /// `true_prefixlen_v6` convert the advertised length to the 128-bit form
    /// used here.
    pub fn mask(&self, prefixlen: u8) -> Ip128 {
        let prefixlen = prefixlen.min(128) as usize;
        let mut out = self.0;
        let full_bytes = prefixlen / 8;
        let rem_bits = prefixlen % 8;
        if full_bytes < 16 {
            if rem_bits != 0 {
                let keep_mask = 0xffu8 << (8 - rem_bits);
                out[full_bytes] &= keep_mask;
            } else if full_bytes == 16 {
                // whole address kept
            }
            for b in out.iter_mut().skip(full_bytes + if rem_bits != 0 { 1 } else { 0 }) {
                *b = 0;
            }
        }
        Ip128(out)
    }
}

impl fmt::Display for Ip128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_v4() {
            Some(v4) => write!(f, "{v4}"),
            None => write!(f, "{}", self.to_v6()),
        }
    }
}

impl fmt::Debug for Ip128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Converts an advertised CIDR prefix length (0-32 for IPv4, 0-128 for IPv6)
/// into the 128-bit form `Ip128::mask` expects.
pub fn full_prefixlen(advertised: u8, is_v4: bool) -> u8 {
    if is_v4 {
        96 + advertised.min(32)
    } else {
        advertised.min(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formats_lowercase_colon_hex() {
        let mac = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x05]);
        assert_eq!(mac.to_string(), "02:00:00:00:00:05");
    }

    #[test]
    fn mac_zero_detection() {
        assert!(MacAddr::ZERO.is_zero());
        assert!(!MacAddr([1, 0, 0, 0, 0, 0]).is_zero());
    }

    #[test]
    fn ipv4_mapped_roundtrip() {
        let v4 = Ipv4Addr::new(10, 0, 0, 5);
        let ip = Ip128::from_v4(v4);
        assert!(ip.is_ipv4_mapped());
        assert_eq!(ip.to_v4(), Some(v4));
        assert_eq!(ip.to_string(), "10.0.0.5");
    }

    #[test]
    fn ipv6_link_local_detection() {
        let ll = Ip128::from_v6("fe80::1".parse().unwrap());
        assert!(ll.is_ipv6_link_local());
        let global = Ip128::from_v6("2001:db8::1".parse().unwrap());
        assert!(!global.is_ipv6_link_local());
        let v4 = Ip128::from_v4(Ipv4Addr::new(1, 2, 3, 4));
        assert!(!v4.is_ipv6_link_local());
    }

    #[test]
    fn mask_v4_slash_24() {
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let pl = full_prefixlen(24, true);
        assert_eq!(pl, 120);
        let masked = ip.mask(pl);
        assert_eq!(masked.to_v4(), Some(Ipv4Addr::new(10, 0, 0, 0)));
    }

    #[test]
    fn mask_v4_non_byte_boundary() {
        // 10.0.0.130/25 -> network 10.0.0.128
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 130));
        let masked = ip.mask(full_prefixlen(25, true));
        assert_eq!(masked.to_v4(), Some(Ipv4Addr::new(10, 0, 0, 128)));
    }

    #[test]
    fn mask_v6_slash_64() {
        let ip = Ip128::from_v6("2001:db8:1:2::abcd".parse().unwrap());
        let masked = ip.mask(full_prefixlen(64, false));
        assert_eq!(masked.to_v6(), "2001:db8:1:2::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn host_route_prefix_is_full_width() {
        let ip = Ip128::from_v4(Ipv4Addr::new(192, 168, 1, 1));
        let masked = ip.mask(full_prefixlen(32, true));
        assert_eq!(masked, ip);
    }
}
