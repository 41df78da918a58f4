//! # Probe Packet Construction
//!
//! ## Purpose
//!
//! Builds the two packet types the refresh scheduler sends to re-learn a
//! neighbor's MAC address: an Ethernet+ARP request for IPv4 targets, and an
//! Ethernet+IPv6+ICMPv6 Neighbor Solicitation (RFC 4861) for IPv6 targets.
//!
//! ## How it works
//!
//! Both frames are assembled by hand into a growable buffer through a small
//! `io::Write` adapter, the same spirit as the array-backed writer this
//! codebase uses elsewhere for header construction, since ARP has no IP
//! layer at all and the NS's ICMPv6 next-header/option bytes sit outside
//! what a generic IP/transport packet builder emits. The ICMPv6 checksum is
//! computed over the RFC 2460 pseudo-header.

use crate::ident::{Ip128, MacAddr};
use std::io;

const ETH_P_ARP: u16 = 0x0806;
const ETH_P_IPV6: u16 = 0x86dd;
const ARP_HTYPE_ETHER: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const IPPROTO_ICMPV6: u8 = 58;
const ICMPV6_NEIGHBOR_SOLICITATION: u8 = 135;

/// Writer adapter for a growable buffer, mirroring the array-backed writer
/// used for the UDP header elsewhere in this codebase.
struct HdrWrite<'a>(&'a mut Vec<u8>);

impl io::Write for HdrWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_ethernet_header(w: &mut HdrWrite, dst: MacAddr, src: MacAddr, ethertype: u16) {
    use io::Write;
    w.write_all(&dst.octets()).unwrap();
    w.write_all(&src.octets()).unwrap();
    w.write_all(&ethertype.to_be_bytes()).unwrap();
}

/// Builds a complete Ethernet II + ARP request frame asking who has
/// `target_ip`, sent from `src_mac`/`src_ip` directly to `target_mac`. This is
/// a directed refresh probe, not classical broadcast resolution: the MAC is
/// already cached, only its continued reachability is in question.
pub fn build_arp_request(src_mac: MacAddr, src_ip: Ip128, target_mac: MacAddr, target_ip: Ip128) -> Vec<u8> {
    use io::Write;
    let src_v4 = src_ip.to_v4().expect("build_arp_request requires an IPv4 source");
    let target_v4 = target_ip
        .to_v4()
        .expect("build_arp_request requires an IPv4 target");

    let mut frame = Vec::with_capacity(14 + 28);
    let mut w = HdrWrite(&mut frame);
    write_ethernet_header(&mut w, target_mac, src_mac, ETH_P_ARP);

    w.write_all(&ARP_HTYPE_ETHER.to_be_bytes()).unwrap();
    w.write_all(&ARP_PTYPE_IPV4.to_be_bytes()).unwrap();
    w.write_all(&[6, 4]).unwrap(); // hardware/protocol address lengths
    w.write_all(&ARP_OP_REQUEST.to_be_bytes()).unwrap();
    w.write_all(&src_mac.octets()).unwrap();
    w.write_all(&src_v4.octets()).unwrap();
    w.write_all(&target_mac.octets()).unwrap();
    w.write_all(&target_v4.octets()).unwrap();
    frame
}

/// Builds a complete Ethernet II + IPv6 + ICMPv6 Neighbor Solicitation frame
/// (RFC 4861 §4.3) for `target_ip`, sent from `src_mac`/`src_ip` directly to
/// `target_mac`/`target_ip` — unicast in both the Ethernet and IPv6
/// destination fields, since this is a refresh probe against an address
/// already in the cache rather than first-time resolution via the
/// solicited-node multicast group.
pub fn build_neighbor_solicitation(src_mac: MacAddr, src_ip: Ip128, target_mac: MacAddr, target_ip: Ip128) -> Vec<u8> {
    use io::Write;
    let src_v6 = src_ip.to_v6();
    let target_v6 = target_ip.to_v6();

    // ICMPv6 body: type(1) code(1) checksum(2) reserved(4) target(16) + SLL option(8)
    let mut icmp = Vec::with_capacity(8 + 16 + 8);
    icmp.push(ICMPV6_NEIGHBOR_SOLICITATION);
    icmp.push(0); // code
    icmp.extend_from_slice(&[0u8, 0]); // checksum placeholder
    icmp.extend_from_slice(&[0u8; 4]); // reserved
    icmp.extend_from_slice(&target_v6.octets());
    icmp.push(1); // option type: Source Link-Layer Address
    icmp.push(1); // option length, in units of 8 octets
    icmp.extend_from_slice(&src_mac.octets());

    let checksum = icmpv6_checksum(&src_v6, &target_v6, &icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    let mut frame = Vec::with_capacity(14 + 40 + icmp.len());
    let mut w = HdrWrite(&mut frame);
    write_ethernet_header(&mut w, target_mac, src_mac, ETH_P_IPV6);

    // IPv6 fixed header, RFC 8200 §3.
    let version_tc_flow: u32 = 6 << 28;
    w.write_all(&version_tc_flow.to_be_bytes()).unwrap();
    w.write_all(&(icmp.len() as u16).to_be_bytes()).unwrap(); // payload length
    w.write_all(&[IPPROTO_ICMPV6]).unwrap(); // next header
    w.write_all(&[255]).unwrap(); // hop limit, required 255 for NDP
    w.write_all(&src_v6.octets()).unwrap();
    w.write_all(&target_v6.octets()).unwrap();

    frame.extend_from_slice(&icmp);
    frame
}

/// RFC 2460 §8.1 pseudo-header checksum over an ICMPv6 message. `icmp`'s own
/// checksum field may be zero or already populated; this function treats
/// whatever is there as payload, so callers zero it first when computing
/// and can pass the final bytes back in when verifying.
fn icmpv6_checksum(src: &std::net::Ipv6Addr, dst: &std::net::Ipv6Addr, icmp: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in src.octets().chunks(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    for chunk in dst.octets().chunks(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    sum += icmp.len() as u32;
    sum += IPPROTO_ICMPV6 as u32;
    let mut iter = icmp.chunks_exact(2);
    for chunk in &mut iter {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = *iter.remainder() {
        sum += u16::from_be_bytes([last, 0]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn arp_request_is_directed_and_well_formed() {
        let src_mac = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let target_mac = MacAddr([0x02, 0, 0, 0, 0, 2]);
        let src_ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1));
        let target_ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 2));
        let frame = build_arp_request(src_mac, src_ip, target_mac, target_ip);
        assert_eq!(&frame[0..6], &target_mac.octets());
        assert_eq!(&frame[6..12], &src_mac.octets());
        assert_eq!(&frame[12..14], &ETH_P_ARP.to_be_bytes());
        let arp = &frame[14..];
        assert_eq!(&arp[6..8], &ARP_OP_REQUEST.to_be_bytes());
        assert_eq!(&arp[8..14], &src_mac.octets());
        assert_eq!(&arp[18..24], &target_mac.octets());
        assert_eq!(&arp[24..28], &[10, 0, 0, 2]);
    }

    #[test]
    fn neighbor_solicitation_is_unicast_and_hop_limit_is_255() {
        let src_mac = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let target_mac = MacAddr([0x02, 0, 0, 0, 0, 2]);
        let src_ip = Ip128::from_v6("fe80::1".parse().unwrap());
        let target_ip = Ip128::from_v6("fe80::2".parse().unwrap());
        let frame = build_neighbor_solicitation(src_mac, src_ip, target_mac, target_ip);
        assert_eq!(&frame[0..6], &target_mac.octets());
        assert_eq!(frame[14 + 7], 255); // hop limit
        assert_eq!(frame[14 + 6], IPPROTO_ICMPV6);
        assert_eq!(&frame[14 + 24..14 + 40], &target_ip.to_v6().octets()); // IPv6 dst
        let icmp = &frame[14 + 40..];
        assert_eq!(icmp[0], ICMPV6_NEIGHBOR_SOLICITATION);
        assert_eq!(&icmp[8..24], &target_ip.to_v6().octets());
        assert_eq!(icmp[24], 1); // SLL option type
        assert_eq!(&icmp[26..32], &src_mac.octets());
    }

    #[test]
    fn neighbor_solicitation_checksum_verifies_against_pseudo_header() {
        let src_mac = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let target_mac = MacAddr([0x02, 0, 0, 0, 0, 2]);
        let src_ip = Ip128::from_v6("fe80::1".parse().unwrap());
        let target_ip = Ip128::from_v6("fe80::2".parse().unwrap());
        let frame = build_neighbor_solicitation(src_mac, src_ip, target_mac, target_ip);
        let icmp = &frame[14 + 40..];
        let checksum = u16::from_be_bytes([icmp[2], icmp[3]]);
        assert_ne!(checksum, 0);

        let mut zeroed = icmp.to_vec();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let recomputed = icmpv6_checksum(&src_ip.to_v6(), &target_ip.to_v6(), &zeroed);
        assert_eq!(recomputed, checksum);
    }
}
