//! # Netlink Transport
//!
//! ## Purpose
//!
//! Opens the two netlink sockets this daemon needs: a request/dump socket
//! used once at startup to enumerate existing links, addresses, neighbors
//! and FDB entries (synthesized as `ADD` events so the topology engine's
//! ordinary idempotent handling populates the cache), and a monitor socket
//! joined to the standard multicast groups for live updates afterward.
//!
//! ## How it works
//!
//! Request/reply framing and the dump-then-parse loop follow the pattern
//! this workspace already uses for route/neighbor netlink access: open a
//! `NETLINK_ROUTE` socket, bind it to the kernel, send a `NLM_F_REQUEST |
//! NLM_F_DUMP` message, and walk the concatenated reply buffer one
//! `NetlinkMessage` at a time. The monitor socket instead binds to a
//! multicast group mask and is driven by the event loop via its raw fd.

use neighd_core::cache::{NudState, VlanId};
use neighd_core::events::{AddrFact, Event, FdbFact, LinkFact, NeighFact};
use neighd_core::ident::{Ip128, MacAddr};
use netlink_packet_core::{
    NetlinkDeserializable, NetlinkMessage, NetlinkPayload, NetlinkSerializable, NLM_F_CREATE,
    NLM_F_DUMP, NLM_F_REPLACE, NLM_F_REQUEST,
};
use netlink_packet_route::{
    address::{AddressAttribute, AddressMessage},
    link::{LinkAttribute, LinkMessage},
    neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourFlag, NeighbourMessage, NeighbourState},
    AddressFamily, RouteNetlinkMessage,
};
use netlink_sys::{Socket, SocketAddr};
use std::io;

/// Kernel NUD state bits (`include/uapi/linux/neighbour.h`), read back out of
/// the crate's `NeighbourState` wrapper via its `u16` conversion.
const NUD_INCOMPLETE: u16 = 0x01;
const NUD_REACHABLE: u16 = 0x02;
const NUD_STALE: u16 = 0x04;
const NUD_DELAY: u16 = 0x08;
const NUD_PROBE: u16 = 0x10;
const NUD_FAILED: u16 = 0x20;

fn nud_state_from_header(state: NeighbourState) -> NudState {
    let bits = u16::from(state);
    if bits & NUD_REACHABLE != 0 {
        NudState::Reachable
    } else if bits & NUD_STALE != 0 {
        NudState::Stale
    } else if bits & NUD_DELAY != 0 {
        NudState::Delay
    } else if bits & NUD_PROBE != 0 {
        NudState::Probe
    } else if bits & NUD_INCOMPLETE != 0 {
        NudState::Incomplete
    } else if bits & NUD_FAILED != 0 {
        NudState::Failed
    } else {
        NudState::Failed
    }
}

pub const RTNLGRP_LINK: u32 = 1;
pub const RTNLGRP_NOTIFY: u32 = 2;
pub const RTNLGRP_NEIGH: u32 = 3;
pub const RTNLGRP_IPV4_IFADDR: u32 = 5;
pub const RTNLGRP_IPV6_IFADDR: u32 = 9;

fn group_mask(groups: &[u32]) -> u32 {
    groups.iter().fold(0u32, |mask, g| mask | (1 << (g - 1)))
}

/// Sends a dump request and walks the reply buffer, handing each decoded
/// message to `f`. `f` returns the events it wants to keep, or an empty
/// `Vec` to skip a message that doesn't decode into anything interesting.
fn dump<T, F>(mut req: NetlinkMessage<T>, mut f: F) -> io::Result<Vec<Event>>
where
    T: NetlinkSerializable + NetlinkDeserializable,
    F: FnMut(NetlinkMessage<T>) -> Vec<Event>,
{
    let mut socket = Socket::new(netlink_sys::constants::NETLINK_ROUTE)?;
    socket.bind(&SocketAddr::new(0, 0))?;
    req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
    req.finalize();
    let mut send_buf = vec![0u8; req.buffer_len()];
    req.serialize(&mut send_buf);
    if socket.send(&send_buf, 0)? != send_buf.len() {
        return Err(io::Error::other("short netlink dump send"));
    }

    let mut events = Vec::new();
    loop {
        let (recv_buf, _) = socket.recv_from_full()?;
        let mut view = &recv_buf[..];
        let mut done = false;
        while !view.is_empty() {
            let msg = NetlinkMessage::<T>::deserialize(view).map_err(io::Error::other)?;
            let len = msg.header.length as usize;
            if len == 0 || len > view.len() {
                return Err(io::Error::other("malformed netlink message length"));
            }
            if matches!(msg.payload, NetlinkPayload::Done) {
                done = true;
            } else {
                events.extend(f(msg));
            }
            view = &view[len..];
        }
        if done {
            break;
        }
    }
    Ok(events)
}

pub fn dump_links() -> io::Result<Vec<Event>> {
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetLink(LinkMessage::default()));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
            decode_link(&link).map(Event::LinkAdd).into_iter().collect()
        }
        _ => Vec::new(),
    })
}

pub fn dump_addresses() -> io::Result<Vec<Event>> {
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetAddress(AddressMessage::default()));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(addr)) => {
            decode_addr(&addr).map(Event::AddrAdd).into_iter().collect()
        }
        _ => Vec::new(),
    })
}

pub fn dump_neighbors() -> io::Result<Vec<Event>> {
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default()));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh))
            if neigh.header.family != AddressFamily::Bridge =>
        {
            decode_neigh(&neigh).map(Event::NeighAdd).into_iter().collect()
        }
        _ => Vec::new(),
    })
}

/// Dumps the bridge's forwarding database, reported via the same
/// `RTM_NEWNEIGH` message family as host neighbors but with
/// `header.family == AddressFamily::Bridge` and keyed by MAC rather than IP.
pub fn dump_fdb() -> io::Result<Vec<Event>> {
    let mut msg = NeighbourMessage::default();
    msg.header.family = AddressFamily::Bridge;
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetNeighbour(msg));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh))
            if neigh.header.family == AddressFamily::Bridge =>
        {
            decode_fdb(&neigh).map(Event::FdbAdd).into_iter().collect()
        }
        _ => Vec::new(),
    })
}

/// Opens the socket the reply correlator's `NEIGH_ADD` installs are sent
/// over. A plain request/kernel-bound socket, the same as the one `dump`
/// opens per call, but kept open for the life of the daemon instead.
pub fn open_request_socket() -> io::Result<Socket> {
    let mut socket = Socket::new(netlink_sys::constants::NETLINK_ROUTE)?;
    socket.bind(&SocketAddr::new(0, 0))?;
    Ok(socket)
}

/// Sends an `RTM_NEWNEIGH` request installing/refreshing a `PERMANENT`
/// neighbor entry for `(ifindex, ip, mac)`. Fire-and-forget: no `NLM_F_ACK`
/// is requested, so there's nothing to read back on `socket`. The resulting
/// kernel broadcast on the monitor socket is what actually creates the
/// cached `Neighbor` — this call only asks the kernel to do it.
pub fn install_neighbor(socket: &Socket, ifindex: u32, ip: Ip128, mac: MacAddr) -> io::Result<()> {
    let mut msg = NeighbourMessage::default();
    msg.header.family = if ip.is_ipv4_mapped() { AddressFamily::Inet } else { AddressFamily::Inet6 };
    msg.header.ifindex = ifindex;
    msg.header.state = NeighbourState::Permanent;
    msg.attributes.push(NeighbourAttribute::Destination(match ip.to_v4() {
        Some(v4) => NeighbourAddress::Inet(v4),
        None => NeighbourAddress::Inet6(ip.to_v6()),
    }));
    msg.attributes.push(NeighbourAttribute::LinkLocalAddress(mac.octets().to_vec()));

    let mut req = NetlinkMessage::from(RouteNetlinkMessage::NewNeighbour(msg));
    req.header.flags = NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE;
    req.finalize();
    let mut buf = vec![0u8; req.buffer_len()];
    req.serialize(&mut buf);
    if socket.send(&buf, 0)? != buf.len() {
        return Err(io::Error::other("short netlink neighbor-install send"));
    }
    Ok(())
}

/// Opens and binds the multicast monitor socket. The returned `Socket`'s
/// raw fd is what the event loop registers with epoll; decoding happens in
/// `decode_monitor_message` once the loop sees it's readable.
pub fn open_monitor() -> io::Result<Socket> {
    let mut socket = Socket::new(netlink_sys::constants::NETLINK_ROUTE)?;
    let groups = group_mask(&[
        RTNLGRP_LINK,
        RTNLGRP_IPV4_IFADDR,
        RTNLGRP_IPV6_IFADDR,
        RTNLGRP_NEIGH,
        RTNLGRP_NOTIFY,
    ]);
    socket.bind(&SocketAddr::new(0, groups))?;
    Ok(socket)
}

pub fn decode_monitor_message(buf: &[u8]) -> io::Result<Vec<Event>> {
    let mut view = buf;
    let mut events = Vec::new();
    while !view.is_empty() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(view).map_err(io::Error::other)?;
        let len = msg.header.length as usize;
        if len == 0 || len > view.len() {
            break;
        }
        if let NetlinkPayload::InnerMessage(inner) = msg.payload {
            events.extend(decode_route_message(inner));
        }
        view = &view[len..];
    }
    Ok(events)
}

fn decode_route_message(inner: RouteNetlinkMessage) -> Vec<Event> {
    match inner {
        RouteNetlinkMessage::NewLink(link) => decode_link(&link).map(Event::LinkAdd).into_iter().collect(),
        RouteNetlinkMessage::DelLink(link) => vec![Event::LinkDel(link.header.index)],
        RouteNetlinkMessage::NewAddress(addr) => decode_addr(&addr).map(Event::AddrAdd).into_iter().collect(),
        RouteNetlinkMessage::DelAddress(addr) => decode_addr(&addr).map(Event::AddrDel).into_iter().collect(),
        RouteNetlinkMessage::NewNeighbour(neigh) if neigh.header.family == AddressFamily::Bridge => {
            decode_fdb(&neigh).map(Event::FdbAdd).into_iter().collect()
        }
        RouteNetlinkMessage::DelNeighbour(neigh) if neigh.header.family == AddressFamily::Bridge => {
            decode_fdb(&neigh).map(Event::FdbDel).into_iter().collect()
        }
        RouteNetlinkMessage::NewNeighbour(neigh) => {
            decode_neigh(&neigh).map(Event::NeighAdd).into_iter().collect()
        }
        RouteNetlinkMessage::DelNeighbour(neigh) => decode_neigh(&neigh)
            .map(|f| Event::NeighDel { ifindex: f.ifindex, ip: f.ip })
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_link(link: &LinkMessage) -> Option<LinkFact> {
    let mut ifname = String::new();
    let mut mac = MacAddr::ZERO;
    let mut kind = String::new();
    let mut slave_kind = String::new();

    for attr in &link.attributes {
        match attr {
            LinkAttribute::IfName(name) => ifname = name.clone(),
            LinkAttribute::Address(addr) if addr.len() == 6 => {
                mac = MacAddr::try_from(addr.as_slice()).unwrap_or(MacAddr::ZERO);
            }
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let netlink_packet_route::link::LinkInfo::Kind(k) = info {
                        kind = format!("{k:?}").to_lowercase();
                    }
                }
            }
            _ => {}
        }
    }
    Some(LinkFact {
        ifindex: link.header.index,
        ifname,
        mac,
        kind,
        slave_kind,
        vlan_id: None,
        vlan_proto: None,
        link_ifindex: None,
    })
}

fn decode_addr(addr: &AddressMessage) -> Option<AddrFact> {
    let prefixlen = addr.header.prefix_len;
    for attr in &addr.attributes {
        if let AddressAttribute::Address(a) = attr {
            let ip = match a {
                std::net::IpAddr::V4(v4) => Ip128::from_v4(*v4),
                std::net::IpAddr::V6(v6) => Ip128::from_v6(*v6),
            };
            return Some(AddrFact {
                ifindex: addr.header.index,
                address: ip,
                prefixlen,
            });
        }
    }
    None
}

fn decode_neigh(neigh: &NeighbourMessage) -> Option<NeighFact> {
    let mut ip: Option<Ip128> = None;
    let mut mac: Option<MacAddr> = None;
    for attr in &neigh.attributes {
        match attr {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => {
                ip = Some(Ip128::from_v4(*v4));
            }
            NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => {
                ip = Some(Ip128::from_v6(*v6));
            }
            NeighbourAttribute::LinkLocalAddress(m) if m.len() == 6 => {
                mac = MacAddr::try_from(m.as_slice()).ok();
            }
            _ => {}
        }
    }
    Some(NeighFact {
        ifindex: neigh.header.ifindex,
        ip: ip?,
        mac: mac?,
        nud_state: nud_state_from_header(neigh.header.state),
        externally_learned: neigh.header.flags.contains(&NeighbourFlag::ExtLearned),
    })
}

/// Decodes an `AF_BRIDGE` neighbour message into an FDB fact. These carry a
/// MAC in `LinkLocalAddress` rather than an IP in `Destination`, and the
/// VLAN the entry was learned on in the `Vlan` attribute (absent for
/// untagged ports, which this daemon treats as VLAN 0).
fn decode_fdb(neigh: &NeighbourMessage) -> Option<FdbFact> {
    let mut mac: Option<MacAddr> = None;
    let mut vlan_id: VlanId = 0;
    for attr in &neigh.attributes {
        match attr {
            NeighbourAttribute::LinkLocalAddress(m) if m.len() == 6 => {
                mac = MacAddr::try_from(m.as_slice()).ok();
            }
            NeighbourAttribute::Vlan(v) => vlan_id = *v,
            _ => {}
        }
    }
    Some(FdbFact {
        mac: mac?,
        ifindex: neigh.header.ifindex,
        vlan_id,
        externally_learned: neigh.header.flags.contains(&NeighbourFlag::ExtLearned),
    })
}
