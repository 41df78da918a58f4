//! # Event Types
//!
//! ## Purpose
//!
//! The netlink transport and the eBPF ring buffer both produce facts the
//! topology engine and the reply correlator need to react to. This module
//! defines those facts as plain tagged unions, independent of how they were
//! decoded off the wire, so `Topology`/`Correlator` can be unit tested
//! without a socket in sight.

use crate::cache::{Ifindex, NetworkId, NudState, VlanId};
use crate::ident::{Ip128, MacAddr};

/// One `RTM_NEWLINK`/`RTM_DELLINK` fact.
#[derive(Debug, Clone)]
pub struct LinkFact {
    pub ifindex: Ifindex,
    pub ifname: String,
    pub mac: MacAddr,
    pub kind: String,
    pub slave_kind: String,
    pub vlan_id: Option<VlanId>,
    pub vlan_proto: Option<u16>,
    pub link_ifindex: Option<Ifindex>,
}

/// One `RTM_NEWADDR`/`RTM_DELADDR` fact.
#[derive(Debug, Clone)]
pub struct AddrFact {
    pub ifindex: Ifindex,
    pub address: Ip128,
    pub prefixlen: u8,
}

/// One bridge FDB fact, reported as an `AF_BRIDGE` `RTM_NEWNEIGH`/
/// `RTM_DELNEIGH` message keyed by MAC rather than IP. `externally_learned`
/// mirrors the kernel's `NTF_EXT_LEARNED` flag: only entries carrying it are
/// worth caching, since those are the ones this daemon must not shadow with
/// its own neighbor entry (spec's load-bearing bridge-relay filter).
#[derive(Debug, Clone)]
pub struct FdbFact {
    pub mac: MacAddr,
    pub ifindex: Ifindex,
    pub vlan_id: VlanId,
    pub externally_learned: bool,
}

/// One kernel neighbor-table fact (`RTM_NEWNEIGH`, `AF_INET`/`AF_INET6`
/// family). `nud_state` and `externally_learned` drive the topology engine's
/// arm-timer-vs-immediate-probe decision and its bridge-relay suppression.
#[derive(Debug, Clone)]
pub struct NeighFact {
    pub ifindex: Ifindex,
    pub ip: Ip128,
    pub mac: MacAddr,
    pub nud_state: NudState,
    pub externally_learned: bool,
}

/// `AF_INET`/`AF_INET6` as carried in a ring-buffer record's `in_family`,
/// duplicated here rather than pulled in from `libc` since this crate has no
/// other reason to depend on it.
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

#[derive(Debug, Clone)]
pub enum Event {
    LinkAdd(LinkFact),
    LinkDel(Ifindex),
    AddrAdd(AddrFact),
    AddrDel(AddrFact),
    FdbAdd(FdbFact),
    FdbDel(FdbFact),
    NeighAdd(NeighFact),
    NeighDel { ifindex: Ifindex, ip: Ip128 },
}

/// One ring-buffer record produced by the eBPF classifier, mirroring
/// `neighbor_ringbuf`'s wire layout: the network the classifier matched the
/// source address against (by looking it up in `target_networks`), the VLAN
/// it arrived on, and the observed MAC/IP pair. The classifier hands back a
/// `network_id`, not an `ifindex` — the correlator resolves the owning link
/// from the `(network_id, vlan_id)` index, the same key the topology engine
/// installs a `LinkNetwork` under.
#[derive(Debug, Clone)]
pub struct RingBufferRecord {
    pub in_family: u16,
    pub vlan_id: VlanId,
    pub network_id: NetworkId,
    pub mac: MacAddr,
    pub ip: Ip128,
}
