//! # Cache Entities
//!
//! ## Purpose
//!
//! Plain data records for the five entities the topology cache tracks. Cyclic
//! ownership (Link <-> LinkNetwork <-> Network) is modeled by key, not by
//! handle: a `Link` remembers the `LinkNetworkId`s it owns, a `Network`
//! remembers the same, and both are resolved back through the owning
//! `HashMap<LinkNetworkId, LinkNetwork>` in `Cache`. No entity holds a
//! reference to another; everything is an integer or a byte-exact key.

use crate::ident::{Ip128, MacAddr};
use std::time::SystemTime;

pub type Ifindex = u32;
pub type NetworkId = u32;
pub type VlanId = u16;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LinkNetworkId(pub u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FdbKey {
    pub mac: MacAddr,
    pub ifindex: Ifindex,
    pub vlan_id: VlanId,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NeighKey {
    pub ifindex: Ifindex,
    pub ip: Ip128,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub ifindex: Ifindex,
    pub ifname: String,
    pub mac: MacAddr,
    pub kind: String,
    pub slave_kind: String,
    pub vlan_id: Option<VlanId>,
    pub vlan_proto: Option<u16>,
    pub has_vlan: bool,
    pub is_macvlan: bool,
    pub is_svi: bool,
    pub ignore_link: bool,
    pub link_ifindex: Option<Ifindex>,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub referenced: SystemTime,
    pub reference_count: u64,
    pub network_list: Vec<LinkNetworkId>,
    pub fdb_list: Vec<FdbKey>,
}

impl Link {
    pub fn debug_label(&self) -> String {
        format!("if:{}#{}", self.ifname, self.ifindex)
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    pub id: NetworkId,
    /// Canonical network address (already masked), 128-bit with IPv4-mapped
    /// encoding for v4 networks.
    pub address: Ip128,
    /// Advertised prefix length (0-32 for v4, 0-128 for v6).
    pub prefixlen: u8,
    /// Distinguishes /32 or /128 host routes from real subnets.
    pub true_prefixlen: u8,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub referenced: SystemTime,
    pub reference_count: u64,
    pub links: Vec<LinkNetworkId>,
}

impl Network {
    pub fn refcnt(&self) -> usize {
        self.links.len()
    }

    pub fn debug_label(&self) -> String {
        format!("net:{}/{}", self.id, self.prefixlen)
    }

    /// True iff `ip` (already 128-bit canonical) belongs to this network,
    /// i.e. masking it to this network's advertised prefix reproduces the
    /// network's own canonical address.
    pub fn contains(&self, ip: Ip128, full_prefixlen: u8) -> bool {
        ip.mask(full_prefixlen) == self.address
    }
}

#[derive(Debug, Clone)]
pub struct LinkNetwork {
    pub id: LinkNetworkId,
    pub link_ifindex: Ifindex,
    pub network_id: NetworkId,
    pub vlan_id: VlanId,
    /// The local IP the SVI owns on this network (source address for probes).
    pub local_ip: Ip128,
}

#[derive(Debug, Clone)]
pub struct Fdb {
    pub mac: MacAddr,
    pub ifindex: Ifindex,
    pub vlan_id: VlanId,
    pub link_ifindex: Ifindex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudState {
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSlot {
    Idle,
    Armed { timer_id: u64 },
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: u64,
    pub ifindex: Ifindex,
    pub mac: MacAddr,
    pub ip: Ip128,
    pub nud_state: NudState,
    pub sending_link_network: LinkNetworkId,
    pub timer: TimerSlot,
    pub update_count: u64,
    pub reference_count: u64,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub referenced: SystemTime,
}

impl Neighbor {
    pub fn debug_label(&self) -> String {
        format!("neigh:{}@{}", self.ip, self.ifindex)
    }
}
