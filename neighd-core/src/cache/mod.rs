//! # Topology Cache
//!
//! ## Purpose
//!
//! Owns the five entity tables (`links`, `networks`, `linknets`, `fdb`,
//! `neigh`) and the four non-owning lookup indices built on top of them.
//! Every mutation goes through `Cache` so that the cross-index invariants
//! (spec §3/§8) hold after every call returns: no dangling `LinkNetworkId`,
//! no two `Network`s sharing a canonical address, `Network::refcnt()` always
//! equal to `links.len()`.
//!
//! ## How it works
//!
//! Ownership cycles (a `Link` belongs to many `Network`s through
//! `LinkNetwork`, a `Network` belongs to many `Link`s the same way) are
//! modeled with keys rather than handles: `LinkNetworkId` is the only
//! genuinely owning key for `LinkNetwork` (it has no natural unique key of
//! its own), and both `Link` and `Network` hold `Vec<LinkNetworkId>` back
//! into the single owning `linknets` table. Nothing here uses `Rc`/`RefCell`.

mod entities;

pub use entities::*;

use crate::clock::Clock;
use crate::ident::Ip128;
use std::collections::HashMap;

#[derive(Debug)]
pub struct Cache {
    links: HashMap<Ifindex, Link>,
    networks: HashMap<NetworkId, Network>,
    linknets: HashMap<LinkNetworkId, LinkNetwork>,
    fdb: HashMap<FdbKey, Fdb>,
    neigh: HashMap<NeighKey, Neighbor>,

    network_by_addr: HashMap<Ip128, NetworkId>,
    linknet_by_net_vlan: HashMap<(NetworkId, VlanId), LinkNetworkId>,
    linknet_by_ip_ifindex: HashMap<(Ip128, Ifindex), LinkNetworkId>,

    next_network_id: NetworkId,
    next_linknet_id: u64,
    next_neigh_id: u64,

    pub has_links: bool,
    pub has_networks: bool,
    pub has_fdb: bool,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            links: HashMap::new(),
            networks: HashMap::new(),
            linknets: HashMap::new(),
            fdb: HashMap::new(),
            neigh: HashMap::new(),
            network_by_addr: HashMap::new(),
            linknet_by_net_vlan: HashMap::new(),
            linknet_by_ip_ifindex: HashMap::new(),
            next_network_id: 1,
            next_linknet_id: 1,
            next_neigh_id: 1,
            has_links: false,
            has_networks: false,
            has_fdb: false,
        }
    }

    // ---- Link -----------------------------------------------------------

    pub fn link(&self, ifindex: Ifindex) -> Option<&Link> {
        self.links.get(&ifindex)
    }

    pub fn link_mut(&mut self, ifindex: Ifindex) -> Option<&mut Link> {
        self.links.get_mut(&ifindex)
    }

    /// Looks up a link and, on hit, bumps its usage stamps using `clock`.
    /// A clock read failure degrades the lookup to a miss.
    pub fn touch_link(&mut self, ifindex: Ifindex, clock: &dyn Clock) -> Option<&Link> {
        let now = clock.now()?;
        let link = self.links.get_mut(&ifindex)?;
        link.referenced = now;
        link.reference_count += 1;
        Some(&*link)
    }

    pub fn insert_link(&mut self, link: Link) {
        self.links.insert(link.ifindex, link);
        self.has_links = !self.links.is_empty();
    }

    /// Removes a link along with every `LinkNetwork` and FDB entry that
    /// referenced it, keeping `Network::refcnt()` correct. Idempotent:
    /// removing a link that isn't cached is a no-op, not an error.
    pub fn remove_link(&mut self, ifindex: Ifindex) -> Option<Link> {
        let link = self.links.remove(&ifindex)?;
        for lnid in link.network_list.clone() {
            self.remove_linknet(lnid);
        }
        let fdb_keys = link.fdb_list.clone();
        for key in fdb_keys {
            self.fdb.remove(&key);
        }
        self.has_links = !self.links.is_empty();
        Some(link)
    }

    pub fn links_iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    // ---- Network ----------------------------------------------------------

    pub fn network(&self, id: NetworkId) -> Option<&Network> {
        self.networks.get(&id)
    }

    pub fn network_by_addr(&self, addr: Ip128) -> Option<&Network> {
        let id = *self.network_by_addr.get(&addr)?;
        self.networks.get(&id)
    }

    pub fn touch_network(&mut self, id: NetworkId, clock: &dyn Clock) -> Option<&Network> {
        let now = clock.now()?;
        let net = self.networks.get_mut(&id)?;
        net.referenced = now;
        net.reference_count += 1;
        Some(&*net)
    }

    /// Finds an existing network by canonical address, or creates one,
    /// returning its id either way. Enforces "no two Networks share the
    /// same canonical network address".
    pub fn get_or_create_network(
        &mut self,
        address: Ip128,
        prefixlen: u8,
        true_prefixlen: u8,
        clock: &dyn Clock,
    ) -> NetworkId {
        if let Some(&id) = self.network_by_addr.get(&address) {
            return id;
        }
        let now = clock.now().unwrap_or(std::time::UNIX_EPOCH);
        let id = self.next_network_id;
        self.next_network_id += 1;
        self.networks.insert(
            id,
            Network {
                id,
                address,
                prefixlen,
                true_prefixlen,
                created: now,
                updated: now,
                referenced: now,
                reference_count: 0,
                links: Vec::new(),
            },
        );
        self.network_by_addr.insert(address, id);
        self.has_networks = !self.networks.is_empty();
        id
    }

    /// Removes a network and every `LinkNetwork` that belongs to it.
    /// Idempotent.
    pub fn remove_network(&mut self, id: NetworkId) -> Option<Network> {
        let net = self.networks.remove(&id)?;
        self.network_by_addr.remove(&net.address);
        for lnid in net.links.clone() {
            self.remove_linknet(lnid);
        }
        self.has_networks = !self.networks.is_empty();
        Some(net)
    }

    pub fn networks_iter(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    // ---- LinkNetwork --------------------------------------------------

    pub fn linknet(&self, id: LinkNetworkId) -> Option<&LinkNetwork> {
        self.linknets.get(&id)
    }

    pub fn linknet_by_net_vlan(&self, network_id: NetworkId, vlan_id: VlanId) -> Option<&LinkNetwork> {
        let id = *self.linknet_by_net_vlan.get(&(network_id, vlan_id))?;
        self.linknets.get(&id)
    }

    pub fn linknet_by_ip_ifindex(&self, ip: Ip128, ifindex: Ifindex) -> Option<&LinkNetwork> {
        let id = *self.linknet_by_ip_ifindex.get(&(ip, ifindex))?;
        self.linknets.get(&id)
    }

    /// Creates a `LinkNetwork` joining an existing link and network, wiring
    /// both owning back-reference lists and both non-owning indices. The
    /// caller (topology engine) is responsible for having already resolved
    /// or created `link_ifindex`/`network_id`.
    pub fn insert_linknet(
        &mut self,
        link_ifindex: Ifindex,
        network_id: NetworkId,
        vlan_id: VlanId,
        local_ip: Ip128,
    ) -> LinkNetworkId {
        let id = LinkNetworkId(self.next_linknet_id);
        self.next_linknet_id += 1;
        self.linknets.insert(
            id,
            LinkNetwork {
                id,
                link_ifindex,
                network_id,
                vlan_id,
                local_ip,
            },
        );
        self.linknet_by_net_vlan.insert((network_id, vlan_id), id);
        self.linknet_by_ip_ifindex.insert((local_ip, link_ifindex), id);
        if let Some(link) = self.links.get_mut(&link_ifindex) {
            link.network_list.push(id);
        }
        if let Some(net) = self.networks.get_mut(&network_id) {
            net.links.push(id);
        }
        id
    }

    /// Removes a `LinkNetwork` and unwinds both back-reference lists and
    /// both non-owning indices. Idempotent.
    pub fn remove_linknet(&mut self, id: LinkNetworkId) -> Option<LinkNetwork> {
        let ln = self.linknets.remove(&id)?;
        self.linknet_by_net_vlan.remove(&(ln.network_id, ln.vlan_id));
        self.linknet_by_ip_ifindex.remove(&(ln.local_ip, ln.link_ifindex));
        if let Some(link) = self.links.get_mut(&ln.link_ifindex) {
            link.network_list.retain(|&x| x != id);
        }
        if let Some(net) = self.networks.get_mut(&ln.network_id) {
            net.links.retain(|&x| x != id);
        }
        Some(ln)
    }

    // ---- FDB ------------------------------------------------------------

    pub fn fdb(&self, key: &FdbKey) -> Option<&Fdb> {
        self.fdb.get(key)
    }

    pub fn insert_fdb(&mut self, entry: Fdb) {
        let key = FdbKey {
            mac: entry.mac,
            ifindex: entry.ifindex,
            vlan_id: entry.vlan_id,
        };
        if let Some(link) = self.links.get_mut(&entry.link_ifindex) {
            if !link.fdb_list.contains(&key) {
                link.fdb_list.push(key);
            }
        }
        self.fdb.insert(key, entry);
        self.has_fdb = !self.fdb.is_empty();
    }

    pub fn remove_fdb(&mut self, key: &FdbKey) -> Option<Fdb> {
        let entry = self.fdb.remove(key)?;
        if let Some(link) = self.links.get_mut(&entry.link_ifindex) {
            link.fdb_list.retain(|k| k != key);
        }
        self.has_fdb = !self.fdb.is_empty();
        Some(entry)
    }

    /// True if some MAC is reachable on `ifindex`/`vlan_id` via the bridge
    /// forwarding database, i.e. it was learned from the wire rather than
    /// being the SVI's own address. Used to suppress probing addresses the
    /// bridge already relays externally.
    pub fn fdb_has_mac(&self, mac: crate::ident::MacAddr, ifindex: Ifindex, vlan_id: VlanId) -> bool {
        self.fdb.contains_key(&FdbKey { mac, ifindex, vlan_id })
    }

    // ---- Neighbor ---------------------------------------------------------

    pub fn neighbor(&self, ifindex: Ifindex, ip: Ip128) -> Option<&Neighbor> {
        self.neigh.get(&NeighKey { ifindex, ip })
    }

    pub fn neighbor_mut(&mut self, ifindex: Ifindex, ip: Ip128) -> Option<&mut Neighbor> {
        self.neigh.get_mut(&NeighKey { ifindex, ip })
    }

    pub fn touch_neighbor(&mut self, ifindex: Ifindex, ip: Ip128, clock: &dyn Clock) -> Option<&Neighbor> {
        let now = clock.now()?;
        let n = self.neigh.get_mut(&NeighKey { ifindex, ip })?;
        n.referenced = now;
        n.reference_count += 1;
        Some(&*n)
    }

    pub fn insert_neighbor(&mut self, mut n: Neighbor) -> &Neighbor {
        let key = NeighKey { ifindex: n.ifindex, ip: n.ip };
        n.id = self.next_neigh_id;
        self.next_neigh_id += 1;
        self.neigh.insert(key, n);
        &self.neigh[&key]
    }

    pub fn remove_neighbor(&mut self, ifindex: Ifindex, ip: Ip128) -> Option<Neighbor> {
        self.neigh.remove(&NeighKey { ifindex, ip })
    }

    pub fn neighbors_iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neigh.values()
    }

    pub fn neighbors_for_link(&self, ifindex: Ifindex) -> impl Iterator<Item = &Neighbor> {
        self.neigh.values().filter(move |n| n.ifindex == ifindex)
    }

    /// True once all three readiness gates have fired: the initial link,
    /// network and FDB dumps have each completed at least once. A quiet
    /// segment with zero externally-learned FDB entries at boot must still
    /// become ready, so these gates are latched explicitly by
    /// `mark_*_ready` rather than inferred from table occupancy.
    pub fn is_ready(&self) -> bool {
        self.has_links && self.has_networks && self.has_fdb
    }

    /// Latches the link-dump-complete gate. Idempotent; safe to call once
    /// the initial `RTM_GETLINK` dump has been fully applied, regardless of
    /// whether any link was actually inserted.
    pub fn mark_links_ready(&mut self) {
        self.has_links = true;
    }

    /// Latches the network-dump-complete gate, i.e. the initial
    /// `RTM_GETADDR` dump on monitored SVIs has been fully applied.
    pub fn mark_networks_ready(&mut self) {
        self.has_networks = true;
    }

    /// Latches the FDB-dump-complete gate, i.e. the initial `AF_BRIDGE`
    /// `RTM_GETNEIGH` dump has been fully applied — even if it yielded zero
    /// externally-learned entries.
    pub fn mark_fdb_ready(&mut self) {
        self.has_fdb = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ident::{Ip128, MacAddr};
    use std::net::Ipv4Addr;

    fn mk_link(ifindex: Ifindex) -> Link {
        let now = std::time::SystemTime::now();
        Link {
            ifindex,
            ifname: format!("eth{ifindex}"),
            mac: MacAddr([0, 0, 0, 0, 0, ifindex as u8]),
            kind: String::new(),
            slave_kind: String::new(),
            vlan_id: None,
            vlan_proto: None,
            has_vlan: false,
            is_macvlan: false,
            is_svi: true,
            ignore_link: false,
            link_ifindex: None,
            created: now,
            updated: now,
            referenced: now,
            reference_count: 0,
            network_list: Vec::new(),
            fdb_list: Vec::new(),
        }
    }

    #[test]
    fn network_dedup_by_canonical_address() {
        let mut c = Cache::new();
        let clock = SystemClock;
        let addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 0));
        let id1 = c.get_or_create_network(addr, 24, 24, &clock);
        let id2 = c.get_or_create_network(addr, 24, 24, &clock);
        assert_eq!(id1, id2);
        assert_eq!(c.networks_iter().count(), 1);
    }

    #[test]
    fn linknet_refcnt_matches_network_links_len() {
        let mut c = Cache::new();
        let clock = SystemClock;
        c.insert_link(mk_link(2));
        c.insert_link(mk_link(3));
        let addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 0));
        let net_id = c.get_or_create_network(addr, 24, 24, &clock);
        c.insert_linknet(2, net_id, 0, Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)));
        c.insert_linknet(3, net_id, 0, Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(c.network(net_id).unwrap().refcnt(), 2);
    }

    #[test]
    fn removing_link_unwinds_linknets_and_fdb() {
        let mut c = Cache::new();
        let clock = SystemClock;
        c.insert_link(mk_link(2));
        let addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 0));
        let net_id = c.get_or_create_network(addr, 24, 24, &clock);
        let lnid = c.insert_linknet(2, net_id, 0, Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)));
        c.insert_fdb(Fdb {
            mac: MacAddr([1, 2, 3, 4, 5, 6]),
            ifindex: 2,
            vlan_id: 0,
            link_ifindex: 2,
        });

        c.remove_link(2);

        assert!(c.linknet(lnid).is_none());
        assert_eq!(c.network(net_id).unwrap().refcnt(), 0);
        assert!(!c.has_fdb);
        assert!(!c.has_links);
    }

    #[test]
    fn removing_unknown_link_is_idempotent() {
        let mut c = Cache::new();
        assert!(c.remove_link(99).is_none());
    }

    #[test]
    fn clock_failure_degrades_lookup_to_miss() {
        use crate::clock::FailingClock;
        let mut c = Cache::new();
        c.insert_link(mk_link(2));
        let failing = FailingClock;
        assert!(c.touch_link(2, &failing).is_none());
        // entry still present, just not touched
        assert!(c.link(2).is_some());
    }

    #[test]
    fn readiness_gates_require_all_three() {
        let mut c = Cache::new();
        let clock = SystemClock;
        assert!(!c.is_ready());
        c.insert_link(mk_link(2));
        assert!(!c.is_ready());
        let addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 0));
        c.get_or_create_network(addr, 24, 24, &clock);
        assert!(!c.is_ready());
        c.insert_fdb(Fdb {
            mac: MacAddr([1, 2, 3, 4, 5, 6]),
            ifindex: 2,
            vlan_id: 0,
            link_ifindex: 2,
        });
        assert!(c.is_ready());
    }
}
