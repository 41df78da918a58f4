//! # Topology Engine
//!
//! ## Purpose
//!
//! Applies `Event`s to the `Cache`, keeping every invariant in §3 intact:
//! idempotent handling of duplicate ADD/DEL, edge-triggered semantics (a
//! DEL that doesn't match anything cached is a no-op, not an error), and the
//! three readiness gates that hold back probing until the cache has seen at
//! least one link, one network and one FDB entry.
//!
//! Mutating the cache is pure in-memory bookkeeping, but arming a refresh
//! timer or sending an immediate probe both require real I/O (a timerfd,
//! a raw socket) that this crate has no business performing. `apply()`
//! hands that decision back to the caller as a `TopologyEffect` rather than
//! reaching for a socket itself.
//!
//! ## Design notes
//!
//! `ADDR DEL` used to be handled by mutating a link's network list while
//! iterating it, which is a use-after-free hazard in the traversal sense
//! (mutate-during-iterate). This is fixed here by snapshotting the
//! candidate `LinkNetworkId`s into a `Vec` before mutating anything — see
//! `handle_addr_del`.

use crate::cache::{Cache, Fdb, Ifindex, Link, LinkNetworkId, NetworkId, NudState, TimerSlot};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::events::{AddrFact, Event, FdbFact, LinkFact, NeighFact};
use crate::ident::{full_prefixlen, Ip128, MacAddr};

/// Mirrors the subset of monitored networks the eBPF classifier should
/// watch. The real implementation (in the binary crate) is a BPF map
/// update; tests use an in-memory fake. Failure must leave the cache
/// exactly as it was before the call — callers roll back on `Err`.
pub trait TargetNetworksMap {
    fn insert(&mut self, network_address: Ip128, prefixlen: u8, network_id: NetworkId) -> Result<(), String>;
    fn remove(&mut self, network_address: Ip128, prefixlen: u8) -> Result<(), String>;
}

/// A target-networks map that never fails, for tests and for builds where
/// the classifier attach step is skipped entirely (e.g. dry-run mode).
#[derive(Debug, Default)]
pub struct NullTargetNetworksMap;

impl TargetNetworksMap for NullTargetNetworksMap {
    fn insert(&mut self, _network_address: Ip128, _prefixlen: u8, _network_id: NetworkId) -> Result<(), String> {
        Ok(())
    }
    fn remove(&mut self, _network_address: Ip128, _prefixlen: u8) -> Result<(), String> {
        Ok(())
    }
}

/// The I/O-requiring action a caller must take after folding an event into
/// the cache. `Topology` only ever returns a non-`None` effect from a
/// `NeighAdd`; every other event is pure bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEffect {
    /// Nothing further to do.
    None,
    /// Arm (or re-arm) this neighbor's refresh timer.
    ArmTimer { ifindex: Ifindex, ip: Ip128 },
    /// Send a refresh probe right away, bypassing the usual jittered wait —
    /// used when a neighbor fact arrives for an address already due or
    /// overdue for a refresh.
    ImmediateProbe { ifindex: Ifindex, ip: Ip128 },
}

pub struct Topology<'a> {
    pub cache: &'a mut Cache,
    pub clock: &'a dyn Clock,
    deny_ifname: Option<regex::Regex>,
    monitored_bridge_ifindex: Option<Ifindex>,
    disable_ipv6ll_filter: bool,
}

impl<'a> Topology<'a> {
    pub fn new(cache: &'a mut Cache, clock: &'a dyn Clock) -> Self {
        Topology {
            cache,
            clock,
            deny_ifname: None,
            monitored_bridge_ifindex: None,
            disable_ipv6ll_filter: false,
        }
    }

    /// Installs the `-f` deny-list regex; interface names it matches are
    /// never treated as SVI/network candidates, overriding the built-in
    /// veth/docker/cni/virbr/loopback defaults rather than adding to them.
    pub fn with_deny_ifname(mut self, deny_ifname: Option<regex::Regex>) -> Self {
        self.deny_ifname = deny_ifname;
        self
    }

    /// Installs the ifindex of the bridge interface named on the command
    /// line. A link is an SVI iff its own link-parent `link_ifindex` equals
    /// this value — the bridge's own interface is never itself an SVI.
    pub fn with_monitored_bridge(mut self, ifindex: Ifindex) -> Self {
        self.monitored_bridge_ifindex = Some(ifindex);
        self
    }

    /// Installs the `-l` flag: when set, IPv6 link-local addresses are no
    /// longer dropped by `ADDR ADD`.
    pub fn with_disable_ipv6ll_filter(mut self, disable: bool) -> Self {
        self.disable_ipv6ll_filter = disable;
        self
    }

    pub fn apply(&mut self, event: Event, targets: &mut dyn TargetNetworksMap) -> CoreResult<TopologyEffect> {
        match event {
            Event::LinkAdd(fact) => self.handle_link_add(fact).map(|_| TopologyEffect::None),
            Event::LinkDel(ifindex) => self.handle_link_del(ifindex).map(|_| TopologyEffect::None),
            Event::AddrAdd(fact) => self.handle_addr_add(fact, targets).map(|_| TopologyEffect::None),
            Event::AddrDel(fact) => self.handle_addr_del(fact, targets).map(|_| TopologyEffect::None),
            Event::FdbAdd(fact) => self.handle_fdb_add(fact).map(|_| TopologyEffect::None),
            Event::FdbDel(fact) => self.handle_fdb_del(fact).map(|_| TopologyEffect::None),
            Event::NeighAdd(fact) => self.handle_neigh_add(fact),
            Event::NeighDel { ifindex, ip } => self.handle_neigh_del(ifindex, ip).map(|_| TopologyEffect::None),
        }
    }

    fn handle_link_add(&mut self, fact: LinkFact) -> CoreResult<()> {
        let now = self.clock.now().unwrap_or(std::time::UNIX_EPOCH);
        if let Some(existing) = self.cache.link_mut(fact.ifindex) {
            // idempotent update of a link we already know about
            existing.ifname = fact.ifname;
            existing.mac = fact.mac;
            existing.kind = fact.kind;
            existing.slave_kind = fact.slave_kind;
            existing.vlan_id = fact.vlan_id;
            existing.vlan_proto = fact.vlan_proto;
            existing.has_vlan = fact.vlan_id.is_some();
            existing.link_ifindex = fact.link_ifindex;
            existing.updated = now;
            return Ok(());
        }
        let is_macvlan = fact.kind == "macvlan";
        let is_svi = match self.monitored_bridge_ifindex {
            // An SVI is a link whose link-parent is the monitored bridge.
            Some(monitored) => fact.link_ifindex == Some(monitored),
            // No monitored bridge configured (unit tests exercising the
            // cache in isolation): fall back to a kind-based heuristic.
            None => fact.kind == "vlan" || (fact.kind == "bridge" && fact.vlan_id.is_none()),
        };
        let ignore_link = self.should_ignore_ifname(&fact.ifname);
        self.cache.insert_link(Link {
            ifindex: fact.ifindex,
            ifname: fact.ifname,
            mac: fact.mac,
            kind: fact.kind,
            slave_kind: fact.slave_kind,
            vlan_id: fact.vlan_id,
            vlan_proto: fact.vlan_proto,
            has_vlan: fact.vlan_id.is_some(),
            is_macvlan,
            is_svi,
            ignore_link,
            link_ifindex: fact.link_ifindex,
            created: now,
            updated: now,
            referenced: now,
            reference_count: 0,
            network_list: Vec::new(),
            fdb_list: Vec::new(),
        });
        Ok(())
    }

    fn handle_link_del(&mut self, ifindex: Ifindex) -> CoreResult<()> {
        self.cache.remove_link(ifindex);
        Ok(())
    }

    fn handle_addr_add(
        &mut self,
        fact: AddrFact,
        targets: &mut dyn TargetNetworksMap,
    ) -> CoreResult<()> {
        if !self.disable_ipv6ll_filter && fact.address.is_ipv6_link_local() {
            return Ok(());
        }
        if !self.cache.link(fact.ifindex).map(|l| l.is_svi).unwrap_or(false) {
            return Ok(());
        }
        let is_v4 = fact.address.is_ipv4_mapped();
        let full_pl = full_prefixlen(fact.prefixlen, is_v4);
        let canonical = fact.address.mask(full_pl);
        let true_prefixlen = fact.prefixlen;

        let network_is_new = self.cache.network_by_addr(canonical).is_none();
        let network_id =
            self.cache
                .get_or_create_network(canonical, fact.prefixlen, true_prefixlen, self.clock);

        if network_is_new {
            if let Err(e) = targets.insert(canonical, fact.prefixlen, network_id) {
                // the network entry would otherwise be orphaned with no
                // classifier-side counterpart; roll it back.
                self.cache.remove_network(network_id);
                return Err(CoreError::RuntimeReportable(format!(
                    "eBPF target-network insert failed for {canonical}/{true_prefixlen}: {e}"
                )));
            }
        }

        if self
            .cache
            .linknet_by_ip_ifindex(fact.address, fact.ifindex)
            .is_some()
        {
            // already joined with this exact local IP; idempotent no-op.
            return Ok(());
        }

        let vlan_id = self.cache.link(fact.ifindex).and_then(|l| l.vlan_id).unwrap_or(0);
        self.cache
            .insert_linknet(fact.ifindex, network_id, vlan_id, fact.address);
        Ok(())
    }

    /// Fixed version of the ADDR DEL handler: snapshots the affected
    /// `LinkNetworkId`s before removing any of them, so the removal loop
    /// never mutates the list it is iterating.
    fn handle_addr_del(
        &mut self,
        fact: AddrFact,
        targets: &mut dyn TargetNetworksMap,
    ) -> CoreResult<()> {
        let Some(ln) = self.cache.linknet_by_ip_ifindex(fact.address, fact.ifindex) else {
            return Ok(());
        };
        let lnid = ln.id;
        let network_id = ln.network_id;

        self.cache.remove_linknet(lnid);

        if let Some(net) = self.cache.network(network_id) {
            if net.refcnt() == 0 {
                let (addr, prefixlen) = (net.address, net.true_prefixlen);
                self.cache.remove_network(network_id);
                if let Err(e) = targets.remove(addr, prefixlen) {
                    log::debug!("eBPF target-network removal failed for {addr}/{prefixlen}: {e}");
                }
            }
        }
        Ok(())
    }

    /// Only entries the kernel marks externally-learned are worth caching —
    /// this table exists solely to suppress action on bridge-relayed MACs,
    /// not to mirror the full FDB.
    fn handle_fdb_add(&mut self, fact: FdbFact) -> CoreResult<()> {
        if !fact.externally_learned {
            return Ok(());
        }
        self.cache.insert_fdb(Fdb {
            mac: fact.mac,
            ifindex: fact.ifindex,
            vlan_id: fact.vlan_id,
            link_ifindex: fact.ifindex,
        });
        Ok(())
    }

    fn handle_fdb_del(&mut self, fact: FdbFact) -> CoreResult<()> {
        self.cache.remove_fdb(&crate::cache::FdbKey {
            mac: fact.mac,
            ifindex: fact.ifindex,
            vlan_id: fact.vlan_id,
        });
        Ok(())
    }

    /// Folds a kernel or correlator-originated neighbor fact into the
    /// cache. Suppressed entirely until all three readiness gates are set,
    /// for a zero ifindex/MAC (a malformed fact no real kernel event or
    /// correlation produces), for a link flagged `ignore_link`, and for
    /// anything the bridge FDB says is externally learned — those are
    /// relayed-in facts, not directly attached hosts, and arming a timer
    /// for one would mean probing a MAC this host has no segment adjacency
    /// to verify.
    fn handle_neigh_add(&mut self, fact: NeighFact) -> CoreResult<TopologyEffect> {
        if !self.cache.is_ready() {
            return Ok(TopologyEffect::None);
        }
        if fact.ifindex == 0 || fact.mac == MacAddr::ZERO || fact.externally_learned {
            return Ok(TopologyEffect::None);
        }
        if self.cache.link(fact.ifindex).map(|l| l.ignore_link).unwrap_or(true) {
            return Ok(TopologyEffect::None);
        }

        let now = self.clock.now().unwrap_or(std::time::UNIX_EPOCH);
        if let Some(existing) = self.cache.neighbor_mut(fact.ifindex, fact.ip) {
            let had_timer = existing.timer != TimerSlot::Idle;
            existing.mac = fact.mac;
            existing.updated = now;
            existing.update_count += 1;
            existing.nud_state = fact.nud_state;
            return Ok(match fact.nud_state {
                NudState::Stale => {
                    existing.timer = TimerSlot::Idle;
                    TopologyEffect::ImmediateProbe {
                        ifindex: fact.ifindex,
                        ip: fact.ip,
                    }
                }
                NudState::Reachable if !had_timer => TopologyEffect::ArmTimer {
                    ifindex: fact.ifindex,
                    ip: fact.ip,
                },
                _ => TopologyEffect::None,
            });
        }

        let sending_ln = self
            .cache
            .linknet_by_ip_ifindex(fact.ip, fact.ifindex)
            .map(|ln| ln.id)
            .unwrap_or(LinkNetworkId(0));
        self.cache.insert_neighbor(crate::cache::Neighbor {
            id: 0,
            ifindex: fact.ifindex,
            mac: fact.mac,
            ip: fact.ip,
            nud_state: fact.nud_state,
            sending_link_network: sending_ln,
            timer: TimerSlot::Idle,
            update_count: 1,
            reference_count: 0,
            created: now,
            updated: now,
            referenced: now,
        });
        Ok(match fact.nud_state {
            NudState::Stale => TopologyEffect::ImmediateProbe {
                ifindex: fact.ifindex,
                ip: fact.ip,
            },
            NudState::Reachable => TopologyEffect::ArmTimer {
                ifindex: fact.ifindex,
                ip: fact.ip,
            },
            _ => TopologyEffect::None,
        })
    }

    fn handle_neigh_del(&mut self, ifindex: Ifindex, ip: Ip128) -> CoreResult<()> {
        self.cache.remove_neighbor(ifindex, ip);
        Ok(())
    }

    /// Networking interface name deny-list: veth pairs, docker bridges and
    /// loopback are never candidates for SVI/network tracking unless the
    /// caller supplied a `-f` regex, which replaces this default outright.
    fn should_ignore_ifname(&self, ifname: &str) -> bool {
        if let Some(re) = &self.deny_ifname {
            return re.is_match(ifname);
        }
        static DEFAULT_DENY: &[&str] = &["^lo$", "^veth", "^docker", "^cni", "^virbr"];
        DEFAULT_DENY.iter().any(|pat| {
            regex::Regex::new(pat)
                .map(|re| re.is_match(ifname))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ident::MacAddr;
    use std::net::Ipv4Addr;

    struct FakeTargets {
        inserted: Vec<(Ip128, u8, NetworkId)>,
    }

    impl FakeTargets {
        fn new() -> Self {
            FakeTargets { inserted: Vec::new() }
        }
    }

    impl TargetNetworksMap for FakeTargets {
        fn insert(&mut self, network_address: Ip128, prefixlen: u8, network_id: NetworkId) -> Result<(), String> {
            self.inserted.push((network_address, prefixlen, network_id));
            Ok(())
        }
        fn remove(&mut self, _network_address: Ip128, _prefixlen: u8) -> Result<(), String> {
            Ok(())
        }
    }

    fn link_fact(ifindex: Ifindex) -> LinkFact {
        LinkFact {
            ifindex,
            ifname: format!("eth{ifindex}"),
            mac: MacAddr([0, 0, 0, 0, 0, ifindex as u8]),
            kind: "bridge".into(),
            slave_kind: String::new(),
            vlan_id: None,
            vlan_proto: None,
            link_ifindex: None,
        }
    }

    fn neigh_fact(ifindex: Ifindex, ip: Ip128, mac: MacAddr) -> NeighFact {
        NeighFact {
            ifindex,
            ip,
            mac,
            nud_state: NudState::Reachable,
            externally_learned: false,
        }
    }

    #[test]
    fn link_add_is_idempotent() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
        t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
        assert_eq!(cache.links_iter().count(), 1);
    }

    #[test]
    fn addr_add_creates_network_once_for_two_links_and_mirrors_real_id() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = FakeTargets::new();
        {
            let mut t = Topology::new(&mut cache, &clock);
            t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
            t.apply(Event::LinkAdd(link_fact(3)), &mut targets).unwrap();
            t.apply(
                Event::AddrAdd(AddrFact {
                    ifindex: 2,
                    address: Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)),
                    prefixlen: 24,
                }),
                &mut targets,
            )
            .unwrap();
            t.apply(
                Event::AddrAdd(AddrFact {
                    ifindex: 3,
                    address: Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 2)),
                    prefixlen: 24,
                }),
                &mut targets,
            )
            .unwrap();
        }
        assert_eq!(cache.networks_iter().count(), 1);
        let net = cache.networks_iter().next().unwrap();
        assert_eq!(net.refcnt(), 2);
        // the map insert happened exactly once, carrying the real assigned id
        assert_eq!(targets.inserted.len(), 1);
        assert_eq!(targets.inserted[0].2, net.id);
    }

    #[test]
    fn addr_del_removes_network_when_last_link_leaves() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1));
        {
            let mut t = Topology::new(&mut cache, &clock);
            t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
            t.apply(
                Event::AddrAdd(AddrFact {
                    ifindex: 2,
                    address: addr,
                    prefixlen: 24,
                }),
                &mut targets,
            )
            .unwrap();
            t.apply(
                Event::AddrDel(AddrFact {
                    ifindex: 2,
                    address: addr,
                    prefixlen: 24,
                }),
                &mut targets,
            )
            .unwrap();
        }
        assert_eq!(cache.networks_iter().count(), 0);
    }

    #[test]
    fn addr_del_unknown_address_is_noop() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        let res = t.apply(
            Event::AddrDel(AddrFact {
                ifindex: 2,
                address: Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)),
                prefixlen: 24,
            }),
            &mut targets,
        );
        assert!(res.is_ok());
    }

    #[test]
    fn readiness_requires_link_network_and_fdb() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
        assert!(!t.cache.is_ready());
        t.apply(
            Event::AddrAdd(AddrFact {
                ifindex: 2,
                address: Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)),
                prefixlen: 24,
            }),
            &mut targets,
        )
        .unwrap();
        assert!(!t.cache.is_ready());
        t.apply(
            Event::FdbAdd(FdbFact {
                mac: MacAddr([1, 2, 3, 4, 5, 6]),
                ifindex: 2,
                vlan_id: 0,
                externally_learned: true,
            }),
            &mut targets,
        )
        .unwrap();
        assert!(t.cache.is_ready());
    }

    fn make_ready_cache() -> Cache {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
        t.apply(
            Event::AddrAdd(AddrFact {
                ifindex: 2,
                address: Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)),
                prefixlen: 24,
            }),
            &mut targets,
        )
        .unwrap();
        t.apply(
            Event::FdbAdd(FdbFact {
                mac: MacAddr([9, 9, 9, 9, 9, 9]),
                ifindex: 2,
                vlan_id: 0,
                externally_learned: true,
            }),
            &mut targets,
        )
        .unwrap();
        drop(t);
        cache
    }

    #[test]
    fn fresh_neigh_add_arms_a_timer() {
        let mut cache = make_ready_cache();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let effect = t.apply(Event::NeighAdd(neigh_fact(2, ip, mac)), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::ArmTimer { ifindex: 2, ip });
        assert!(t.cache.neighbor(2, ip).is_some());
    }

    #[test]
    fn neigh_add_before_readiness_is_ignored() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let effect = t.apply(Event::NeighAdd(neigh_fact(2, ip, mac)), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::None);
        assert!(t.cache.neighbor(2, ip).is_none());
    }

    #[test]
    fn externally_learned_neigh_is_never_added() {
        let mut cache = make_ready_cache();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let mut fact = neigh_fact(2, ip, MacAddr([1, 2, 3, 4, 5, 6]));
        fact.externally_learned = true;
        let effect = t.apply(Event::NeighAdd(fact), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::None);
        assert!(t.cache.neighbor(2, ip).is_none());
    }

    #[test]
    fn repeat_reachable_neigh_add_while_armed_is_a_noop() {
        let mut cache = make_ready_cache();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        {
            let mut t = Topology::new(&mut cache, &clock);
            t.apply(Event::NeighAdd(neigh_fact(2, ip, mac)), &mut targets).unwrap();
        }
        cache.neighbor_mut(2, ip).unwrap().timer = TimerSlot::Armed { timer_id: 1 };
        let mut t = Topology::new(&mut cache, &clock);
        let effect = t.apply(Event::NeighAdd(neigh_fact(2, ip, mac)), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::None);
    }

    #[test]
    fn stale_neigh_add_triggers_immediate_probe_and_clears_timer() {
        let mut cache = make_ready_cache();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        {
            let mut t = Topology::new(&mut cache, &clock);
            t.apply(Event::NeighAdd(neigh_fact(2, ip, mac)), &mut targets).unwrap();
        }
        cache.neighbor_mut(2, ip).unwrap().timer = TimerSlot::Armed { timer_id: 1 };
        let mut stale_fact = neigh_fact(2, ip, mac);
        stale_fact.nud_state = NudState::Stale;
        let mut t = Topology::new(&mut cache, &clock);
        let effect = t.apply(Event::NeighAdd(stale_fact), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::ImmediateProbe { ifindex: 2, ip });
        assert_eq!(t.cache.neighbor(2, ip).unwrap().timer, TimerSlot::Idle);
    }

    #[test]
    fn fresh_stale_neigh_add_triggers_immediate_probe_without_timer() {
        let mut cache = make_ready_cache();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 6));
        let mac = MacAddr([1, 2, 3, 4, 5, 7]);
        let mut fact = neigh_fact(2, ip, mac);
        fact.nud_state = NudState::Stale;
        let effect = t.apply(Event::NeighAdd(fact), &mut targets).unwrap();
        assert_eq!(effect, TopologyEffect::ImmediateProbe { ifindex: 2, ip });
        assert_eq!(t.cache.neighbor(2, ip).unwrap().timer, TimerSlot::Idle);
    }

    #[test]
    fn deny_regex_overrides_default_ignore_list() {
        let mut cache = Cache::new();
        let clock = SystemClock;
        let mut targets = NullTargetNetworksMap;
        let mut t = Topology::new(&mut cache, &clock).with_deny_ifname(Some(regex::Regex::new("^eth2$").unwrap()));
        t.apply(Event::LinkAdd(link_fact(2)), &mut targets).unwrap();
        assert!(t.cache.link(2).unwrap().ignore_link);
        // a name the default list would have denied is allowed through once
        // a custom deny regex is installed
        let mut veth = link_fact(9);
        veth.ifname = "veth123".into();
        t.apply(Event::LinkAdd(veth), &mut targets).unwrap();
        assert!(!t.cache.link(9).unwrap().ignore_link);
    }
}
