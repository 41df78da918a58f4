//! # Reply Correlator
//!
//! ## Purpose
//!
//! Turns one eBPF ring-buffer record into an action: ignore it, suppress it
//! because the bridge's FDB already relays that MAC in from outside, or
//! resolve the cached `LinkNetwork` and hand back a `Learned` outcome for the
//! scheduler to (re-)arm a refresh timer against. This is the "reply" half
//! of the passive-snooping design — the actual probe send lives in
//! `scheduler` and `packet`.
//!
//! ## How it works
//!
//! A record names the `network_id` the in-kernel classifier already matched
//! the source address against (via `target_networks`), the VLAN it arrived
//! on, and the source MAC/IP. The correlator resolves the owning
//! `LinkNetwork` through the `(network_id, vlan_id)` index — the same key
//! the topology engine installs a binding under — then checks the FDB: if
//! that MAC is known to the bridge on the resolved link's ifindex/VLAN pair,
//! the record came in relayed from elsewhere on the segment and is dropped
//! rather than credited to a directly attached host. Otherwise it reports
//! whether a cached `Neighbor` already exists for this ifindex/IP, so the
//! caller knows whether this correlation should reset an existing refresh
//! timer rather than wait for a fresh `NEIGH ADD` to arm one.

use crate::cache::{Cache, Ifindex};
use crate::events::{RingBufferRecord, AF_INET, AF_INET6};
use crate::ident::{Ip128, MacAddr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The record's family doesn't match the `-4`/`-6` filter in effect.
    WrongFamily,
    /// The cache hasn't seen all three readiness gates yet; probing hasn't
    /// started.
    NotReady,
    /// The record's `(network_id, vlan_id)` doesn't resolve to a cached
    /// `LinkNetwork` — the classifier matched a network that has since been
    /// withdrawn, or a stale in-kernel map entry.
    UnknownNetwork,
    /// The source MAC is already visible in the bridge FDB on the resolved
    /// link's ifindex/VLAN, meaning the packet was relayed in rather than
    /// originated locally — suppressed to avoid probing a MAC the bridge
    /// will keep re-learning on its own.
    SuppressedExternallyLearned,
    /// A neighbor worth tracking: the topology engine folds this into the
    /// cache (directly here, or via the netlink `NEIGH_ADD` it was enqueued
    /// for looping back). `reset_existing_timer` is set when a cached
    /// `Neighbor` for this ifindex/IP already existed, telling the caller to
    /// cancel and re-arm its refresh timer immediately rather than wait for
    /// the next kernel neighbor-table event.
    Learned {
        ifindex: Ifindex,
        ip: Ip128,
        mac: MacAddr,
        reset_existing_timer: bool,
    },
}

#[derive(Debug)]
pub struct Correlator {
    /// Total ring-buffer records processed; exposed for the `--count`
    /// debug exit mode, which stops the daemon after N correlated events.
    pub processed: u64,
    only_ipv4: bool,
    only_ipv6: bool,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            processed: 0,
            only_ipv4: false,
            only_ipv6: false,
        }
    }

    /// Applies the CLI's `-4`/`-6` family filter. The two flags are mutually
    /// exclusive at the CLI layer; passing both here degrades to "no
    /// filter" rather than rejecting everything.
    pub fn with_family_filter(mut self, only_ipv4: bool, only_ipv6: bool) -> Self {
        if !(only_ipv4 && only_ipv6) {
            self.only_ipv4 = only_ipv4;
            self.only_ipv6 = only_ipv6;
        }
        self
    }

    pub fn correlate(&mut self, cache: &Cache, record: &RingBufferRecord) -> CorrelationOutcome {
        self.processed += 1;

        if (self.only_ipv4 && record.in_family != AF_INET) || (self.only_ipv6 && record.in_family != AF_INET6) {
            return CorrelationOutcome::WrongFamily;
        }

        if !cache.is_ready() {
            return CorrelationOutcome::NotReady;
        }

        let Some(ln) = cache.linknet_by_net_vlan(record.network_id, record.vlan_id) else {
            return CorrelationOutcome::UnknownNetwork;
        };
        let ifindex = ln.link_ifindex;

        if cache.fdb_has_mac(record.mac, ifindex, record.vlan_id) {
            return CorrelationOutcome::SuppressedExternallyLearned;
        }

        let reset_existing_timer = cache.neighbor(ifindex, record.ip).is_some();

        CorrelationOutcome::Learned {
            ifindex,
            ip: record.ip,
            mac: record.mac,
            reset_existing_timer,
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Fdb, Link, Neighbor, NudState, TimerSlot};
    use std::net::Ipv4Addr;
    use std::time::SystemTime;

    fn link(ifindex: Ifindex, mac: MacAddr) -> Link {
        let now = SystemTime::now();
        Link {
            ifindex,
            ifname: format!("eth{ifindex}"),
            mac,
            kind: "bridge".into(),
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

    fn make_ready_cache() -> (Cache, Ifindex, u32) {
        let mut cache = Cache::new();
        let clock = crate::clock::SystemClock;
        let svi_mac = MacAddr([0, 0, 0, 0, 0, 9]);
        cache.insert_link(link(2, svi_mac));
        let net_addr = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 0));
        let net_id = cache.get_or_create_network(net_addr, 24, 24, &clock);
        cache.insert_linknet(2, net_id, 0, Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 1)));
        cache.insert_fdb(Fdb {
            mac: svi_mac,
            ifindex: 2,
            vlan_id: 0,
            link_ifindex: 2,
        });
        (cache, 2, net_id)
    }

    fn record(network_id: u32, mac: MacAddr, ip: Ip128) -> RingBufferRecord {
        RingBufferRecord {
            in_family: AF_INET,
            vlan_id: 0,
            network_id,
            mac,
            ip,
        }
    }

    #[test]
    fn not_ready_before_readiness_gates_pass() {
        let cache = Cache::new();
        let mut corr = Correlator::new();
        let rec = record(1, MacAddr([1, 2, 3, 4, 5, 6]), Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(corr.correlate(&cache, &rec), CorrelationOutcome::NotReady);
    }

    #[test]
    fn learns_a_fresh_host_on_known_network() {
        let (cache, ifindex, net_id) = make_ready_cache();
        let mut corr = Correlator::new();
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let rec = record(net_id, mac, ip);
        assert_eq!(
            corr.correlate(&cache, &rec),
            CorrelationOutcome::Learned {
                ifindex,
                ip,
                mac,
                reset_existing_timer: false,
            }
        );
        assert_eq!(corr.processed, 1);
    }

    #[test]
    fn flags_reset_for_an_already_cached_neighbor() {
        let (mut cache, ifindex, net_id) = make_ready_cache();
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let ip = Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5));
        let now = SystemTime::now();
        cache.insert_neighbor(Neighbor {
            id: 0,
            ifindex,
            mac,
            ip,
            nud_state: NudState::Reachable,
            sending_link_network: crate::cache::LinkNetworkId(0),
            timer: TimerSlot::Armed { timer_id: 1 },
            update_count: 1,
            reference_count: 0,
            created: now,
            updated: now,
            referenced: now,
        });
        let mut corr = Correlator::new();
        let rec = record(net_id, mac, ip);
        assert_eq!(
            corr.correlate(&cache, &rec),
            CorrelationOutcome::Learned {
                ifindex,
                ip,
                mac,
                reset_existing_timer: true,
            }
        );
    }

    #[test]
    fn suppresses_externally_learned_fdb_mac() {
        let (mut cache, ifindex, net_id) = make_ready_cache();
        let relayed_mac = MacAddr([9, 9, 9, 9, 9, 9]);
        cache.insert_fdb(Fdb {
            mac: relayed_mac,
            ifindex,
            vlan_id: 0,
            link_ifindex: ifindex,
        });
        let mut corr = Correlator::new();
        let rec = record(net_id, relayed_mac, Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            corr.correlate(&cache, &rec),
            CorrelationOutcome::SuppressedExternallyLearned
        );
    }

    #[test]
    fn unknown_network_id_is_dropped() {
        let (cache, _ifindex, net_id) = make_ready_cache();
        let mut corr = Correlator::new();
        let rec = record(net_id + 1, MacAddr([1, 2, 3, 4, 5, 6]), Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(corr.correlate(&cache, &rec), CorrelationOutcome::UnknownNetwork);
    }

    #[test]
    fn ipv6_only_filter_drops_ipv4_records() {
        let (cache, _ifindex, net_id) = make_ready_cache();
        let mut corr = Correlator::new().with_family_filter(false, true);
        let rec = record(net_id, MacAddr([1, 2, 3, 4, 5, 6]), Ip128::from_v4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(corr.correlate(&cache, &rec), CorrelationOutcome::WrongFamily);
    }
}
