mod bpf;
mod cli;
mod eventloop;
mod netlink;
mod rawsock;
mod stats;
mod sysctl;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use eventloop::{EventLoop, Tag};
use neighd_core::cache::{Cache, TimerSlot};
use neighd_core::clock::SystemClock;
use neighd_core::correlator::{CorrelationOutcome, Correlator};
use neighd_core::events::Event;
use neighd_core::ident::{Ip128, MacAddr};
use neighd_core::scheduler::Scheduler;
use neighd_core::topology::{NullTargetNetworksMap, TargetNetworksMap, Topology, TopologyEffect};
use nix::sys::epoll::EpollTimeout;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use rand::Rng;
use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

const CLASSIFIER_OBJECT_PATH: &str = "/usr/lib/neighd/classifier.o";
const CLASSIFIER_PROG_NAME: &str = "neighd_classifier";
const STATS_SOCKET_PATH: &str = "/run/neighd/stats.sock";

const REQUIRED_CAPS: &[caps::Capability] = &[
    caps::Capability::CAP_NET_ADMIN,
    caps::Capability::CAP_NET_RAW,
    caps::Capability::CAP_BPF,
];

/// Owns the one `TimerFd` per armed neighbor and the reverse index back to
/// the `(ifindex, ip)` it was armed for. `Scheduler` only tracks the logical
/// `TimerSlot` state machine; this is where that state gets a real kernel
/// timer behind it.
#[derive(Default)]
struct TimerRegistry {
    fds: HashMap<u64, TimerFd>,
    targets: HashMap<u64, (u32, Ip128)>,
}

impl TimerRegistry {
    /// Arms a fresh refresh timer for `ifindex`/`ip` and registers its fd
    /// with the event loop under `Tag::Timer(id)`.
    fn arm(
        &mut self,
        event_loop: &EventLoop,
        scheduler: &mut Scheduler,
        rng: &mut impl Rng,
        ifindex: u32,
        ip: Ip128,
        base_reachable_time_ms: u64,
    ) -> Result<TimerSlot> {
        let (slot, interval) = scheduler.arm(base_reachable_time_ms, rng);
        let TimerSlot::Armed { timer_id } = slot else {
            unreachable!("Scheduler::arm always returns an Armed slot")
        };
        let timer_fd =
            TimerFd::new(ClockId::Monotonic, TimerFlags::TFD_NONBLOCK).context("creating refresh timerfd")?;
        timer_fd
            .set(Expiration::OneShot(TimeSpec::from_duration(interval)), TimerSetTimeFlags::empty())
            .context("arming refresh timerfd")?;
        event_loop
            .register(timer_fd.as_fd(), Tag::Timer(timer_id))
            .context("registering refresh timerfd with event loop")?;
        self.fds.insert(timer_id, timer_fd);
        self.targets.insert(timer_id, (ifindex, ip));
        Ok(slot)
    }

    /// Cancels an armed slot ahead of its own expiry (reply-correlator reset
    /// or a NEIGH DEL), tearing down the fd rather than waiting for it to fire.
    fn cancel(&mut self, event_loop: &EventLoop, slot: TimerSlot) {
        if let TimerSlot::Armed { timer_id } = slot {
            self.clear(event_loop, timer_id);
        }
    }

    /// Drops the fd and index entry for a timer that either just fired or
    /// was cancelled. Idempotent: a timer the registry never armed (a stale
    /// id from a prior run) is simply a no-op.
    fn clear(&mut self, event_loop: &EventLoop, timer_id: u64) {
        if let Some(fd) = self.fds.remove(&timer_id) {
            let _ = event_loop.unregister(fd.as_fd());
        }
        self.targets.remove(&timer_id);
    }

    fn target(&self, timer_id: u64) -> Option<(u32, Ip128)> {
        self.targets.get(&timer_id).copied()
    }
}

fn setcap_via_sudo(caps_string: &str, exe_path: &str) -> Result<()> {
    let output = std::process::Command::new("sudo")
        .arg("setcap")
        .arg(format!("{caps_string}+eip"))
        .arg(exe_path)
        .output()
        .context("spawning sudo setcap")?;
    if !output.status.success() {
        anyhow::bail!(
            "setcap failed with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    log::info!("sudo# setcap {caps_string}+eip {exe_path}");
    Ok(())
}

fn restart_with_required_caps() -> Result<()> {
    let permitted = caps::read(None, caps::CapSet::Permitted).context("reading permitted capabilities")?;
    log::debug!("permitted caps: {permitted:?}");
    if std::env::var("NEIGHD_RESTARTED").as_deref() == Ok("1") {
        return Ok(());
    }
    if REQUIRED_CAPS.iter().all(|c| permitted.contains(c)) {
        return Ok(());
    }
    // SAFETY: single-threaded at this point in startup, before any other
    // env access races with this write.
    unsafe { std::env::set_var("NEIGHD_RESTARTED", "1") };
    let caps_string = REQUIRED_CAPS.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
    let current_exe = std::env::current_exe().context("resolving current executable")?;
    let exe_path = current_exe.to_str().context("executable path is not valid UTF-8")?;
    setcap_via_sudo(&caps_string, exe_path)?;
    let args: Vec<String> = std::env::args().collect();
    log::debug!("re-executing: {args:?}");
    anyhow::bail!(exec::execvp(&current_exe, &args).to_string())
}

/// Blocks SIGINT/SIGTERM from their default disposition and opens a
/// `signalfd` over the same mask, so the event loop observes them as an
/// ordinary readable fd (`Tag::Signal`) instead of being killed outright.
fn open_shutdown_signalfd() -> Result<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).context("blocking SIGINT/SIGTERM")?;
    SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK).context("opening shutdown signalfd")
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter())).init();

    restart_with_required_caps()?;

    let ifindex = resolve_ifindex(&args.ifname_mon).with_context(|| format!("resolving {}", args.ifname_mon))?;
    let deny_ifname = args
        .deny_ifname
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .context("compiling -f deny-list regex")?;

    let mut cache = Cache::new();
    let clock = SystemClock;
    let mut scheduler = Scheduler::new();
    let mut timers = TimerRegistry::default();
    let mut correlator = Correlator::new().with_family_filter(args.ipv4_only, args.ipv6_only);
    let mut null_targets = NullTargetNetworksMap;

    let event_loop = EventLoop::new().context("creating epoll instance")?;
    let l2 = rawsock::L2Socket::new().context("opening raw L2 socket")?;

    bootstrap_cache(
        &mut cache,
        &clock,
        &mut null_targets,
        ifindex,
        deny_ifname.clone(),
        args.allow_link_local,
        &event_loop,
        &mut scheduler,
        &mut timers,
        &l2,
        &mut stats::Counters::default(),
    )?;

    let mut classifier = bpf::Classifier::load(CLASSIFIER_OBJECT_PATH, ifindex as i32, args.use_xdp)
        .context("loading eBPF classifier object")?;
    classifier
        .attach(CLASSIFIER_PROG_NAME, !args.strict_qdisc)
        .context("attaching eBPF classifier")?;
    let mut bpf_targets = bpf::BpfTargetNetworksMap::new(classifier.target_networks_fd());
    reinsert_known_networks(&cache, &mut bpf_targets);

    let monitor = netlink::open_monitor().context("opening netlink monitor socket")?;
    let install_socket = netlink::open_request_socket().context("opening netlink neighbor-install socket")?;
    let stats_server = stats::StatsServer::bind(STATS_SOCKET_PATH).context("binding stats socket")?;
    let mut counters = stats::Counters::default();
    let mut signal_fd = open_shutdown_signalfd()?;

    event_loop.register(signal_fd.as_fd(), Tag::Signal)?;
    event_loop.register(unsafe { BorrowedFd::borrow_raw(monitor.as_raw_fd()) }, Tag::NetlinkMonitor)?;
    event_loop.register(unsafe { BorrowedFd::borrow_raw(classifier.ringbuf_fd()) }, Tag::RingBuffer)?;
    event_loop.register(unsafe { BorrowedFd::borrow_raw(stats_server.raw_fd()) }, Tag::Stats)?;

    let mut remaining_replies = args.count;

    log::info!("neighd monitoring {} (ifindex {ifindex})", args.ifname_mon);

    loop {
        let tags = event_loop.wait(EpollTimeout::NONE)?;
        for tag in tags {
            match tag {
                Tag::Signal => {
                    let _ = signal_fd.read_signal();
                    log::info!("received shutdown signal, exiting");
                    return Ok(());
                }
                Tag::Timer(timer_id) => {
                    if let Some((t_ifindex, ip)) = timers.target(timer_id) {
                        let due = cache
                            .neighbor(t_ifindex, ip)
                            .map(|n| scheduler.is_current(n.timer, timer_id))
                            .unwrap_or(false);
                        if due {
                            let mac = cache.neighbor(t_ifindex, ip).map(|n| n.mac);
                            if let Some(mac) = mac {
                                if let Err(e) = send_refresh_probe(&cache, &l2, t_ifindex, ip, mac) {
                                    log::warn!(
                                        "failed to send scheduled refresh probe to {ip} on ifindex {t_ifindex}: {e}"
                                    );
                                } else {
                                    counters.probes_sent += 1;
                                }
                            }
                            if let Some(neighbor) = cache.neighbor_mut(t_ifindex, ip) {
                                neighbor.timer = TimerSlot::Idle;
                            }
                        }
                    }
                    timers.clear(&event_loop, timer_id);
                }
                Tag::NetlinkMonitor => {
                    let mut buf = [0u8; 8192];
                    match read_raw(&monitor, &mut buf) {
                        Ok(n) if n > 0 => {
                            let events = netlink::decode_monitor_message(&buf[..n])?;
                            apply_events(
                                &mut cache,
                                &clock,
                                events,
                                &mut bpf_targets,
                                ifindex,
                                deny_ifname.clone(),
                                args.allow_link_local,
                                &event_loop,
                                &mut scheduler,
                                &mut timers,
                                &l2,
                                &mut counters,
                            )?;
                        }
                        Ok(_) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Tag::RingBuffer => {
                    for record in classifier.poll().context("draining classifier ring buffer")? {
                        counters.records_processed += 1;
                        match correlator.correlate(&cache, &record) {
                            CorrelationOutcome::Learned {
                                ifindex: learned_ifindex,
                                ip,
                                mac,
                                reset_existing_timer,
                            } => {
                                on_correlation_learned(
                                    &mut cache,
                                    &mut scheduler,
                                    &mut timers,
                                    &event_loop,
                                    &install_socket,
                                    learned_ifindex,
                                    ip,
                                    mac,
                                    reset_existing_timer,
                                )?;
                                if let Some(remaining) = remaining_replies.as_mut() {
                                    *remaining -= 1;
                                    if *remaining == 0 {
                                        log::info!("reached --count limit, exiting");
                                        return Ok(());
                                    }
                                }
                            }
                            CorrelationOutcome::NotReady
                            | CorrelationOutcome::WrongFamily
                            | CorrelationOutcome::UnknownNetwork
                            | CorrelationOutcome::SuppressedExternallyLearned => {}
                        }
                    }
                }
                Tag::Stats => {
                    stats_server.accept_and_write(&counters).ok();
                }
            }
        }
    }
}

fn resolve_ifindex(ifname: &str) -> Result<u32> {
    let c_name = std::ffi::CString::new(ifname)?;
    let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if ifindex == 0 {
        anyhow::bail!("no such interface: {ifname}");
    }
    Ok(ifindex)
}

fn ifname_of(ifindex: u32) -> Option<String> {
    let mut buf = [0u8; libc::IF_NAMESIZE];
    let ptr = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr() as *mut libc::c_char) };
    if ptr.is_null() {
        return None;
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(ptr) };
    cstr.to_str().ok().map(str::to_owned)
}

#[allow(clippy::too_many_arguments)]
fn bootstrap_cache(
    cache: &mut Cache,
    clock: &SystemClock,
    targets: &mut dyn TargetNetworksMap,
    monitored_bridge_ifindex: u32,
    deny_ifname: Option<regex::Regex>,
    disable_ipv6ll_filter: bool,
    event_loop: &EventLoop,
    scheduler: &mut Scheduler,
    timers: &mut TimerRegistry,
    l2: &rawsock::L2Socket,
    counters: &mut stats::Counters,
) -> Result<()> {
    let mut effects = Vec::new();
    {
        let mut topology = Topology::new(cache, clock)
            .with_monitored_bridge(monitored_bridge_ifindex)
            .with_deny_ifname(deny_ifname)
            .with_disable_ipv6ll_filter(disable_ipv6ll_filter);
        for event in netlink::dump_links().context("dumping links")? {
            topology.apply(event, targets).context("applying dumped link")?;
        }
        topology.cache.mark_links_ready();
        for event in netlink::dump_addresses().context("dumping addresses")? {
            topology.apply(event, targets).context("applying dumped address")?;
        }
        topology.cache.mark_networks_ready();
        for event in netlink::dump_fdb().context("dumping bridge FDB")? {
            topology.apply(event, targets).context("applying dumped FDB entry")?;
        }
        topology.cache.mark_fdb_ready();
        for event in netlink::dump_neighbors().context("dumping neighbors")? {
            effects.push(topology.apply(event, targets).context("applying dumped neighbor")?);
        }
    }
    for effect in effects {
        apply_topology_effect(cache, scheduler, timers, event_loop, l2, counters, effect)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_events(
    cache: &mut Cache,
    clock: &SystemClock,
    events: Vec<Event>,
    targets: &mut dyn TargetNetworksMap,
    monitored_bridge_ifindex: u32,
    deny_ifname: Option<regex::Regex>,
    disable_ipv6ll_filter: bool,
    event_loop: &EventLoop,
    scheduler: &mut Scheduler,
    timers: &mut TimerRegistry,
    l2: &rawsock::L2Socket,
    counters: &mut stats::Counters,
) -> Result<()> {
    let mut effects = Vec::new();
    {
        let mut topology = Topology::new(cache, clock)
            .with_monitored_bridge(monitored_bridge_ifindex)
            .with_deny_ifname(deny_ifname)
            .with_disable_ipv6ll_filter(disable_ipv6ll_filter);
        for event in events {
            match topology.apply(event, targets) {
                Ok(effect) => effects.push(effect),
                Err(e) => log::error!("{e}"),
            }
        }
    }
    for effect in effects {
        apply_topology_effect(cache, scheduler, timers, event_loop, l2, counters, effect)?;
    }
    Ok(())
}

fn reinsert_known_networks(cache: &Cache, targets: &mut dyn TargetNetworksMap) {
    for net in cache.networks_iter() {
        if let Err(e) = targets.insert(net.address, net.true_prefixlen, net.id) {
            log::error!("failed to mirror existing network into classifier map: {e}");
        }
    }
}

/// Turns a `TopologyEffect` produced by a genuine kernel `NEIGH_ADD` into
/// the I/O it names: `ArmTimer` gets a real per-neighbor `TimerFd` whose
/// handle is written back into `Neighbor::timer`; `ImmediateProbe` sends
/// the probe right away and leaves the timer idle, per the NUD-STALE rule
/// that a stale hit is answered immediately rather than on the next tick.
#[allow(clippy::too_many_arguments)]
fn apply_topology_effect(
    cache: &mut Cache,
    scheduler: &mut Scheduler,
    timers: &mut TimerRegistry,
    event_loop: &EventLoop,
    l2: &rawsock::L2Socket,
    counters: &mut stats::Counters,
    effect: TopologyEffect,
) -> Result<()> {
    match effect {
        TopologyEffect::ArmTimer { ifindex, ip } => {
            let ifname = ifname_of(ifindex).unwrap_or_else(|| ifindex.to_string());
            let base_ms = sysctl::base_reachable_time_ms(&ifname, ip.is_ipv4_mapped()).unwrap_or(30_000);
            let mut rng = rand::thread_rng();
            let slot = timers.arm(event_loop, scheduler, &mut rng, ifindex, ip, base_ms)?;
            if let Some(neighbor) = cache.neighbor_mut(ifindex, ip) {
                neighbor.timer = slot;
            }
            counters.neighbors_learned += 1;
        }
        TopologyEffect::ImmediateProbe { ifindex, ip } => {
            counters.neighbors_learned += 1;
            let mac = cache.neighbor(ifindex, ip).map(|n| n.mac);
            if let Some(mac) = mac {
                if let Err(e) = send_refresh_probe(cache, l2, ifindex, ip, mac) {
                    log::warn!("failed to send immediate refresh probe to {ip} on ifindex {ifindex}: {e}");
                } else {
                    counters.probes_sent += 1;
                }
            }
        }
        TopologyEffect::None => {}
    }
    Ok(())
}

/// Reacts to a reply-correlator hit by asking the kernel to install the
/// neighbor; the cache is never written directly here. The install request
/// loops back as a genuine `RTM_NEWNEIGH` on the monitor socket and is
/// picked up by `apply_events`, which is the only path that ever creates a
/// `Neighbor`.
fn on_correlation_learned(
    cache: &mut Cache,
    scheduler: &mut Scheduler,
    timers: &mut TimerRegistry,
    event_loop: &EventLoop,
    install_socket: &netlink_sys::Socket,
    ifindex: u32,
    ip: neighd_core::ident::Ip128,
    mac: MacAddr,
    reset_existing_timer: bool,
) -> Result<()> {
    if reset_existing_timer {
        if let Some(neighbor) = cache.neighbor_mut(ifindex, ip) {
            let slot = scheduler.cancel(neighbor.timer);
            timers.cancel(event_loop, neighbor.timer);
            neighbor.timer = slot;
        }
    }
    netlink::install_neighbor(install_socket, ifindex, ip, mac).context("installing learned neighbor via netlink")?;
    Ok(())
}

/// Sends one refresh probe (ARP request or NS) to `target_mac`/`ip` on
/// `ifindex`, sourced from the SVI's own MAC and the `LinkNetwork`'s local
/// address the neighbor was learned against.
fn send_refresh_probe(
    cache: &Cache,
    l2: &rawsock::L2Socket,
    ifindex: u32,
    ip: neighd_core::ident::Ip128,
    target_mac: MacAddr,
) -> Result<()> {
    let neighbor = cache.neighbor(ifindex, ip).context("neighbor vanished before probe send")?;
    let link_network = cache
        .linknet(neighbor.sending_link_network)
        .context("neighbor's link-network binding vanished before probe send")?;
    let src_ip = link_network.local_ip;
    let src_mac = cache.link(ifindex).map(|l| l.mac).context("link vanished before probe send")?;

    let frame = if ip.is_ipv4_mapped() {
        neighd_core::packet::build_arp_request(src_mac, src_ip, target_mac, ip)
    } else {
        neighd_core::packet::build_neighbor_solicitation(src_mac, src_ip, target_mac, ip)
    };
    l2.send_on(ifindex, &frame)?;
    Ok(())
}

fn read_raw(socket: &netlink_sys::Socket, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::recv(socket.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

