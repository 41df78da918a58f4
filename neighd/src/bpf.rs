//! # eBPF Classifier Attach
//!
//! ## Purpose
//!
//! Loads the out-of-tree classifier object (`ebpf-programs`), attaches it
//! either as a TC ingress clsact filter or, with `-x`, directly at XDP on
//! the monitored bridge, and exposes its two maps: `target_networks` (keyed
//! by `{prefixlen, network}`, mirrored from the topology cache so the
//! classifier only observes traffic on monitored subnets) and
//! `neighbor_ringbuf` (read by the event loop into `RingBufferRecord`s).
//!
//! ## How it works
//!
//! Uses `libbpf-sys` directly, the same low-level style this workspace
//! already uses for XDP feature queries (`bpf_xdp_query`): open the object
//! file, find the two maps by name, load the program, and attach it either
//! through `bpf_tc_hook`/`bpf_tc_attach` (TC ingress) or `bpf_xdp_attach`
//! (XDP mode). `TargetNetworksMap` is implemented here over the loaded
//! `target_networks` BPF map so `neighd_core::topology` can mirror updates
//! into it without knowing about libbpf at all. `neighbor_ringbuf` is drained
//! through `ring_buffer__poll` with a C callback that decodes each sample
//! into a `RingBufferRecord` and pushes it onto a queue `poll()` drains.

use neighd_core::events::RingBufferRecord;
use neighd_core::ident::{Ip128, MacAddr};
use neighd_core::topology::TargetNetworksMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::ptr;

#[repr(C)]
#[derive(Clone, Copy)]
struct TargetNetworkKey {
    prefixlen: u32,
    network: [u8; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct TargetNetworkValue {
    network_id: u32,
}

/// Mirrors `struct neighbor_record` in `ebpf-programs/src/classifier.c`
/// byte-for-byte: 32 bytes, no implicit padding beyond the explicit `pad`
/// field kept to align `ip` on an 8-byte boundary.
#[repr(C)]
#[derive(Clone, Copy)]
struct NeighborRecordWire {
    in_family: u16,
    vlan_id: u16,
    network_id: u32,
    mac: [u8; 6],
    pad: [u8; 2],
    ip: [u8; 16],
}

pub struct Classifier {
    obj: *mut libbpf_sys::bpf_object,
    target_networks_fd: RawFd,
    ringbuf_fd: RawFd,
    ifindex: i32,
    use_xdp: bool,
    attached: bool,
    ring_buffer: *mut libbpf_sys::ring_buffer,
    pending: Box<RefCell<VecDeque<RingBufferRecord>>>,
}

impl Classifier {
    pub fn load(object_path: &str, ifindex: i32, use_xdp: bool) -> io::Result<Self> {
        let c_path = CString::new(object_path).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let obj = unsafe { libbpf_sys::bpf_object__open(c_path.as_ptr()) };
        if obj.is_null() {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libbpf_sys::bpf_object__load(obj) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libbpf_sys::bpf_object__close(obj) };
            return Err(err);
        }

        let target_networks_fd = find_map_fd(obj, "target_networks")?;
        let ringbuf_fd = find_map_fd(obj, "neighbor_ringbuf")?;

        let pending = Box::new(RefCell::new(VecDeque::new()));
        let ring_buffer = unsafe {
            libbpf_sys::ring_buffer__new(
                ringbuf_fd,
                Some(ringbuf_sample_cb),
                pending.as_ref() as *const RefCell<VecDeque<RingBufferRecord>> as *mut libc::c_void,
                ptr::null_mut(),
            )
        };
        if ring_buffer.is_null() {
            let err = io::Error::last_os_error();
            unsafe { libbpf_sys::bpf_object__close(obj) };
            return Err(err);
        }

        Ok(Classifier {
            obj,
            target_networks_fd,
            ringbuf_fd,
            ifindex,
            use_xdp,
            attached: false,
            ring_buffer,
            pending,
        })
    }

    /// Attaches the loaded program at TC ingress (clsact) or XDP.
    /// `replace_existing` controls whether an existing ingress filter is
    /// replaced (default) or treated as a setup failure (`-q`).
    pub fn attach(&mut self, prog_name: &str, replace_existing: bool) -> io::Result<()> {
        let c_name = CString::new(prog_name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let prog = unsafe { libbpf_sys::bpf_object__find_program_by_name(self.obj, c_name.as_ptr()) };
        if prog.is_null() {
            return Err(io::Error::other(format!("program {prog_name} not found in object")));
        }
        let prog_fd = unsafe { libbpf_sys::bpf_program__fd(prog) };
        if prog_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        if self.use_xdp {
            let flags = libbpf_sys::XDP_FLAGS_REPLACE;
            let ret = unsafe { libbpf_sys::bpf_xdp_attach(self.ifindex, prog_fd, flags, ptr::null()) };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
        } else {
            let mut hook: libbpf_sys::bpf_tc_hook = unsafe { std::mem::zeroed() };
            hook.sz = size_of_tc_hook();
            hook.ifindex = self.ifindex;
            hook.attach_point = libbpf_sys::BPF_TC_INGRESS;

            let create_ret = unsafe { libbpf_sys::bpf_tc_hook_create(&mut hook) };
            if create_ret != 0 && create_ret != -(libc_eexist()) {
                return Err(io::Error::last_os_error());
            }

            let mut opts: libbpf_sys::bpf_tc_opts = unsafe { std::mem::zeroed() };
            opts.sz = size_of_tc_opts();
            opts.prog_fd = prog_fd;
            opts.flags = if replace_existing { libbpf_sys::BPF_TC_F_REPLACE as u32 } else { 0 };

            let attach_ret = unsafe { libbpf_sys::bpf_tc_attach(&hook, &mut opts) };
            if attach_ret != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        self.attached = true;
        Ok(())
    }

    pub fn ringbuf_fd(&self) -> RawFd {
        self.ringbuf_fd
    }

    pub fn target_networks_fd(&self) -> RawFd {
        self.target_networks_fd
    }

    /// Drains whatever the ring buffer has ready (non-blocking) and returns
    /// every decoded record, oldest first. Called from the event loop when
    /// `ringbuf_fd()` reports readable.
    pub fn poll(&mut self) -> io::Result<Vec<RingBufferRecord>> {
        let ret = unsafe { libbpf_sys::ring_buffer__poll(self.ring_buffer, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(self.pending.borrow_mut().drain(..).collect())
    }
}

/// Decodes one `neighbor_record` sample from the ring buffer and pushes it
/// onto the queue `ctx` points at. Returning nonzero here would stop
/// `ring_buffer__poll` early, so malformed samples (wrong size) are just
/// dropped rather than propagated as an error.
extern "C" fn ringbuf_sample_cb(ctx: *mut libc::c_void, data: *mut libc::c_void, size: u64) -> i32 {
    if size as usize != std::mem::size_of::<NeighborRecordWire>() {
        return 0;
    }
    let wire = unsafe { ptr::read_unaligned(data as *const NeighborRecordWire) };
    let record = RingBufferRecord {
        in_family: wire.in_family,
        vlan_id: wire.vlan_id,
        network_id: wire.network_id,
        mac: MacAddr(wire.mac),
        ip: Ip128(wire.ip),
    };
    let queue = unsafe { &*(ctx as *const RefCell<VecDeque<RingBufferRecord>>) };
    queue.borrow_mut().push_back(record);
    0
}

impl Drop for Classifier {
    fn drop(&mut self) {
        if !self.ring_buffer.is_null() {
            unsafe { libbpf_sys::ring_buffer__free(self.ring_buffer) };
        }
        if !self.obj.is_null() {
            unsafe { libbpf_sys::bpf_object__close(self.obj) };
        }
    }
}

fn find_map_fd(obj: *mut libbpf_sys::bpf_object, name: &str) -> io::Result<RawFd> {
    let c_name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let map = unsafe { libbpf_sys::bpf_object__find_map_by_name(obj, c_name.as_ptr()) };
    if map.is_null() {
        return Err(io::Error::other(format!("map {name} not found in object")));
    }
    let fd = unsafe { libbpf_sys::bpf_map__fd(map) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn size_of_tc_hook() -> usize {
    std::mem::size_of::<libbpf_sys::bpf_tc_hook>()
}

fn size_of_tc_opts() -> usize {
    std::mem::size_of::<libbpf_sys::bpf_tc_opts>()
}

fn libc_eexist() -> i32 {
    libc::EEXIST
}

pub struct BpfTargetNetworksMap {
    fd: RawFd,
}

impl BpfTargetNetworksMap {
    pub fn new(fd: RawFd) -> Self {
        BpfTargetNetworksMap { fd }
    }
}

impl TargetNetworksMap for BpfTargetNetworksMap {
    fn insert(&mut self, network_address: Ip128, prefixlen: u8, network_id: u32) -> Result<(), String> {
        let key = TargetNetworkKey {
            prefixlen: prefixlen as u32,
            network: network_address.0,
        };
        let value = TargetNetworkValue { network_id };
        let ret = unsafe {
            libbpf_sys::bpf_map_update_elem(
                self.fd,
                &key as *const _ as *const libc::c_void,
                &value as *const _ as *const libc::c_void,
                libbpf_sys::BPF_ANY as u64,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().to_string());
        }
        Ok(())
    }

    fn remove(&mut self, network_address: Ip128, prefixlen: u8) -> Result<(), String> {
        let key = TargetNetworkKey {
            prefixlen: prefixlen as u32,
            network: network_address.0,
        };
        let ret = unsafe {
            libbpf_sys::bpf_map_delete_elem(self.fd, &key as *const _ as *const libc::c_void)
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().to_string());
        }
        Ok(())
    }
}
