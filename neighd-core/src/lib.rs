//! Topology cache, reply correlator and refresh scheduler for passive
//! neighbor-table population on a bridge/SVI gateway host.
//!
//! This crate holds every piece of logic that does not need a live socket or
//! kernel interface: the cache of links/networks/neighbors, the policy that
//! decides how netlink and ring-buffer events update it, the pipeline that
//! turns a ring-buffer record into a `NEIGH_ADD` to enqueue, and the jittered
//! per-neighbor refresh timer. The binary crate wires this to real netlink
//! sockets, a real eBPF ring buffer, and a real epoll loop.

pub mod cache;
pub mod clock;
pub mod correlator;
pub mod error;
pub mod events;
pub mod ident;
pub mod packet;
pub mod scheduler;
pub mod topology;

pub use cache::Cache;
pub use clock::{Clock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use topology::Topology;
