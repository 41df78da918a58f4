//! # Event Loop
//!
//! ## Purpose
//!
//! Single-threaded, cooperative epoll loop driving every fd this daemon
//! owns: a signalfd for orderly shutdown, one timerfd per armed neighbor
//! refresh, the netlink monitor socket, the eBPF ring buffer, and the stats
//! listener. Handler ordering on each wakeup follows a fixed priority so a
//! signal always wins over routine work, and a timer fire is applied before
//! any netlink backlog from the same wakeup: signal, timers, netlink,
//! ring-buffer, netlink flush, stats accept, stats write.
//!
//! ## How it works
//!
//! Built on `nix::sys::epoll::Epoll`, registering every fd with a small
//! tag in the event's `u64` data field so a single `wait()` call can
//! dispatch by tag without a second lookup.

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::os::fd::{AsFd, BorrowedFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Signal,
    Timer(u64),
    NetlinkMonitor,
    RingBuffer,
    Stats,
}

impl Tag {
    fn encode(self) -> u64 {
        match self {
            Tag::Signal => 0,
            Tag::Timer(timer_id) => 1u64 << 62 | timer_id,
            Tag::NetlinkMonitor => 1,
            Tag::RingBuffer => 2,
            Tag::Stats => 3,
        }
    }

    fn decode(raw: u64) -> Tag {
        if raw & (1u64 << 62) != 0 {
            Tag::Timer(raw & !(1u64 << 62))
        } else {
            match raw {
                0 => Tag::Signal,
                1 => Tag::NetlinkMonitor,
                2 => Tag::RingBuffer,
                3 => Tag::Stats,
                _ => Tag::NetlinkMonitor,
            }
        }
    }
}

pub struct EventLoop {
    epoll: Epoll,
}

impl EventLoop {
    pub fn new() -> nix::Result<Self> {
        Ok(EventLoop {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
        })
    }

    pub fn register(&self, fd: BorrowedFd, tag: Tag) -> nix::Result<()> {
        let event = EpollEvent::new(EpollFlags::EPOLLIN, tag.encode());
        self.epoll.add(fd, event)
    }

    pub fn register_timer(&self, fd: BorrowedFd, timer_id: u64) -> nix::Result<()> {
        self.register(fd, Tag::Timer(timer_id))
    }

    pub fn unregister(&self, fd: BorrowedFd) -> nix::Result<()> {
        self.epoll.delete(fd)
    }

    /// Waits for at least one ready fd and returns their tags in a fixed
    /// priority order (signal, timers, netlink, ring-buffer, stats) rather
    /// than epoll's arbitrary readiness order, so handlers run in the
    /// sequence this system's design requires.
    pub fn wait(&self, timeout: EpollTimeout) -> nix::Result<Vec<Tag>> {
        let mut events = [EpollEvent::empty(); 16];
        let n = self.epoll.wait(&mut events, timeout)?;
        let mut tags: Vec<Tag> = events[..n].iter().map(|e| Tag::decode(e.data())).collect();
        tags.sort_by_key(priority);
        Ok(tags)
    }
}

fn priority(tag: &Tag) -> u8 {
    match tag {
        Tag::Signal => 0,
        Tag::Timer(_) => 1,
        Tag::NetlinkMonitor => 2,
        Tag::RingBuffer => 3,
        Tag::Stats => 4,
    }
}

pub fn as_borrowed<T: AsFd>(owner: &T) -> BorrowedFd<'_> {
    owner.as_fd()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrips_through_encoding() {
        for tag in [Tag::Signal, Tag::NetlinkMonitor, Tag::RingBuffer, Tag::Stats, Tag::Timer(42)] {
            assert_eq!(Tag::decode(tag.encode()), tag);
        }
    }

    #[test]
    fn priority_orders_signal_before_everything() {
        let mut tags = vec![Tag::Stats, Tag::RingBuffer, Tag::NetlinkMonitor, Tag::Timer(1), Tag::Signal];
        tags.sort_by_key(priority);
        assert_eq!(tags[0], Tag::Signal);
        assert_eq!(tags[1], Tag::Timer(1));
    }
}
