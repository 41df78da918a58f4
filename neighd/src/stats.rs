//! # Stats Server
//!
//! ## Purpose
//!
//! A minimal counters surface: accepts a single connection at a time on a
//! Unix domain socket and writes back a line of plain-text counters on
//! request. No wire schema is specified beyond what this system already
//! tracks (records processed, neighbors learned, probes sent), so none is
//! invented beyond that.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};

#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub records_processed: u64,
    pub neighbors_learned: u64,
    pub probes_sent: u64,
}

impl Counters {
    fn render(&self) -> String {
        format!(
            "records_processed {}\nneighbors_learned {}\nprobes_sent {}\n",
            self.records_processed, self.neighbors_learned, self.probes_sent
        )
    }
}

pub struct StatsServer {
    listener: UnixListener,
}

impl StatsServer {
    pub fn bind(path: &str) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);
        Ok(StatsServer {
            listener: UnixListener::bind(path)?,
        })
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.listener.as_raw_fd()
    }

    /// Accepts one pending connection and writes the current counters to
    /// it. Called from the event loop when the listener fd is readable.
    pub fn accept_and_write(&self, counters: &Counters) -> std::io::Result<()> {
        let (mut stream, _) = self.listener.accept()?;
        write_counters(&mut stream, counters)
    }
}

fn write_counters(stream: &mut UnixStream, counters: &Counters) -> std::io::Result<()> {
    stream.write_all(counters.render().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_three_counters() {
        let counters = Counters {
            records_processed: 5,
            neighbors_learned: 2,
            probes_sent: 7,
        };
        let text = counters.render();
        assert!(text.contains("records_processed 5"));
        assert!(text.contains("neighbors_learned 2"));
        assert!(text.contains("probes_sent 7"));
    }
}
