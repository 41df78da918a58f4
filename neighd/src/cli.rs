//! # Command-Line Interface
//!
//! ## Purpose
//!
//! Declares the flags this daemon accepts, one-to-one with the external
//! interface this system exposes: the monitored bridge, protocol family
//! selection, the debug reply counter, the interface deny-list regex, the
//! link-local filter toggle, qdisc-presence strictness, verbosity, and the
//! XDP-vs-TC attach mode.

use clap::{ArgGroup, Parser};

#[derive(Debug, Parser)]
#[command(
    name = "neighd",
    about = "Passively learns ARP/ND neighbor entries for SVIs on a monitored bridge",
    group(ArgGroup::new("family").args(["ipv4_only", "ipv6_only"]))
)]
pub struct Args {
    /// Bridge interface whose attached SVIs define the monitored networks.
    pub ifname_mon: String,

    /// Only probe/learn IPv4 neighbors.
    #[arg(short = '4')]
    pub ipv4_only: bool,

    /// Only probe/learn IPv6 neighbors.
    #[arg(short = '6')]
    pub ipv6_only: bool,

    /// Exit after N replies have been correlated (debug).
    #[arg(short = 'c', value_name = "N")]
    pub count: Option<u64>,

    /// Deny-list interface names matching this regex from being tracked.
    #[arg(short = 'f', value_name = "REGEX")]
    pub deny_ifname: Option<String>,

    /// Disable the IPv6 link-local address filter.
    #[arg(short = 'l')]
    pub allow_link_local: bool,

    /// Fail if an ingress qdisc filter is already present instead of replacing it.
    #[arg(short = 'q')]
    pub strict_qdisc: bool,

    /// Increase verbosity (repeatable: 1 = info, 2 = debug, 3 = + netlink tracing).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Attach the in-kernel classifier at XDP instead of TC ingress.
    #[arg(short = 'x')]
    pub use_xdp: bool,
}

impl Args {
    pub fn wants_ipv4(&self) -> bool {
        !self.ipv6_only
    }

    pub fn wants_ipv6(&self) -> bool {
        !self.ipv4_only
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_family_flags_at_once() {
        let result = Args::try_parse_from(["neighd", "br0", "-4", "-6"]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_to_both_families() {
        let args = Args::try_parse_from(["neighd", "br0"]).unwrap();
        assert!(args.wants_ipv4());
        assert!(args.wants_ipv6());
    }

    #[test]
    fn verbosity_is_repeatable() {
        let args = Args::try_parse_from(["neighd", "br0", "-vvv"]).unwrap();
        assert_eq!(args.verbose, 3);
        assert_eq!(args.log_filter(), "trace");
    }
}
