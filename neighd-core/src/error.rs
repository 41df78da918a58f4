//! # Error Taxonomy
//!
//! ## Purpose
//!
//! Implements the error taxonomy this system's design calls for: setup-fatal
//! failures abort the process, runtime-reportable failures are logged and
//! the triggering operation is rolled back. Runtime-recoverable conditions
//! (lookup misses, idempotent deletes, FDB suppression) are deliberately
//! *not* represented here — they are `Ok(())` / `None` by construction, not
//! errors, per the cache's own lookup contract.

use thiserror::Error;

/// Errors the core can surface. `SetupFatal` should only originate from
/// one-time initialization paths (there are none inside `neighd-core` itself
/// today — it is reserved for callers wiring cache construction into a
/// larger setup sequence). `RuntimeReportable` covers mid-life failures that
/// leave the cache consistent after rollback: primarily eBPF target-network
/// map updates failing inside `Topology::handle_addr_add`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("setup failed: {0}")]
    SetupFatal(String),
    #[error("operation failed, rolled back: {0}")]
    RuntimeReportable(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
