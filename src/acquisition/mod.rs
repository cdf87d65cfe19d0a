//! The tiered acquisition strategies.
//!
//! Attempted in fidelity order by the orchestrator:
//!
//! 1. [`chunked`] — exact-byte retrieval over the probed remote handle.
//! 2. [`capture`] — lossy realtime playback capture when no handle or
//!    descriptor is available.
//! 3. [`direct`] — best-effort whole-resource fetch, whose failure is
//!    handed to a privileged collaborator rather than retried locally.

pub mod capture;
pub mod chunked;
pub mod direct;
