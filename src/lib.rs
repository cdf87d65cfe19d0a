// Copyright 2026 Siphon Contributors
// SPDX-License-Identifier: Apache-2.0

//! Siphon — tiered media acquisition engine.
//!
//! Retrieves large binary media objects from hosts that expose no native
//! bulk-download capability, under uncertain access conditions. Three
//! strategies are tried in fidelity order for every task: exact-byte
//! chunked retrieval over a probed remote-procedure handle, lossy realtime
//! playback capture, and a best-effort whole-resource fetch. The
//! [`orchestrator::Orchestrator`] ties them into one task abstraction with
//! unified monotonic progress, structured errors, and cancellation at every
//! suspension point.
//!
//! Host-environment concerns stay behind injected traits: descriptor
//! resolution ([`resolver`]), handle discovery ([`rpc`]), playback surfaces
//! ([`acquisition::capture`]), and artifact persistence ([`sink`]). The
//! engine holds no on-disk state; every task is in-memory and ephemeral.

pub mod acquisition;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod resolver;
pub mod rpc;
pub mod sink;
pub mod task;
