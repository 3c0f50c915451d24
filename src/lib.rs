//! anvil - spec-driven build orchestrator core.
//!
//! Turns a markdown spec into a phase/task plan and drives it to
//! completion through external agent collaborators:
//!
//! - [`packer`] chunks the spec under token budgets and assembles
//!   per-task context selections
//! - [`graph`] resolves agent-emitted declarations into a validated,
//!   cycle-free task graph and schedules it
//! - [`checkpoint`] persists crash-safe progress snapshots for resume
//! - [`orchestrator`] coordinates the whole build phase by phase
//!
//! All state lives under the project's `.anvil/` directory; there are no
//! globals.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod graph;
pub mod orchestrator;
pub mod packer;
pub mod phase;
pub mod task;
