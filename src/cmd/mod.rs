//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `run`     | `Plan`, `Run`, `Resume` |
//! | `project` | `Status`, `Reset`       |

pub mod project;
pub mod run;

pub use project::{cmd_reset, cmd_status};
pub use run::{cmd_plan, cmd_run};
