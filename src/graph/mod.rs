//! Task graph construction and scheduling.

pub mod builder;
pub mod scheduler;

pub use builder::{TaskGraph, TaskGraphBuilder};
pub use scheduler::{CriticalPath, TaskScheduler};
