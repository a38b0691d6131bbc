//! Analysis schedule runner -- worker registry and coordination thread.
//!
//! Split into focused submodules:
//! - `core`: AnalysisSchedule struct, lifecycle, worker registration, accessors
//! - `execution`: coordination loop, yielding, and fatal error broadcast
//! - `scheduling`: arbitration round that wakes the next blocked task

mod core;
mod execution;
mod scheduling;

pub use self::core::AnalysisSchedule;
