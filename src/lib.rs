//! Inversion-of-control job runtime.
//!
//! An [`Office`] runs processes. Each process holds threads, each thread
//! holds flows, and each flow runs a chain of jobs (tasks or duties) on the
//! teams their metadata names. Jobs wait on managed objects through asset
//! monitors, and failures travel up escalation procedures until a handler
//! claims them or the office's catch-all does.

pub mod administrator;
pub mod arena;
pub mod asset;
pub mod cli;
pub mod clock;
pub mod config;
pub mod demo;
pub mod error;
pub mod escalation;
pub mod execution;
pub mod job;
pub mod linked_list;
pub mod managed_object;
pub mod meta;
pub mod office;
pub mod team;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::OfficeConfig;
pub use error::{Failure, RuntimeError};
pub use office::{Office, OfficeBuilder, ProcessFuture};
