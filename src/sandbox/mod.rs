//! Sandbox module containing all execution-related components.

pub mod backend;
pub mod config;
pub mod executor;
pub mod io;
pub mod job;
pub mod language;
pub mod process;
pub mod result;
pub mod workspace;
