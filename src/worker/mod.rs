//! Worker process supervision: spawn, log pumping, exit monitoring.

pub mod reader;
pub mod spawner;
pub mod supervisor;
