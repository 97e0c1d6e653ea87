//! Harvestr - scheduled collection jobs feeding an incremental record store
//!
//! A catalog of collection jobs runs through a bounded pool on a fixed cycle.
//! Each job's output is scanned for signs of blocking, and the records it
//! collects are upserted so that only changed fields are written and every
//! write is audited.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod runner;
pub mod scheduler;
pub mod storage;

pub use error::{HarvestrError, Result};
