// src/lib.rs
//! blkbench: block-storage benchmark pipeline.
//!
//! One binary covers the whole lifecycle: generate the fio/dd scenario
//! matrix, execute it locally, dispatch a time-synchronized run across a
//! cluster over SSH, collect per-host reports, aggregate them, and compare
//! aggregate snapshots between runs.

pub mod aggregate;
pub mod cluster;
pub mod collect;
pub mod compare;
pub mod constants;
pub mod dispatch;
pub mod parse;
pub mod remote;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod sched;
pub mod store;
