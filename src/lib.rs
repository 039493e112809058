//! Contention-aware benchmark orchestration
//!
//! This library times a "real" program while busy-work processes pinned to
//! the remaining CPU cores or GPUs keep the host contended, emulating the
//! cache, bus and device pressure the program would see on a shared cluster
//! node. The first device of the configured list is reserved for the timed
//! job, the rest drive busy-work; per problem instance the orchestrator
//! launches the busy-work with staggered starts, runs the timed job to
//! completion, records its output, and tears the busy-work down.

#![deny(missing_docs)]

pub mod affinity;
pub mod config;
pub mod jobs;
pub mod problems;
pub mod run;
