//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache store.
//!
//! # Tasks
//! - TTL Sweep: Removes expired cache entries at the configured interval

mod sweeper;

pub(crate) use sweeper::{spawn_sweep_task, SweepHandle};
