//! Execution Monitoring Module
//!
//! Provides the execution timeline recorded during workflow runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Node entry/exit, catch and fan-out iteration events

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
