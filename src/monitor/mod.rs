//! The scan engine: change gating, adaptive scheduling and the threaded
//! capture → recognize → dispatch pipeline.

mod change;
mod pipeline;
mod priority;
mod runner;
mod scheduler;
mod stats;

pub use runner::Monitor;
