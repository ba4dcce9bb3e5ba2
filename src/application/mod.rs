//! Application services: queue, compositor, rasterizer, ledger and daemon.

pub mod compose;
pub mod daemon;
pub mod error;
pub mod exports;
pub mod pipeline;
pub mod queue;
pub mod rasterize;
pub mod repos;
pub mod storage;
