//! # Batch Module
//!
//! Validates many documents concurrently.
//!
//! The [`BatchScheduler`] feeds [`ItemRequest`](crate::core::pipeline::ItemRequest)s
//! to a fixed pool of worker threads over a crossbeam channel. Each worker
//! runs one item's pipeline at a time. Per-item failures are captured in the
//! item's record, so a [`BatchReport`] always covers every submitted item,
//! in submission order.
//!
//! Two items naming the same unchanged document rasterize it once: the
//! shared [`Rasterizer`](crate::core::raster::Rasterizer) deduplicates
//! in-flight renders by cache key.

mod item;
mod report;
mod scheduler;

pub use item::{BatchItem, ItemState};
pub use report::{
    export_csv, export_json, export_json_lines, AggregateStats, BatchReport, ItemRecord,
    StatusCounts,
};
pub use scheduler::{BatchConfig, BatchScheduler, CancellationToken};
