//! Change-range transfer: batching, stream demultiplexing and progress.

pub mod batcher;
pub mod demux;
pub mod progress;
pub mod progress_stream;

pub use batcher::{batch_ranges, Batch};
pub use demux::{demux, RangeSink, StreamCursor};
