//! Routing of a concatenated range stream back to disk offsets.
//!
//! A content response for a batch is the bytes of `ranges[0]`, then
//! `ranges[1]`, and so on, with no framing. Transport chunks do not line up
//! with range boundaries: one chunk can end a range, cover several small ones
//! and start the next. [`demux`] walks a [`StreamCursor`] across the chunks and
//! writes every piece at its absolute offset.

use crate::remote::ChangeDescriptor;
use crate::{BackupError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io;
use tracing::trace;

/// Destination of demultiplexed bytes.
#[async_trait]
pub trait RangeSink: Send {
    /// Write `data` starting at the absolute `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// `written` bytes of `ranges[index]` have been consumed.
    Remaining { index: usize, written: u64 },
    Complete,
}

/// Position inside the ranges of one batch.
#[derive(Debug)]
pub struct StreamCursor<'a> {
    ranges: &'a [ChangeDescriptor],
    state: CursorState,
    consumed: u64,
}

/// Where the next bytes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub range_index: usize,
    pub offset: u64,
    pub remaining: u64,
}

impl<'a> StreamCursor<'a> {
    pub fn new(ranges: &'a [ChangeDescriptor]) -> Self {
        let mut cursor = Self {
            ranges,
            state: CursorState::Remaining {
                index: 0,
                written: 0,
            },
            consumed: 0,
        };
        cursor.settle();
        cursor
    }

    /// Next write position, or `None` once every range is satisfied.
    pub fn target(&self) -> Option<Target> {
        match self.state {
            CursorState::Remaining { index, written } => {
                let range = &self.ranges[index];
                Some(Target {
                    range_index: index,
                    offset: range.offset + written,
                    remaining: range.length - written,
                })
            }
            CursorState::Complete => None,
        }
    }

    /// Record `n` bytes written to the current target. `n` must not exceed
    /// the target's `remaining`.
    pub fn advance(&mut self, n: u64) {
        if let CursorState::Remaining { index, written } = self.state {
            debug_assert!(written + n <= self.ranges[index].length);
            self.state = CursorState::Remaining {
                index,
                written: written + n,
            };
            self.consumed += n;
            self.settle();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == CursorState::Complete
    }

    /// Bytes consumed so far across all ranges.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes the whole batch needs.
    pub fn expected(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    /// Index of the range currently being filled (the range count once complete).
    pub fn range_index(&self) -> usize {
        match self.state {
            CursorState::Remaining { index, .. } => index,
            CursorState::Complete => self.ranges.len(),
        }
    }

    // Move past every range that is already full, including zero-length ones.
    fn settle(&mut self) {
        while let CursorState::Remaining { index, written } = self.state {
            if index >= self.ranges.len() {
                self.state = CursorState::Complete;
            } else if written == self.ranges[index].length {
                self.state = CursorState::Remaining {
                    index: index + 1,
                    written: 0,
                };
            } else {
                break;
            }
        }
    }
}

/// Write the concatenated bytes of `ranges` from `stream` into `sink`.
///
/// Returns the number of bytes written, which equals the sum of the range
/// lengths. A stream that ends early fails with [`BackupError::ShortStream`]
/// and one that keeps going past the last range with
/// [`BackupError::StreamOverrun`]; bytes written before the failure stay
/// written.
pub async fn demux<S, W>(ranges: &[ChangeDescriptor], mut stream: S, sink: &mut W) -> Result<u64>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
    W: RangeSink + ?Sized,
{
    let mut cursor = StreamCursor::new(ranges);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let mut data: &[u8] = &chunk;

        while !data.is_empty() {
            let target = cursor.target().ok_or(BackupError::StreamOverrun {
                expected: cursor.expected(),
            })?;

            let take = target.remaining.min(data.len() as u64) as usize;
            sink.write_at(target.offset, &data[..take])
                .await
                .map_err(|source| BackupError::Write {
                    offset: target.offset,
                    range_index: target.range_index,
                    source,
                })?;

            trace!(
                "Wrote {} bytes of range {} at offset {}",
                take,
                target.range_index,
                target.offset
            );
            cursor.advance(take as u64);
            data = &data[take..];
        }
    }

    if !cursor.is_complete() {
        return Err(BackupError::ShortStream {
            expected: cursor.expected(),
            received: cursor.consumed(),
            range_index: cursor.range_index(),
        });
    }

    Ok(cursor.consumed())
}
