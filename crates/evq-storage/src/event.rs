//! Reassembly of logical events from decoded blocks.
//!
//! A batch file is a flat sequence of blocks in which an optional metadata
//! block precedes each event block. [`EventReassembler`] walks that sequence
//! with a single pending-metadata slot:
//!
//! - `EventMetadata` overwrites the slot (earlier pending metadata is dropped)
//! - `Event` emits `Event { data, metadata: slot }` and clears the slot
//! - unknown blocks are skipped
//!
//! Metadata that is never followed by an event is never emitted.

use serde::Serialize;

use crate::block::{Block, BlockError, BlockType};

/// One logical event read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
}

impl Event {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// Lazy, single-pass event iterator over blocks.
pub struct EventReassembler<I> {
    blocks: I,
    pending_metadata: Option<Vec<u8>>,
}

impl<I> EventReassembler<I>
where
    I: Iterator<Item = Block>,
{
    pub fn new(blocks: I) -> Self {
        Self {
            blocks,
            pending_metadata: None,
        }
    }
}

impl<I> Iterator for EventReassembler<I>
where
    I: Iterator<Item = Block>,
{
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        for block in self.blocks.by_ref() {
            match block.block_type {
                BlockType::EventMetadata => self.pending_metadata = Some(block.value),
                BlockType::Event => {
                    return Some(Event {
                        data: block.value,
                        metadata: self.pending_metadata.take(),
                    })
                }
                BlockType::Unknown(_) => {}
            }
        }
        self.pending_metadata = None;
        None
    }
}

/// Convenience: reassemble a fully decoded block list.
pub fn reassemble(blocks: Vec<Block>) -> Vec<Event> {
    EventReassembler::new(blocks.into_iter()).collect()
}

/// Reassembler over a fallible block stream (e.g. a `BlockReader`).
///
/// Yields events until the first decoding error, which is yielded once;
/// the stream is then considered finished.
pub struct TryEventReassembler<I> {
    blocks: I,
    pending_metadata: Option<Vec<u8>>,
    failed: bool,
}

impl<I> TryEventReassembler<I>
where
    I: Iterator<Item = Result<Block, BlockError>>,
{
    pub fn new(blocks: I) -> Self {
        Self {
            blocks,
            pending_metadata: None,
            failed: false,
        }
    }
}

impl<I> Iterator for TryEventReassembler<I>
where
    I: Iterator<Item = Result<Block, BlockError>>,
{
    type Item = Result<Event, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(next) = self.blocks.next() {
            let block = match next {
                Ok(block) => block,
                Err(e) => {
                    self.failed = true;
                    self.pending_metadata = None;
                    return Some(Err(e));
                }
            };
            match block.block_type {
                BlockType::EventMetadata => self.pending_metadata = Some(block.value),
                BlockType::Event => {
                    return Some(Ok(Event {
                        data: block.value,
                        metadata: self.pending_metadata.take(),
                    }))
                }
                BlockType::Unknown(_) => {}
            }
        }
        None
    }
}
