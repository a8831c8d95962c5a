//! TLV block codec for batch files.
//!
//! Every record appended to a batch file is a block:
//!
//! ```text
//! +------------+--------------+------------------+
//! | type: u16  | length: u32  | value: [u8; len] |
//! +------------+--------------+------------------+
//!   little-endian, 6-byte header
//! ```
//!
//! Known types are [`BlockType::Event`] (`0x0000`) and
//! [`BlockType::EventMetadata`] (`0x0001`). Any other type is surfaced as
//! [`BlockType::Unknown`] with its value intact, so readers built against an
//! older format keep every block that follows it.

use std::io::{self, Read};

use thiserror::Error;

/// Size of the fixed block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 6;

/// Default ceiling for a single block's value (10 MB).
pub const MAX_BLOCK_LENGTH: u64 = 10 * 1024 * 1024;

/// Block type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Event,
    EventMetadata,
    Unknown(u16),
}

impl BlockType {
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            0x0000 => BlockType::Event,
            0x0001 => BlockType::EventMetadata,
            other => BlockType::Unknown(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            BlockType::Event => 0x0000,
            BlockType::EventMetadata => 0x0001,
            BlockType::Unknown(raw) => *raw,
        }
    }
}

/// One decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub value: Vec<u8>,
}

impl Block {
    pub fn new(block_type: BlockType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            block_type,
            value: value.into(),
        }
    }

    /// Encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        BLOCK_HEADER_SIZE + self.value.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        serialize(self.block_type, &self.value)
    }
}

/// Block decoding errors. Both abort reading the current stream.
#[derive(Error, Debug)]
pub enum BlockError {
    /// Declared length is above the reader's ceiling. The stream cannot be
    /// resynchronized after this.
    #[error("block length {length} exceeds the maximum of {max} bytes")]
    LengthExceeded { length: u64, max: u64 },

    /// Fewer value bytes than declared could be read.
    #[error("failed to read block value: expected {expected} bytes, got {actual}")]
    ReadFailure {
        expected: u64,
        actual: u64,
        #[source]
        source: Option<io::Error>,
    },
}

/// Encode a block: 6-byte header followed by `value`.
///
/// No size limit is enforced here; callers truncate or reject upstream.
/// Values longer than `u32::MAX` cannot be represented and must be rejected
/// by the caller's size policy.
pub fn serialize(block_type: BlockType, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE + value.len());
    out.extend_from_slice(&block_type.as_u16().to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// Sequential block reader over any byte stream.
pub struct BlockReader<R> {
    input: R,
    max_block_length: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(input: R) -> Self {
        Self::with_max_block_length(input, MAX_BLOCK_LENGTH)
    }

    pub fn with_max_block_length(input: R, max_block_length: u64) -> Self {
        Self {
            input,
            max_block_length,
        }
    }

    /// Read the next block, or `None` when fewer than 6 header bytes remain.
    pub fn next_block(&mut self) -> Result<Option<Block>, BlockError> {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        let (read, _) = read_up_to(&mut self.input, &mut header);
        if read < BLOCK_HEADER_SIZE {
            return Ok(None);
        }

        let block_type = BlockType::from_u16(u16::from_le_bytes([header[0], header[1]]));
        let length = u64::from(u32::from_le_bytes([
            header[2], header[3], header[4], header[5],
        ]));

        if length > self.max_block_length {
            return Err(BlockError::LengthExceeded {
                length,
                max: self.max_block_length,
            });
        }

        let mut value = vec![0u8; length as usize];
        let (read, source) = read_up_to(&mut self.input, &mut value);
        if (read as u64) < length {
            return Err(BlockError::ReadFailure {
                expected: length,
                actual: read as u64,
                source,
            });
        }

        Ok(Some(Block { block_type, value }))
    }

    /// Drain every remaining block.
    pub fn all(&mut self) -> Result<Vec<Block>, BlockError> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = Result<Block, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

/// Fill `buf` as far as the stream allows. Returns the byte count and the
/// error that stopped reading early, if any.
fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> (usize, Option<io::Error>) {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }
    (filled, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_serialize_single_byte_event() {
        assert_eq!(
            serialize(BlockType::Event, &[0xFF]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xFF]
        );
    }

    #[test]
    fn test_serialize_metadata_header() {
        let bytes = serialize(BlockType::EventMetadata, &[1, 2, 3]);
        assert_eq!(&bytes[..6], &[0x01, 0x00, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_empty_value_round_trips() {
        let bytes = serialize(BlockType::Event, &[]);
        let mut reader = BlockReader::new(Cursor::new(bytes));
        assert_eq!(
            reader.next_block().unwrap(),
            Some(Block::new(BlockType::Event, Vec::new()))
        );
        assert_eq!(reader.next_block().unwrap(), None);
    }

    #[test]
    fn test_short_header_is_end_of_stream() {
        let mut reader = BlockReader::new(Cursor::new(vec![0x00, 0x00, 0x01]));
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn test_length_exceeded() {
        let bytes = serialize(BlockType::Event, &[0u8; 32]);
        let mut reader = BlockReader::with_max_block_length(Cursor::new(bytes), 16);
        match reader.next_block() {
            Err(BlockError::LengthExceeded { length: 32, max: 16 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_value_is_read_failure() {
        let mut bytes = serialize(BlockType::Event, &[7u8; 10]);
        bytes.truncate(BLOCK_HEADER_SIZE + 4);
        let mut reader = BlockReader::new(Cursor::new(bytes));
        match reader.next_block() {
            Err(BlockError::ReadFailure {
                expected: 10,
                actual: 4,
                source: None,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_preserves_position() {
        let mut bytes = serialize(BlockType::Unknown(0x00FE), b"future");
        bytes.extend(serialize(BlockType::Event, b"payload"));
        let blocks = BlockReader::new(Cursor::new(bytes)).all().unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::new(BlockType::Unknown(0x00FE), b"future".to_vec()),
                Block::new(BlockType::Event, b"payload".to_vec()),
            ]
        );
    }

    #[test]
    fn test_read_error_is_carried() {
        struct Failing {
            served: bool,
        }
        impl Read for Failing {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.served {
                    return Err(io::Error::other("device gone"));
                }
                self.served = true;
                let header = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00];
                buf[..6].copy_from_slice(&header);
                Ok(6)
            }
        }

        let mut reader = BlockReader::new(Failing { served: false });
        match reader.next_block() {
            Err(BlockError::ReadFailure {
                source: Some(e), ..
            }) => assert_eq!(e.to_string(), "device gone"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_iterator_yields_blocks() {
        let mut bytes = serialize(BlockType::EventMetadata, b"m");
        bytes.extend(serialize(BlockType::Event, b"e"));
        let types: Vec<_> = BlockReader::new(Cursor::new(bytes))
            .map(|b| b.unwrap().block_type)
            .collect();
        assert_eq!(types, vec![BlockType::EventMetadata, BlockType::Event]);
    }
}
