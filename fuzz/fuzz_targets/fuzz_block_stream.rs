//! Fuzz target for block encoding followed by decoding.
//!
//! Any sequence of blocks must decode back to itself, and reassembly must
//! yield exactly one event per event block.

#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use evq_storage::event::reassemble;
use evq_storage::{Block, BlockReader, BlockType};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct RawBlock {
    block_type: u16,
    value: Vec<u8>,
}

fuzz_target!(|raw: Vec<RawBlock>| {
    let blocks: Vec<Block> = raw
        .into_iter()
        .map(|b| Block::new(BlockType::from_u16(b.block_type), b.value))
        .collect();
    let bytes: Vec<u8> = blocks.iter().flat_map(|b| b.serialize()).collect();

    let decoded = BlockReader::new(Cursor::new(bytes))
        .all()
        .expect("well-formed stream must decode");
    assert_eq!(decoded, blocks);

    let expected = blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Event)
        .count();
    assert_eq!(reassemble(decoded).len(), expected);
});
