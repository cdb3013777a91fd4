//! Formatter-agnostic render blocks and the producer that builds them.

mod block;
mod producer;

pub use block::{argument_pairs, RenderBlock, StyleHint};
pub use producer::to_blocks;
