pub mod zobrist;

pub use zobrist::{ZobristKeys, zobrist_keys, zobrist_with_50mr};
