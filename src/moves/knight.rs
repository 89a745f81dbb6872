pub use crate::moves::magic::attacks::KNIGHT_ATTACKS;
