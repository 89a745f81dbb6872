pub use crate::moves::magic::attacks::KING_ATTACKS;
