pub mod context;
pub mod eval;
pub mod nnue;
pub mod ordering;
pub mod picker;
pub mod pool;
pub mod search;
pub mod see;
pub mod time;
pub mod tt;
