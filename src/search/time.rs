//! Time-management types live alongside the search loop that drives them
//! (`search::TimeManager`, `search::SharedSearchState`); re-exported here so
//! callers can reach them as `search::time::TimeManager` as well.

pub use crate::search::search::{SharedSearchState, TimeManager};
