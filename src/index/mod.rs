//! Field indexing over chunk contents.

mod errors;
mod manager;
mod tokenize;

pub use errors::{IndexError, IndexResult};
pub use manager::{intersect_smallest_first, IndexKind, IndexManager};
pub use tokenize::tokenize;
