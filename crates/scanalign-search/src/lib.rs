#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod search;
pub use search::{NearestNeighborSearch, Neighbor};

mod kdtree;
pub use kdtree::{KdTree3, KdTree4};
