pub mod bm25;
pub mod fusion;

pub use bm25::{tokenize, Bm25Index, Bm25Snapshot};
pub use fusion::{fuse, FusedCandidate, FusionConfig, RankedList};
