pub mod mirror;
pub mod state;
pub mod vector;

pub use mirror::ManualMirror;
pub use state::{FileState, StateDb};
pub use vector::{EntityFilter, ScoredEntity, VectorStore};
