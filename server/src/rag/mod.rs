pub mod context;
pub mod embed;
pub mod indexing;
pub mod vector;

pub use vector::VectorStoreError;
