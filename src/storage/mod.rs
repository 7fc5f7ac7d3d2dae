//! Paged storage: the shared buffer pool, heap files, and row (de)serialization.

pub mod buffer_pool;
pub mod heap;
pub mod tuple;

pub use buffer_pool::BufferPool;
pub use heap::{Ctid, HeapFile};
pub use tuple::Tuple;
