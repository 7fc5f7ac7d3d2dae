//! A single-process, file-backed relational storage core: paged heap
//! files, a shared buffer pool, an order-4 B-tree index, a durable
//! catalog, and a rule-based executor.
//!
//! See `DESIGN.md` for the file-by-file design notes.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod index;
pub mod lock;
pub mod storage;
pub mod value;

pub use catalog::{Catalog, ColumnDef, IndexMetadata, TableSchema, TableStatistics};
pub use config::Config;
pub use error::{Error, Result};
pub use executor::{AlterAction, Command, Database, ExecResult, OrderBy};
pub use executor::expr::{BoolOp, CompareOp, Expr};
pub use index::BTreeIndex;
pub use storage::{BufferPool, Ctid, HeapFile, Tuple};
pub use value::{DataType, Key, Value};
