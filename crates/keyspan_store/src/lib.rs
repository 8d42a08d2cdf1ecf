//! Backend operations for KeySpan.
//!
//! This crate owns everything that talks to the ordered key-value store:
//! - the [`BackendConnection`] seam any store implementation plugs into,
//! - [`StoreOperations`], which layers table/column-family lifecycle,
//!   coprocessor installation and scan execution over one connection,
//! - the multi-range row filter and [`ScanRequest`] a query submits,
//! - [`TableWriter`], the buffered write path used by ingest,
//! - [`MemoryBackend`], an in-process ordered store used by tests and tools.

pub mod backend;
pub mod config;
pub mod coprocessor;
pub mod error;
pub mod filter;
pub mod memory;
pub mod operations;
pub mod pool;
pub mod scan;
pub mod table;
pub mod writer;

pub use backend::{
    BackendConnection, BackendProperties, RowMutation, RowScanner, ONLINE_SCHEMA_UPDATE_KEY,
};
pub use config::{BackendVariant, StoreConfig};
pub use coprocessor::{
    CancellationFlag, Clock, CoprocessorOutcome, InstallControl, ManualClock, SystemClock,
    MIN_POLL_INTERVAL,
};
pub use error::{Error, Result};
pub use filter::{MultiRowRangeFilter, RowRange};
pub use memory::{Fault, MemoryBackend, MemoryStats, PushdownEvaluator, RowPredicate};
pub use operations::StoreOperations;
pub use pool::{BackendConnector, ConnectionPool, MemoryConnector};
pub use scan::{Cell, RawRow, ScanRequest, ScanStats, ScanStream, ServerFilter};
pub use table::{AlterStatus, CoprocessorSpec, TableDescriptor, TableName};
pub use writer::TableWriter;
