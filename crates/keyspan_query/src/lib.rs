//! Index queries over the KeySpan store.
//!
//! A [`FilteredIndexQuery`] turns index key ranges, adapter selection and
//! filters into one backend scan, then decodes the rows it returns into typed
//! entries through each adapter's [`DataAdapter`] implementation.
//! [`IndexWriter`] is the matching write path.

pub mod adapter;
pub mod callback;
pub mod filter;
pub mod index;
pub mod iterator;
pub mod metrics;
pub mod query;
pub mod ranges;
pub mod writer;

pub use adapter::{AdapterRow, AdapterStore, DataAdapter, EncodedEntry, EncodedField, MergeTransform};
pub use callback::ScanCallback;
pub use filter::{
    Comparison, DistributableFilter, DistributableFilterCodec, FieldValueFilter, FilterFactory,
    FilterList, PushdownFilterEvaluator, QueryFilter, ServerFilterBuilder,
};
pub use index::Index;
pub use iterator::{EntryIterator, MergingEntryIterator, QueryResults};
pub use metrics::{QueryMetrics, QueryMetricsSnapshot};
pub use query::{FilteredIndexQuery, QueryPhase};
pub use ranges::{row_range, row_ranges, RangeDecomposer};
pub use writer::IndexWriter;
