//! Filtered index query execution.

use std::fmt;
use std::sync::Arc;

use keyspan_core::{Authorizations, ByteId, ByteRange};
use keyspan_store::{Error, MultiRowRangeFilter, ScanRequest, ScanStream, ServerFilter, StoreOperations};
use tracing::{debug, warn};

use crate::adapter::{AdapterStore, DataAdapter};
use crate::callback::ScanCallback;
use crate::filter::{
    ClientSide, DistributableFilter, DistributableFilterCodec, FilterList, QueryFilter,
    ServerFilterBuilder,
};
use crate::index::Index;
use crate::iterator::{EntryIterator, MergingEntryIterator, QueryResults, RowDecoder};
use crate::metrics::QueryMetrics;
use crate::ranges::{row_ranges, RangeDecomposer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPhase {
    Validating,
    RangeBuilding,
    Scanning,
    Iterating,
    Closed,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPhase::Validating => "validating",
            QueryPhase::RangeBuilding => "range_building",
            QueryPhase::Scanning => "scanning",
            QueryPhase::Iterating => "iterating",
            QueryPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A query over one index table, restricted by key ranges, adapters and
/// filters.
///
/// Executing never fails: missing tables, pruned adapters and backend errors
/// while setting up the scan are logged and produce empty results.
pub struct FilteredIndexQuery<T> {
    index: Index,
    adapter_ids: Vec<ByteId>,
    ranges: Option<Vec<ByteRange>>,
    decomposer: Option<Arc<dyn RangeDecomposer>>,
    max_ranges: Option<usize>,
    client_filters: Vec<Arc<dyn QueryFilter>>,
    distributable_filters: Vec<Arc<dyn DistributableFilter>>,
    field_subset: Option<Vec<ByteId>>,
    authorizations: Authorizations,
    limit: Option<usize>,
    callback: Option<Arc<dyn ScanCallback<T>>>,
    server_filter_builder: Arc<dyn ServerFilterBuilder>,
    metrics: Arc<QueryMetrics>,
}

impl<T> FilteredIndexQuery<T> {
    pub fn new(index: Index) -> Self {
        Self {
            index,
            adapter_ids: Vec::new(),
            ranges: None,
            decomposer: None,
            max_ranges: None,
            client_filters: Vec::new(),
            distributable_filters: Vec::new(),
            field_subset: None,
            authorizations: Authorizations::default(),
            limit: None,
            callback: None,
            server_filter_builder: Arc::new(DistributableFilterCodec),
            metrics: Arc::new(QueryMetrics::default()),
        }
    }

    /// Restricts the query to these adapters. Without any, every adapter of
    /// the store passed to [`execute`](Self::execute) is queried.
    pub fn with_adapters<I, A>(mut self, adapter_ids: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ByteId>,
    {
        self.adapter_ids = adapter_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Explicit key ranges; takes precedence over a decomposer.
    pub fn with_ranges(mut self, ranges: Vec<ByteRange>) -> Self {
        self.ranges = Some(ranges);
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn RangeDecomposer>, max_ranges: Option<usize>) -> Self {
        self.decomposer = Some(decomposer);
        self.max_ranges = max_ranges;
        self
    }

    pub fn with_client_filter(mut self, filter: Arc<dyn QueryFilter>) -> Self {
        self.client_filters.push(filter);
        self
    }

    pub fn with_distributable_filter(mut self, filter: Arc<dyn DistributableFilter>) -> Self {
        self.distributable_filters.push(filter);
        self
    }

    /// Only these fields, plus the index's dimension fields, are fetched.
    pub fn with_field_subset<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ByteId>,
    {
        self.field_subset = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_authorizations(mut self, authorizations: Authorizations) -> Self {
        self.authorizations = authorizations;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ScanCallback<T>>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_server_filter_builder(mut self, builder: Arc<dyn ServerFilterBuilder>) -> Self {
        self.server_filter_builder = builder;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<QueryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<QueryMetrics> {
        &self.metrics
    }

    pub fn execute(&self, ops: &StoreOperations, adapters: &AdapterStore<T>) -> QueryResults<T> {
        self.metrics.record_query();
        if self.limit == Some(0) {
            return self.short_circuit("limit is zero");
        }

        self.enter(QueryPhase::Validating);
        let Some(in_scope) = self.validate(ops, adapters) else {
            return self.short_circuit("nothing to scan");
        };

        self.enter(QueryPhase::RangeBuilding);
        let ranges = self.row_ranges();

        self.enter(QueryPhase::Scanning);
        let request = self.scan_request(ops, &in_scope, ranges);
        let Some((mut stream, has_server_filter)) = self.open_scan(ops, request) else {
            return QueryResults::empty();
        };
        self.metrics.record_scan_opened(has_server_filter);
        if let Err(err) = stream.prefetch() {
            warn!(index = %self.index.id(), error = %err, "initial fetch failed");
            self.metrics.record_soft_failure();
            stream.close();
            return QueryResults::empty();
        }

        self.enter(QueryPhase::Iterating);
        let decoder = RowDecoder::new(
            self.index.clone(),
            &in_scope,
            self.client_filter(),
            self.callback.clone(),
            self.metrics.clone(),
        );
        if in_scope.iter().any(|adapter| adapter.merge_transform().is_some()) {
            QueryResults::merging(MergingEntryIterator::new(stream, decoder), self.limit)
        } else {
            QueryResults::direct(EntryIterator::new(stream, decoder), self.limit)
        }
    }

    /// Opens the scanner. When the backend cannot build the server filter the
    /// scan is reopened without it; the client chain still applies every
    /// distributable filter.
    fn open_scan(&self, ops: &StoreOperations, request: ScanRequest) -> Option<(ScanStream, bool)> {
        let err = match ops.scan(&request) {
            Ok(stream) => return Some((stream, request.server_filter().is_some())),
            Err(err) => err,
        };
        if matches!(err, Error::FilterConstruction(_)) && request.server_filter().is_some() {
            warn!(index = %self.index.id(), error = %err, "server filter rejected; filtering on the client only");
            self.metrics.record_soft_failure();
            match ops.scan(&request.with_server_filter(None)) {
                Ok(stream) => return Some((stream, false)),
                Err(retry_err) => {
                    warn!(index = %self.index.id(), error = %retry_err, "unable to open scanner");
                    self.metrics.record_soft_failure();
                    return None;
                }
            }
        }
        warn!(index = %self.index.id(), error = %err, "unable to open scanner");
        self.metrics.record_soft_failure();
        None
    }

    fn enter(&self, phase: QueryPhase) {
        debug!(index = %self.index.id(), phase = %phase, "query phase");
    }

    fn short_circuit(&self, reason: &'static str) -> QueryResults<T> {
        debug!(index = %self.index.id(), reason, "query answered empty");
        self.metrics.record_empty_short_circuit();
        QueryResults::empty()
    }

    /// In-scope adapters, or `None` when the query cannot match anything.
    fn validate(&self, ops: &StoreOperations, adapters: &AdapterStore<T>) -> Option<Vec<Arc<dyn DataAdapter<T>>>> {
        let table = self.index.id();
        match ops.table_exists(table) {
            Ok(true) => {}
            Ok(false) => {
                debug!(index = %table, "index table does not exist");
                return None;
            }
            Err(err) => {
                warn!(index = %table, error = %err, "unable to probe index table");
                self.metrics.record_soft_failure();
                return None;
            }
        }

        let mut requested: Vec<ByteId> = if self.adapter_ids.is_empty() {
            adapters.ids().cloned().collect()
        } else {
            self.adapter_ids.clone()
        };
        requested.sort();
        requested.dedup();

        let mut in_scope = Vec::with_capacity(requested.len());
        for adapter_id in requested {
            let Some(adapter) = adapters.get(adapter_id.as_bytes()) else {
                debug!(index = %table, adapter = %adapter_id.to_string_lossy(), "adapter not registered; pruned");
                continue;
            };
            match ops.column_family_exists(table, adapter_id.as_bytes()) {
                Ok(true) => in_scope.push(adapter.clone()),
                Ok(false) => {
                    debug!(index = %table, adapter = %adapter_id.to_string_lossy(), "no column family for adapter; pruned");
                }
                Err(err) => {
                    warn!(index = %table, error = %err, "unable to probe column family");
                    self.metrics.record_soft_failure();
                    return None;
                }
            }
        }
        if in_scope.is_empty() {
            debug!(index = %table, "every adapter was pruned");
            return None;
        }
        Some(in_scope)
    }

    fn row_ranges(&self) -> MultiRowRangeFilter {
        let ranges = match (&self.ranges, &self.decomposer) {
            (Some(ranges), _) => ranges.clone(),
            (None, Some(decomposer)) => decomposer.decompose(&self.index, self.max_ranges),
            (None, None) => Vec::new(),
        };
        let filter = row_ranges(&ranges);
        debug!(index = %self.index.id(), requested = ranges.len(), row_ranges = filter.ranges().len(), "built row ranges");
        filter
    }

    fn scan_request(
        &self,
        ops: &StoreOperations,
        in_scope: &[Arc<dyn DataAdapter<T>>],
        ranges: MultiRowRangeFilter,
    ) -> ScanRequest {
        let config = ops.config();
        let mut request = ScanRequest::new(ops.qualified_table_name(self.index.id()))
            .with_ranges(ranges)
            .with_caching(config.scan_cache_size)
            .with_cache_blocks(config.enable_block_cache)
            .with_authorizations(self.authorizations.clone());
        if let Some(limit) = self.limit {
            request = request.with_first_batch(limit);
        }
        for adapter in in_scope {
            let family = adapter.adapter_id();
            match &self.field_subset {
                Some(fields) => {
                    for field in self.index.dimension_fields().iter().chain(fields) {
                        request.add_column(family.clone(), field.clone());
                    }
                }
                None => request.add_family(family),
            }
        }
        request.with_server_filter(self.server_filter(ops, in_scope))
    }

    fn server_filter(&self, ops: &StoreOperations, in_scope: &[Arc<dyn DataAdapter<T>>]) -> Option<ServerFilter> {
        let config = ops.config();
        if !config.enable_server_side_filtering || self.distributable_filters.is_empty() {
            return None;
        }
        let Some(coprocessor) = config.coprocessor_class.clone() else {
            debug!(index = %self.index.id(), "no pushdown coprocessor configured");
            return None;
        };
        // Physical rows of a merging adapter are only complete after the fold.
        if in_scope.iter().any(|adapter| adapter.merge_transform().is_some()) {
            debug!(index = %self.index.id(), "server filter skipped for merging adapters");
            return None;
        }
        match self.server_filter_builder.build(&self.distributable_filters) {
            Ok(payload) => Some(ServerFilter { coprocessor, payload }),
            Err(err) => {
                warn!(index = %self.index.id(), error = %err, "unable to build server filter; filtering on the client only");
                self.metrics.record_soft_failure();
                None
            }
        }
    }

    fn client_filter(&self) -> Option<Arc<dyn QueryFilter>> {
        let mut filters = self.client_filters.clone();
        filters.extend(
            self.distributable_filters
                .iter()
                .map(|filter| Arc::new(ClientSide(filter.clone())) as Arc<dyn QueryFilter>),
        );
        FilterList::combine(filters)
    }
}
