//! Lazy iteration over the rows of an open scan.
//!
//! Rows are pulled from the scan stream only as entries are requested. Each
//! raw row is split per adapter, filtered, decoded and handed to the caller;
//! adapters with a merge transform have their physical rows folded by
//! logical key before decoding.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use keyspan_core::ByteId;
use keyspan_store::{Error, RawRow, ScanStats, ScanStream};
use tracing::{debug, warn};

use crate::adapter::{AdapterRow, DataAdapter, MergeTransform};
use crate::callback::ScanCallback;
use crate::filter::QueryFilter;
use crate::index::Index;
use crate::metrics::QueryMetrics;
use crate::query::QueryPhase;

/// Per-query state shared by both iterator flavours.
pub(crate) struct RowDecoder<T> {
    index: Index,
    adapters: HashMap<ByteId, Arc<dyn DataAdapter<T>>>,
    filter: Option<Arc<dyn QueryFilter>>,
    callback: Option<Arc<dyn ScanCallback<T>>>,
    metrics: Arc<QueryMetrics>,
}

impl<T> RowDecoder<T> {
    pub(crate) fn new(
        index: Index,
        adapters: &[Arc<dyn DataAdapter<T>>],
        filter: Option<Arc<dyn QueryFilter>>,
        callback: Option<Arc<dyn ScanCallback<T>>>,
        metrics: Arc<QueryMetrics>,
    ) -> Self {
        Self {
            index,
            adapters: adapters
                .iter()
                .map(|adapter| (adapter.adapter_id(), adapter.clone()))
                .collect(),
            filter,
            callback,
            metrics,
        }
    }

    /// Adapter rows of `raw` that belong to an in-scope adapter. A row whose
    /// key does not parse is skipped.
    fn split(&self, raw: &RawRow) -> Vec<AdapterRow> {
        self.metrics.record_row_scanned();
        match AdapterRow::split_raw(raw) {
            Ok(rows) => rows
                .into_iter()
                .filter(|row| self.adapters.contains_key(row.adapter_id()))
                .collect(),
            Err(err) => {
                warn!(
                    index = %self.index.id(),
                    row = %hex::encode(raw.key.as_bytes()),
                    error = %err,
                    "skipping row with malformed key"
                );
                self.metrics.record_soft_failure();
                Vec::new()
            }
        }
    }

    fn merge_transform(&self, adapter_id: &ByteId) -> Option<Arc<dyn MergeTransform>> {
        self.adapters
            .get(adapter_id)
            .and_then(|adapter| adapter.merge_transform())
    }

    /// Filter, decode, notify. `None` when the row is rejected or does not
    /// decode.
    fn finish(&self, row: AdapterRow) -> Option<T> {
        if let Some(filter) = &self.filter {
            if !filter.accept(&row) {
                return None;
            }
        }
        let adapter = self.adapters.get(row.adapter_id())?;
        let entry = adapter.decode(&row, &self.index)?;
        if let Some(callback) = &self.callback {
            callback.entry_scanned(&entry, &row);
        }
        self.metrics.record_entry_returned();
        Some(entry)
    }
}

fn record_failure(metrics: &QueryMetrics, stream: &ScanStream, err: &Error) {
    warn!(
        table = %stream.table(),
        error = %err,
        "scan failed mid-stream; ending results early"
    );
    metrics.record_soft_failure();
}

/// Entries in row order, one per accepted adapter row.
pub struct EntryIterator<T> {
    stream: ScanStream,
    decoder: RowDecoder<T>,
    pending: VecDeque<AdapterRow>,
    failure: Option<Error>,
}

impl<T> EntryIterator<T> {
    pub(crate) fn new(stream: ScanStream, decoder: RowDecoder<T>) -> Self {
        Self {
            stream,
            decoder,
            pending: VecDeque::new(),
            failure: None,
        }
    }
}

impl<T> Iterator for EntryIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                if let Some(entry) = self.decoder.finish(row) {
                    return Some(entry);
                }
                continue;
            }
            if self.failure.is_some() {
                return None;
            }
            match self.stream.next_row() {
                Ok(Some(raw)) => self.pending.extend(self.decoder.split(&raw)),
                Ok(None) => return None,
                Err(err) => {
                    record_failure(&self.decoder.metrics, &self.stream, &err);
                    self.failure = Some(err);
                    return None;
                }
            }
        }
    }
}

struct MergeGroup {
    row: AdapterRow,
    folded: usize,
}

/// Entries in row order, with the physical rows of merge-capable adapters
/// folded into one row per logical key before decoding.
///
/// Rows of one logical entry are adjacent in key order. Groups are kept in
/// the order they were opened, at most one per adapter, and every group whose
/// logical key differs from the incoming row is released before that row is
/// queued. The remaining groups are released when the scan ends.
pub struct MergingEntryIterator<T> {
    stream: ScanStream,
    decoder: RowDecoder<T>,
    groups: Vec<MergeGroup>,
    ready: VecDeque<AdapterRow>,
    exhausted: bool,
    failure: Option<Error>,
}

impl<T> MergingEntryIterator<T> {
    pub(crate) fn new(stream: ScanStream, decoder: RowDecoder<T>) -> Self {
        Self {
            stream,
            decoder,
            groups: Vec::new(),
            ready: VecDeque::new(),
            exhausted: false,
            failure: None,
        }
    }

    /// Takes the adapter rows split from one physical row.
    fn accept(&mut self, rows: Vec<AdapterRow>) {
        let Some(first) = rows.first() else {
            return;
        };
        if self
            .groups
            .iter()
            .any(|group| group.row.row_id().logical_key() != first.row_id().logical_key())
        {
            let key = first.row_id().logical_key();
            let (open, done): (Vec<_>, Vec<_>) = std::mem::take(&mut self.groups)
                .into_iter()
                .partition(|group| group.row.row_id().logical_key() == key);
            self.groups = open;
            for group in done {
                self.release(group);
            }
        }
        for row in rows {
            let Some(transform) = self.decoder.merge_transform(row.adapter_id()) else {
                self.ready.push_back(row);
                continue;
            };
            match self
                .groups
                .iter_mut()
                .find(|group| group.row.adapter_id() == row.adapter_id())
            {
                Some(group) => {
                    transform.merge(&mut group.row, row);
                    group.folded += 1;
                }
                None => self.groups.push(MergeGroup { row, folded: 1 }),
            }
        }
    }

    fn release(&mut self, group: MergeGroup) {
        if group.folded > 1 {
            self.decoder.metrics.record_merged_group();
        }
        self.ready.push_back(group.row);
    }

    fn release_all(&mut self) {
        for group in std::mem::take(&mut self.groups) {
            self.release(group);
        }
    }
}

impl<T> Iterator for MergingEntryIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                if let Some(entry) = self.decoder.finish(row) {
                    return Some(entry);
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            match self.stream.next_row() {
                Ok(Some(raw)) => {
                    let rows = self.decoder.split(&raw);
                    self.accept(rows);
                }
                Ok(None) => {
                    self.exhausted = true;
                    self.release_all();
                }
                Err(err) => {
                    // Open groups may be missing rows; they are dropped.
                    record_failure(&self.decoder.metrics, &self.stream, &err);
                    self.groups.clear();
                    self.exhausted = true;
                    self.failure = Some(err);
                }
            }
        }
    }
}

enum Source<T> {
    Empty,
    Direct(EntryIterator<T>),
    Merging(MergingEntryIterator<T>),
}

/// Results of one query execution.
///
/// Iteration is lazy and honours the query limit: once the limit is reached
/// the scanner is closed without fetching further rows. The scanner is also
/// closed on exhaustion, on [`close`], and on drop. A backend failure while
/// iterating ends the results early; it is logged and available from
/// [`failure`].
///
/// [`close`]: QueryResults::close
/// [`failure`]: QueryResults::failure
pub struct QueryResults<T> {
    source: Source<T>,
    limit: Option<usize>,
    emitted: usize,
}

impl<T> QueryResults<T> {
    pub(crate) fn empty() -> Self {
        Self {
            source: Source::Empty,
            limit: None,
            emitted: 0,
        }
    }

    pub(crate) fn direct(iter: EntryIterator<T>, limit: Option<usize>) -> Self {
        Self {
            source: Source::Direct(iter),
            limit,
            emitted: 0,
        }
    }

    pub(crate) fn merging(iter: MergingEntryIterator<T>, limit: Option<usize>) -> Self {
        Self {
            source: Source::Merging(iter),
            limit,
            emitted: 0,
        }
    }

    fn stream(&self) -> Option<&ScanStream> {
        match &self.source {
            Source::Empty => None,
            Source::Direct(iter) => Some(&iter.stream),
            Source::Merging(iter) => Some(&iter.stream),
        }
    }

    /// `true` when no scanner backs these results: execution answered empty
    /// before scanning, or the scanner failed on its first fetch.
    pub fn is_short_circuited(&self) -> bool {
        matches!(self.source, Source::Empty)
    }

    pub fn is_closed(&self) -> bool {
        self.stream().map_or(true, ScanStream::is_closed)
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn scan_stats(&self) -> Option<ScanStats> {
        self.stream().map(ScanStream::stats)
    }

    /// The backend error that ended iteration early, if any.
    pub fn failure(&self) -> Option<&Error> {
        match &self.source {
            Source::Empty => None,
            Source::Direct(iter) => iter.failure.as_ref(),
            Source::Merging(iter) => iter.failure.as_ref(),
        }
    }

    /// Releases the scanner. Idempotent.
    pub fn close(&mut self) {
        let stream = match &mut self.source {
            Source::Empty => return,
            Source::Direct(iter) => &mut iter.stream,
            Source::Merging(iter) => &mut iter.stream,
        };
        if !stream.is_closed() {
            stream.close();
            debug!(table = %stream.table(), phase = ?QueryPhase::Closed, emitted = self.emitted, "query phase");
        }
    }
}

impl<T> Iterator for QueryResults<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            self.close();
            return None;
        }
        let next = match &mut self.source {
            Source::Empty => None,
            Source::Direct(iter) => iter.next(),
            Source::Merging(iter) => iter.next(),
        };
        match next {
            Some(entry) => {
                self.emitted += 1;
                if self.limit.is_some_and(|limit| self.emitted >= limit) {
                    self.close();
                }
                Some(entry)
            }
            None => {
                self.close();
                None
            }
        }
    }
}

impl<T> Drop for QueryResults<T> {
    fn drop(&mut self) {
        self.close();
    }
}
