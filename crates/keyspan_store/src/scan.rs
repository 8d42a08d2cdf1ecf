use std::collections::{BTreeSet, VecDeque};

use bytes::Bytes;
use keyspan_core::{Authorizations, ByteId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::RowScanner;
use crate::error::Result;
use crate::filter::MultiRowRangeFilter;
use crate::table::TableName;

/// Rows fetched per backend round trip when a request does not say otherwise.
pub const DEFAULT_SCAN_CACHING: usize = 1000;

/// Latest visible version of one column of a row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub family: ByteId,
    pub qualifier: ByteId,
    pub value: Bytes,
    pub visibility: ByteId,
    pub timestamp: u64,
}

/// One row as returned by a backend scanner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRow {
    pub key: ByteId,
    pub cells: Vec<Cell>,
}

impl RawRow {
    pub fn cells_in<'a>(&'a self, family: &'a [u8]) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells
            .iter()
            .filter(move |cell| cell.family.as_bytes() == family)
    }
}

/// Opaque filter payload evaluated next to the data by a coprocessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerFilter {
    pub coprocessor: String,
    pub payload: Bytes,
}

/// Everything a backend needs to run one scan.
///
/// Built fresh for every query. Only the latest version of each cell is
/// ever requested.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    table: TableName,
    ranges: MultiRowRangeFilter,
    families: BTreeSet<ByteId>,
    columns: BTreeSet<(ByteId, ByteId)>,
    server_filter: Option<ServerFilter>,
    max_versions: u32,
    caching: usize,
    first_batch: Option<usize>,
    cache_blocks: bool,
    authorizations: Authorizations,
}

impl ScanRequest {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            ranges: MultiRowRangeFilter::full_keyspace(),
            families: BTreeSet::new(),
            columns: BTreeSet::new(),
            server_filter: None,
            max_versions: 1,
            caching: DEFAULT_SCAN_CACHING,
            first_batch: None,
            cache_blocks: true,
            authorizations: Authorizations::default(),
        }
    }

    pub fn with_ranges(mut self, ranges: MultiRowRangeFilter) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn add_family(&mut self, family: impl Into<ByteId>) {
        self.families.insert(family.into());
    }

    /// Restricts `family` to the listed qualifiers. Families without explicit
    /// columns return every qualifier.
    pub fn add_column(&mut self, family: impl Into<ByteId>, qualifier: impl Into<ByteId>) {
        let family = family.into();
        self.families.insert(family.clone());
        self.columns.insert((family, qualifier.into()));
    }

    pub fn with_server_filter(mut self, filter: Option<ServerFilter>) -> Self {
        self.server_filter = filter;
        self
    }

    pub fn with_caching(mut self, caching: usize) -> Self {
        self.caching = caching.max(1);
        self
    }

    /// Caps the first fetch below `caching`, for callers that expect to
    /// stop after a few rows.
    pub fn with_first_batch(mut self, rows: usize) -> Self {
        self.first_batch = Some(rows.max(1));
        self
    }

    pub fn with_cache_blocks(mut self, cache_blocks: bool) -> Self {
        self.cache_blocks = cache_blocks;
        self
    }

    pub fn with_authorizations(mut self, authorizations: Authorizations) -> Self {
        self.authorizations = authorizations;
        self
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn ranges(&self) -> &MultiRowRangeFilter {
        &self.ranges
    }

    pub fn families(&self) -> impl Iterator<Item = &ByteId> {
        self.families.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &(ByteId, ByteId)> {
        self.columns.iter()
    }

    /// True when a cell in `family`/`qualifier` belongs in the result.
    pub fn selects(&self, family: &ByteId, qualifier: &ByteId) -> bool {
        if self.families.is_empty() {
            return true;
        }
        if !self.families.contains(family) {
            return false;
        }
        let restricted = self
            .columns
            .range((family.clone(), ByteId::empty())..)
            .next()
            .is_some_and(|(f, _)| f == family);
        !restricted || self.columns.contains(&(family.clone(), qualifier.clone()))
    }

    pub fn server_filter(&self) -> Option<&ServerFilter> {
        self.server_filter.as_ref()
    }

    pub fn max_versions(&self) -> u32 {
        self.max_versions
    }

    pub fn caching(&self) -> usize {
        self.caching
    }

    /// Rows requested by the first fetch.
    pub fn first_batch(&self) -> usize {
        self.first_batch.map_or(self.caching, |rows| rows.min(self.caching))
    }

    pub fn cache_blocks(&self) -> bool {
        self.cache_blocks
    }

    pub fn authorizations(&self) -> &Authorizations {
        &self.authorizations
    }
}

/// Per-stream counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub fetches: u64,
    pub rows: u64,
}

/// Lazily fetched scan results.
///
/// Rows are pulled from the backend scanner `caching` at a time, only when the
/// local buffer runs dry; the first fetch may ask for fewer. The scanner is closed exactly once: on [`close`],
/// on exhaustion, after a fetch error, or on drop.
///
/// [`close`]: ScanStream::close
pub struct ScanStream {
    table: TableName,
    scanner: Box<dyn RowScanner>,
    buffer: VecDeque<RawRow>,
    caching: usize,
    first_batch: usize,
    exhausted: bool,
    closed: bool,
    stats: ScanStats,
}

impl ScanStream {
    pub(crate) fn new(table: TableName, scanner: Box<dyn RowScanner>, caching: usize) -> Self {
        let caching = caching.max(1);
        Self {
            table,
            scanner,
            buffer: VecDeque::new(),
            caching,
            first_batch: caching,
            exhausted: false,
            closed: false,
            stats: ScanStats::default(),
        }
    }

    pub(crate) fn with_first_batch(mut self, rows: usize) -> Self {
        self.first_batch = rows.clamp(1, self.caching);
        self
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fills the buffer if it is empty. Lets callers surface open-time I/O
    /// failures before handing the stream out.
    pub fn prefetch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            self.fetch()?;
        }
        Ok(())
    }

    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.buffer.is_empty() {
            self.fetch()?;
        }
        Ok(self.buffer.pop_front())
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        self.scanner.close();
        debug!(
            table = %self.table,
            fetches = self.stats.fetches,
            rows = self.stats.rows,
            "scan stream closed"
        );
    }

    fn fetch(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.exhausted {
            self.close();
            return Ok(());
        }
        let want = if self.stats.fetches == 0 {
            self.first_batch
        } else {
            self.caching
        };
        match self.scanner.next_batch(want) {
            Ok(batch) => {
                self.stats.fetches += 1;
                self.stats.rows += batch.len() as u64;
                if batch.len() < want {
                    self.exhausted = true;
                }
                self.buffer.extend(batch);
                if self.buffer.is_empty() {
                    self.close();
                }
                Ok(())
            }
            Err(err) => {
                warn!(table = %self.table, error = %err, "scan fetch failed");
                self.close();
                Err(err)
            }
        }
    }
}

impl Iterator for ScanStream {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        self.close();
    }
}
