//! In-process ordered backend.
//!
//! Behaves like a single-node HBase-compatible cluster: tables keep rows in
//! unsigned byte order, cells keep a few versions of which scans see only the
//! newest, schema changes require a disabled table unless online schema
//! updates are on, and attaching coprocessors rolls out region by region.
//! Tests can inject one-shot faults and stall schema roll-outs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use keyspan_core::visibility::validate_label;
use keyspan_core::ByteId;
use serde::Serialize;
use tracing::debug;

use crate::backend::{
    BackendConnection, BackendProperties, RowMutation, RowScanner, ONLINE_SCHEMA_UPDATE_KEY,
};
use crate::config::BackendVariant;
use crate::error::{Error, Result};
use crate::scan::{Cell, RawRow, ScanRequest};
use crate::table::{AlterStatus, TableDescriptor, TableName};

const MAX_RETAINED_VERSIONS: usize = 3;

/// Backend call that can be made to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    ListTables,
    DescribeTable,
    CreateTable,
    ModifyTable,
    DropTable,
    AlterStatus,
    Mutate,
    OpenScanner,
    ScanFetch,
}

/// Row predicate decoded from a server filter payload.
pub type RowPredicate = Box<dyn Fn(&RawRow) -> bool + Send + Sync>;

/// Server-side evaluation of pushed-down filters, registered under the
/// coprocessor class that would host it on a real cluster.
pub trait PushdownEvaluator: Send + Sync {
    fn prepare(&self, payload: &[u8]) -> Result<RowPredicate>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub tables_created: u64,
    pub scanners_opened: u64,
    pub scanners_closed: u64,
    pub fetches: u64,
    pub rows_fetched: u64,
    pub mutations: u64,
}

impl MemoryStats {
    pub fn open_scanners(&self) -> u64 {
        self.scanners_opened.saturating_sub(self.scanners_closed)
    }
}

#[derive(Default)]
struct Counters {
    tables_created: AtomicU64,
    scanners_opened: AtomicU64,
    scanners_closed: AtomicU64,
    fetches: AtomicU64,
    rows_fetched: AtomicU64,
    mutations: AtomicU64,
}

struct CellVersion {
    value: Bytes,
    visibility: ByteId,
    timestamp: u64,
}

type ColumnMap = BTreeMap<(ByteId, ByteId), Vec<CellVersion>>;

struct MemTable {
    descriptor: TableDescriptor,
    enabled: bool,
    region_starts: Vec<ByteId>,
    pending_regions: usize,
    rows: BTreeMap<ByteId, ColumnMap>,
}

struct Inner {
    address: String,
    variant: BackendVariant,
    properties: RwLock<BackendProperties>,
    tables: RwLock<BTreeMap<TableName, MemTable>>,
    faults: Mutex<HashSet<Fault>>,
    stall_alterations: AtomicBool,
    evaluators: RwLock<HashMap<String, Arc<dyn PushdownEvaluator>>>,
    counters: Counters,
    next_timestamp: AtomicU64,
}

/// Cloneable handle; clones share the same tables.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_variant(address, BackendVariant::HBase)
    }

    pub fn with_variant(address: impl Into<String>, variant: BackendVariant) -> Self {
        Self {
            inner: Arc::new(Inner {
                address: address.into(),
                variant,
                properties: RwLock::new(BackendProperties::default()),
                tables: RwLock::new(BTreeMap::new()),
                faults: Mutex::new(HashSet::new()),
                stall_alterations: AtomicBool::new(false),
                evaluators: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                next_timestamp: AtomicU64::new(1),
            }),
        }
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut props) = self.inner.properties.write() {
            props.set(key, value);
        }
    }

    pub fn register_evaluator(
        &self,
        coprocessor: impl Into<String>,
        evaluator: Arc<dyn PushdownEvaluator>,
    ) {
        if let Ok(mut evaluators) = self.inner.evaluators.write() {
            evaluators.insert(coprocessor.into(), evaluator);
        }
    }

    /// Makes the next call of `fault`'s kind fail.
    pub fn inject_fault(&self, fault: Fault) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.insert(fault);
        }
    }

    /// While stalled, pending schema changes never finish rolling out.
    pub fn stall_alterations(&self, stalled: bool) {
        self.inner.stall_alterations.store(stalled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.inner.counters;
        MemoryStats {
            tables_created: c.tables_created.load(Ordering::Relaxed),
            scanners_opened: c.scanners_opened.load(Ordering::Relaxed),
            scanners_closed: c.scanners_closed.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            rows_fetched: c.rows_fetched.load(Ordering::Relaxed),
            mutations: c.mutations.load(Ordering::Relaxed),
        }
    }

    pub fn row_count(&self, name: &TableName) -> usize {
        self.inner
            .tables
            .read()
            .ok()
            .and_then(|tables| tables.get(name).map(|table| table.rows.len()))
            .unwrap_or(0)
    }

    fn take_fault(&self, fault: Fault) -> bool {
        self.inner
            .faults
            .lock()
            .map(|mut faults| faults.remove(&fault))
            .unwrap_or(false)
    }

    fn check_fault(&self, fault: Fault, operation: &'static str, table: &str) -> Result<()> {
        if self.take_fault(fault) {
            return Err(Error::backend(operation, table, "injected fault"));
        }
        Ok(())
    }

    fn read_tables(&self) -> Result<RwLockReadGuard<'_, BTreeMap<TableName, MemTable>>> {
        self.inner
            .tables
            .read()
            .map_err(|_| Error::backend("read", "*", "table map lock poisoned"))
    }

    fn write_tables(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<TableName, MemTable>>> {
        self.inner
            .tables
            .write()
            .map_err(|_| Error::backend("write", "*", "table map lock poisoned"))
    }

    fn online_schema_updates(&self) -> bool {
        self.properties().get_bool(ONLINE_SCHEMA_UPDATE_KEY, false)
    }

    fn evaluator(&self, coprocessor: &str) -> Option<Arc<dyn PushdownEvaluator>> {
        self.inner
            .evaluators
            .read()
            .ok()
            .and_then(|evaluators| evaluators.get(coprocessor).cloned())
    }
}

fn table_mut<'a>(
    tables: &'a mut BTreeMap<TableName, MemTable>,
    name: &TableName,
) -> Result<&'a mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| Error::TableNotFound(name.to_string()))
}

impl BackendConnection for MemoryBackend {
    fn address(&self) -> &str {
        &self.inner.address
    }

    fn variant(&self) -> BackendVariant {
        self.inner.variant
    }

    fn properties(&self) -> BackendProperties {
        self.inner
            .properties
            .read()
            .map(|props| props.clone())
            .unwrap_or_default()
    }

    fn list_tables(&self) -> Result<Vec<TableName>> {
        self.check_fault(Fault::ListTables, "list_tables", "*")?;
        Ok(self.read_tables()?.keys().cloned().collect())
    }

    fn table_exists(&self, name: &TableName) -> Result<bool> {
        Ok(self.read_tables()?.contains_key(name))
    }

    fn describe_table(&self, name: &TableName) -> Result<TableDescriptor> {
        self.check_fault(Fault::DescribeTable, "describe_table", name.as_str())?;
        self.read_tables()?
            .get(name)
            .map(|table| table.descriptor.clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn create_table(&self, descriptor: TableDescriptor, splits: &[ByteId]) -> Result<()> {
        let name = descriptor.name().clone();
        self.check_fault(Fault::CreateTable, "create_table", name.as_str())?;
        if !descriptor.coprocessors().is_empty() && !self.supports_coprocessors() {
            return Err(Error::Unsupported("coprocessors"));
        }
        let mut tables = self.write_tables()?;
        if tables.contains_key(&name) {
            return Err(Error::TableExists(name.to_string()));
        }
        let mut region_starts = vec![ByteId::empty()];
        let mut split_keys: Vec<ByteId> = splits.iter().filter(|s| !s.is_empty()).cloned().collect();
        split_keys.sort();
        split_keys.dedup();
        region_starts.extend(split_keys);
        tables.insert(
            name,
            MemTable {
                descriptor,
                enabled: true,
                region_starts,
                pending_regions: 0,
                rows: BTreeMap::new(),
            },
        );
        self.inner.counters.tables_created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn modify_table(&self, descriptor: TableDescriptor) -> Result<()> {
        let name = descriptor.name().clone();
        self.check_fault(Fault::ModifyTable, "modify_table", name.as_str())?;
        if !descriptor.coprocessors().is_empty() && !self.supports_coprocessors() {
            return Err(Error::Unsupported("coprocessors"));
        }
        let online = self.online_schema_updates();
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, &name)?;
        if table.enabled && !online {
            return Err(Error::backend(
                "modify_table",
                name.as_str(),
                "table must be disabled for schema changes",
            ));
        }
        if table.descriptor != descriptor {
            table.descriptor = descriptor;
            table.pending_regions = table.region_starts.len();
        }
        Ok(())
    }

    fn disable_table(&self, name: &TableName) -> Result<()> {
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, name)?;
        if !table.enabled {
            return Err(Error::TableDisabled(name.to_string()));
        }
        table.enabled = false;
        Ok(())
    }

    fn enable_table(&self, name: &TableName) -> Result<()> {
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, name)?;
        if table.enabled {
            return Err(Error::backend("enable_table", name.as_str(), "table already enabled"));
        }
        table.enabled = true;
        Ok(())
    }

    fn is_table_enabled(&self, name: &TableName) -> Result<bool> {
        self.read_tables()?
            .get(name)
            .map(|table| table.enabled)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn drop_table(&self, name: &TableName) -> Result<()> {
        self.check_fault(Fault::DropTable, "drop_table", name.as_str())?;
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, name)?;
        if table.enabled {
            return Err(Error::backend(
                "drop_table",
                name.as_str(),
                "table must be disabled before dropping",
            ));
        }
        tables.remove(name);
        Ok(())
    }

    fn alter_status(&self, name: &TableName) -> Result<AlterStatus> {
        self.check_fault(Fault::AlterStatus, "alter_status", name.as_str())?;
        let stalled = self.inner.stall_alterations.load(Ordering::SeqCst);
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, name)?;
        if !stalled {
            table.pending_regions = table.pending_regions.saturating_sub(1);
        }
        Ok(AlterStatus {
            regions_remaining: table.pending_regions,
            regions_total: table.region_starts.len(),
        })
    }

    fn region_start_keys(&self, name: &TableName) -> Result<Vec<ByteId>> {
        self.read_tables()?
            .get(name)
            .map(|table| table.region_starts.clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn mutate(&self, name: &TableName, mutations: Vec<RowMutation>) -> Result<()> {
        self.check_fault(Fault::Mutate, "mutate", name.as_str())?;
        let mut tables = self.write_tables()?;
        let table = table_mut(&mut tables, name)?;
        if !table.enabled {
            return Err(Error::TableDisabled(name.to_string()));
        }
        // Validate the whole batch before applying any of it.
        for mutation in &mutations {
            if let RowMutation::Put { family, visibility, .. } = mutation {
                if !table.descriptor.has_family(family.as_bytes()) {
                    return Err(Error::backend(
                        "mutate",
                        name.as_str(),
                        format!("unknown column family '{}'", family.to_string_lossy()),
                    ));
                }
                validate_label(visibility.as_bytes())?;
            }
        }
        let applied = mutations.len() as u64;
        for mutation in mutations {
            match mutation {
                RowMutation::Put {
                    row,
                    family,
                    qualifier,
                    value,
                    visibility,
                } => {
                    let timestamp = self.inner.next_timestamp.fetch_add(1, Ordering::Relaxed);
                    let versions = table
                        .rows
                        .entry(row)
                        .or_default()
                        .entry((family, qualifier))
                        .or_default();
                    versions.push(CellVersion {
                        value,
                        visibility,
                        timestamp,
                    });
                    if versions.len() > MAX_RETAINED_VERSIONS {
                        versions.remove(0);
                    }
                }
                RowMutation::DeleteRow { row } => {
                    table.rows.remove(&row);
                }
            }
        }
        self.inner.counters.mutations.fetch_add(applied, Ordering::Relaxed);
        Ok(())
    }

    fn open_scanner(&self, request: &ScanRequest) -> Result<Box<dyn RowScanner>> {
        let name = request.table();
        if self.take_fault(Fault::OpenScanner) {
            return Err(Error::scan(name.as_str(), "injected fault"));
        }
        let tables = self.read_tables()?;
        let table = tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        if !table.enabled {
            return Err(Error::TableDisabled(name.to_string()));
        }
        if let Some(missing) = request
            .families()
            .find(|family| !table.descriptor.has_family(family.as_bytes()))
        {
            return Err(Error::scan(
                name.as_str(),
                format!("unknown column family '{}'", missing.to_string_lossy()),
            ));
        }

        let predicate = match request.server_filter() {
            Some(filter) if table.descriptor.has_coprocessor(&filter.coprocessor) => {
                match self.evaluator(&filter.coprocessor) {
                    Some(evaluator) => Some(evaluator.prepare(&filter.payload)?),
                    None => {
                        debug!(
                            table = %name,
                            coprocessor = %filter.coprocessor,
                            "no evaluator registered; server filter ignored"
                        );
                        None
                    }
                }
            }
            Some(filter) => {
                debug!(
                    table = %name,
                    coprocessor = %filter.coprocessor,
                    "coprocessor not attached; server filter ignored"
                );
                None
            }
            None => None,
        };
        drop(tables);

        self.inner.counters.scanners_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryScanner {
            backend: self.clone(),
            request: request.clone(),
            predicate,
            cursor: None,
            exhausted: false,
            closed: false,
        }))
    }
}

struct MemoryScanner {
    backend: MemoryBackend,
    request: ScanRequest,
    predicate: Option<RowPredicate>,
    /// Last key handed out; the next fetch resumes after it.
    cursor: Option<ByteId>,
    exhausted: bool,
    closed: bool,
}

impl RowScanner for MemoryScanner {
    fn next_batch(&mut self, max_rows: usize) -> Result<Vec<RawRow>> {
        let name = self.request.table().clone();
        if self.backend.take_fault(Fault::ScanFetch) {
            return Err(Error::scan(name.as_str(), "injected fault"));
        }
        if self.closed || self.exhausted {
            return Ok(Vec::new());
        }
        let backend = self.backend.clone();
        let tables = backend.read_tables()?;
        let table = tables
            .get(&name)
            .ok_or_else(|| Error::scan(name.as_str(), "table dropped during scan"))?;

        let filter = self.request.ranges();
        let mut lower = match &self.cursor {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let mut batch = Vec::new();
        'ranges: loop {
            let mut jump = None;
            for (key, columns) in table.rows.range::<ByteId, _>((lower.clone(), Bound::Unbounded)) {
                if !filter.matches(key.as_bytes()) {
                    match filter.range_at_or_after(key.as_bytes()) {
                        Some(next) if next.start > *key => {
                            jump = Some(next.start.clone());
                            break;
                        }
                        Some(_) => continue,
                        None => break,
                    }
                }
                self.cursor = Some(key.clone());
                let Some(row) = materialize(key, columns, &self.request) else {
                    continue;
                };
                if self.predicate.as_ref().is_some_and(|accept| !accept(&row)) {
                    continue;
                }
                batch.push(row);
                if batch.len() >= max_rows {
                    break 'ranges;
                }
            }
            match jump {
                Some(start) => lower = Bound::Included(start),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        let counters = &backend.inner.counters;
        counters.fetches.fetch_add(1, Ordering::Relaxed);
        counters
            .rows_fetched
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(batch)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.backend
                .inner
                .counters
                .scanners_closed
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for MemoryScanner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Newest selected and visible version of each column; `None` when nothing
/// in the row survives.
fn materialize(key: &ByteId, columns: &ColumnMap, request: &ScanRequest) -> Option<RawRow> {
    let cells: Vec<Cell> = columns
        .iter()
        .filter(|((family, qualifier), _)| request.selects(family, qualifier))
        .filter_map(|((family, qualifier), versions)| {
            let latest = versions.last()?;
            request
                .authorizations()
                .can_see(latest.visibility.as_bytes())
                .then(|| Cell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    value: latest.value.clone(),
                    visibility: latest.visibility.clone(),
                    timestamp: latest.timestamp,
                })
        })
        .collect();
    (!cells.is_empty()).then(|| RawRow {
        key: key.clone(),
        cells,
    })
}

#[cfg(test)]
mod tests {
    use keyspan_core::Authorizations;

    use super::*;
    use crate::filter::{MultiRowRangeFilter, RowRange};
    use crate::scan::ServerFilter;

    fn table(backend: &MemoryBackend, name: &str) -> TableName {
        let name = TableName::new(name);
        backend
            .create_table(TableDescriptor::new(name.clone()).with_families(["f", "g"]), &[])
            .expect("create table");
        name
    }

    fn put(backend: &MemoryBackend, name: &TableName, row: &[u8], value: &'static [u8]) {
        backend
            .mutate(name, vec![RowMutation::put(row, "f", "q", Bytes::from_static(value))])
            .expect("put");
    }

    fn scan_keys(backend: &MemoryBackend, request: &ScanRequest, batch: usize) -> Vec<Vec<u8>> {
        let mut scanner = backend.open_scanner(request).expect("open scanner");
        let mut keys = Vec::new();
        loop {
            let rows = scanner.next_batch(batch).expect("fetch");
            let done = rows.len() < batch;
            keys.extend(rows.into_iter().map(|row| row.key.to_vec()));
            if done {
                break;
            }
        }
        scanner.close();
        keys
    }

    #[test]
    fn scans_return_rows_in_range_in_key_order() {
        let backend = MemoryBackend::new("memory://scan");
        let name = table(&backend, "t");
        for key in [[0x09u8], [0x01], [0x05], [0x06], [0x04], [0x0A]] {
            put(&backend, &name, &key, b"v");
        }
        let request = ScanRequest::new(name).with_ranges(MultiRowRangeFilter::new(vec![
            RowRange::half_open(ByteId::from([0x09]), None),
            RowRange::half_open(ByteId::from([0x04]), Some(ByteId::from([0x06]))),
        ]));
        assert_eq!(scan_keys(&backend, &request, 1), vec![vec![0x04], vec![0x05], vec![0x09], vec![0x0A]]);
        assert_eq!(scan_keys(&backend, &request, 10).len(), 4);
        assert_eq!(backend.stats().open_scanners(), 0);
    }

    #[test]
    fn only_latest_visible_version_is_returned() {
        let backend = MemoryBackend::new("memory://versions");
        let name = table(&backend, "t");
        put(&backend, &name, b"r", b"old");
        put(&backend, &name, b"r", b"new");
        backend
            .mutate(
                &name,
                vec![RowMutation::put("r", "g", "secret", Bytes::from_static(b"x")).with_visibility("admin")],
            )
            .expect("labelled put");

        let request = ScanRequest::new(name.clone());
        let mut scanner = backend.open_scanner(&request).expect("open");
        let rows = scanner.next_batch(10).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells.len(), 1);
        assert_eq!(rows[0].cells[0].value, Bytes::from_static(b"new"));

        let request = ScanRequest::new(name).with_authorizations(Authorizations::new(["admin"]));
        let mut scanner = backend.open_scanner(&request).expect("open");
        assert_eq!(scanner.next_batch(10).expect("fetch")[0].cells.len(), 2);
    }

    #[test]
    fn schema_changes_require_disabled_table_unless_online() {
        let backend = MemoryBackend::new("memory://schema");
        let name = table(&backend, "t");
        let desc = backend.describe_table(&name).expect("describe").with_families(["h"]);
        assert!(backend.modify_table(desc.clone()).is_err());

        backend.set_property(ONLINE_SCHEMA_UPDATE_KEY, "true");
        backend.modify_table(desc).expect("online modify");
        assert!(backend.describe_table(&name).expect("describe").has_family(b"h"));
    }

    #[test]
    fn alter_status_converges_unless_stalled() {
        let backend = MemoryBackend::new("memory://alter");
        let name = TableName::new("t");
        backend
            .create_table(
                TableDescriptor::new(name.clone()).with_families(["f"]),
                &[ByteId::from("m"), ByteId::from("m"), ByteId::empty()],
            )
            .expect("create");
        assert_eq!(backend.region_start_keys(&name).expect("regions").len(), 2);

        backend.disable_table(&name).expect("disable");
        let mut desc = backend.describe_table(&name).expect("describe");
        desc.add_family("g");
        backend.modify_table(desc).expect("modify");

        backend.stall_alterations(true);
        assert_eq!(backend.alter_status(&name).expect("status").regions_remaining, 2);
        backend.stall_alterations(false);
        assert_eq!(backend.alter_status(&name).expect("status").regions_remaining, 1);
        assert!(backend.alter_status(&name).expect("status").is_complete());
    }

    #[test]
    fn drop_requires_disable_and_faults_fire_once() {
        let backend = MemoryBackend::new("memory://drop");
        let name = table(&backend, "t");
        assert!(backend.drop_table(&name).is_err());
        backend.disable_table(&name).expect("disable");
        backend.inject_fault(Fault::DropTable);
        assert!(backend.drop_table(&name).is_err());
        backend.drop_table(&name).expect("drop");
        assert!(!backend.table_exists(&name).expect("exists"));
    }

    #[test]
    fn server_filter_applies_only_with_attached_coprocessor() {
        struct KeyPrefix;
        impl PushdownEvaluator for KeyPrefix {
            fn prepare(&self, payload: &[u8]) -> Result<RowPredicate> {
                let prefix = payload.to_vec();
                Ok(Box::new(move |row: &RawRow| row.key.starts_with(&prefix)))
            }
        }

        let backend = MemoryBackend::new("memory://pushdown");
        backend.register_evaluator("Prefix", Arc::new(KeyPrefix));
        let name = table(&backend, "t");
        put(&backend, &name, b"aa", b"1");
        put(&backend, &name, b"ab", b"2");
        put(&backend, &name, b"ba", b"3");

        let request = ScanRequest::new(name.clone()).with_server_filter(Some(ServerFilter {
            coprocessor: "Prefix".to_string(),
            payload: Bytes::from_static(b"a"),
        }));
        assert_eq!(scan_keys(&backend, &request, 10).len(), 3);

        backend.disable_table(&name).expect("disable");
        let mut desc = backend.describe_table(&name).expect("describe");
        desc.add_coprocessor(crate::table::CoprocessorSpec::new("Prefix"));
        backend.modify_table(desc).expect("attach");
        backend.enable_table(&name).expect("enable");
        assert_eq!(scan_keys(&backend, &request, 10), vec![b"aa".to_vec(), b"ab".to_vec()]);
    }

    #[test]
    fn bigtable_rejects_coprocessors() {
        let backend = MemoryBackend::with_variant("memory://bt", BackendVariant::Bigtable);
        let name = table(&backend, "t");
        backend.disable_table(&name).expect("disable");
        let mut desc = backend.describe_table(&name).expect("describe");
        desc.add_coprocessor(crate::table::CoprocessorSpec::new("Agg"));
        assert!(matches!(backend.modify_table(desc), Err(Error::Unsupported(_))));
    }
}
