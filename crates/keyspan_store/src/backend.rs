//! Seam between [`crate::StoreOperations`] and a concrete ordered store.
//!
//! Implementations are blocking and must be shareable across threads. Every
//! method maps onto one admin or data-path call of the underlying cluster;
//! sequencing (disable before modify, polling alter status) is left to the
//! caller.

use std::collections::HashMap;

use bytes::Bytes;
use keyspan_core::ByteId;

use crate::config::BackendVariant;
use crate::error::Result;
use crate::scan::{RawRow, ScanRequest};
use crate::table::{AlterStatus, TableDescriptor, TableName};

/// Backend property that allows schema changes without disabling a table.
pub const ONLINE_SCHEMA_UPDATE_KEY: &str = "hbase.online.schema.update.enable";

/// Cluster configuration properties as reported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendProperties {
    values: HashMap<String, String>,
}

impl BackendProperties {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Unparseable values fall back to `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|raw| raw.trim().parse::<bool>().ok())
            .unwrap_or(default)
    }
}

/// One buffered write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowMutation {
    Put {
        row: ByteId,
        family: ByteId,
        qualifier: ByteId,
        value: Bytes,
        visibility: ByteId,
    },
    DeleteRow {
        row: ByteId,
    },
}

impl RowMutation {
    pub fn put(
        row: impl Into<ByteId>,
        family: impl Into<ByteId>,
        qualifier: impl Into<ByteId>,
        value: impl Into<Bytes>,
    ) -> Self {
        RowMutation::Put {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            visibility: ByteId::empty(),
        }
    }

    /// Sets the visibility label of a put; no-op for deletes.
    pub fn with_visibility(mut self, label: impl Into<ByteId>) -> Self {
        if let RowMutation::Put { visibility, .. } = &mut self {
            *visibility = label.into();
        }
        self
    }

    pub fn row(&self) -> &ByteId {
        match self {
            RowMutation::Put { row, .. } | RowMutation::DeleteRow { row } => row,
        }
    }
}

/// Open server-side cursor.
pub trait RowScanner: Send {
    /// Returns up to `max_rows` rows in ascending key order. Fewer than
    /// `max_rows` means the scanner is exhausted.
    fn next_batch(&mut self, max_rows: usize) -> Result<Vec<RawRow>>;

    /// Releases server resources. Called at most once.
    fn close(&mut self);
}

pub trait BackendConnection: Send + Sync {
    fn address(&self) -> &str;

    fn variant(&self) -> BackendVariant;

    fn properties(&self) -> BackendProperties;

    fn supports_coprocessors(&self) -> bool {
        self.variant().supports_coprocessors()
    }

    fn list_tables(&self) -> Result<Vec<TableName>>;

    fn table_exists(&self, name: &TableName) -> Result<bool>;

    /// Fails with `TableNotFound` for unknown tables.
    fn describe_table(&self, name: &TableName) -> Result<TableDescriptor>;

    /// Creates the table pre-split at `splits`. Fails with `TableExists` if
    /// the name is taken.
    fn create_table(&self, descriptor: TableDescriptor, splits: &[ByteId]) -> Result<()>;

    /// Replaces the table schema. The change rolls out across regions
    /// asynchronously; progress is visible through [`alter_status`].
    ///
    /// [`alter_status`]: BackendConnection::alter_status
    fn modify_table(&self, descriptor: TableDescriptor) -> Result<()>;

    fn disable_table(&self, name: &TableName) -> Result<()>;

    fn enable_table(&self, name: &TableName) -> Result<()>;

    fn is_table_enabled(&self, name: &TableName) -> Result<bool>;

    /// The table must be disabled first.
    fn drop_table(&self, name: &TableName) -> Result<()>;

    fn alter_status(&self, name: &TableName) -> Result<AlterStatus>;

    /// Start key of every region, the first being empty.
    fn region_start_keys(&self, name: &TableName) -> Result<Vec<ByteId>>;

    fn mutate(&self, name: &TableName, mutations: Vec<RowMutation>) -> Result<()>;

    fn open_scanner(&self, request: &ScanRequest) -> Result<Box<dyn RowScanner>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_properties_default_when_missing_or_invalid() {
        let mut props = BackendProperties::default();
        assert!(!props.get_bool(ONLINE_SCHEMA_UPDATE_KEY, false));
        props.set(ONLINE_SCHEMA_UPDATE_KEY, " true ");
        assert!(props.get_bool(ONLINE_SCHEMA_UPDATE_KEY, false));
        props.set(ONLINE_SCHEMA_UPDATE_KEY, "yes");
        assert!(!props.get_bool(ONLINE_SCHEMA_UPDATE_KEY, false));
    }

    #[test]
    fn visibility_applies_to_puts_only() {
        let put = RowMutation::put("r", "f", "q", Bytes::from_static(b"v")).with_visibility("a&b");
        assert!(matches!(&put, RowMutation::Put { visibility, .. } if visibility.as_bytes() == b"a&b"));
        let delete = RowMutation::DeleteRow { row: ByteId::from("r") }.with_visibility("a");
        assert_eq!(delete.row().as_bytes(), b"r");
    }
}
