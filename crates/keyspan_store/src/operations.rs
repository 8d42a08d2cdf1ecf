use std::sync::{Arc, Mutex, MutexGuard};

use keyspan_core::ByteId;
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, ONLINE_SCHEMA_UPDATE_KEY};
use crate::config::StoreConfig;
use crate::coprocessor::{self, CoprocessorOutcome, InstallControl};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::scan::{ScanRequest, ScanStream};
use crate::table::{CoprocessorSpec, TableDescriptor, TableName};
use crate::writer::TableWriter;

/// Table lifecycle, coprocessor installation and scans over one connection.
///
/// Clones share the connection and the admin lock. Schema-changing calls
/// (`create_table`, `add_column_families`, `delete_table`,
/// `delete_all_tables`, `ensure_coprocessor`) serialize on the admin lock;
/// probes and scans do not take it.
#[derive(Clone)]
pub struct StoreOperations {
    connection: Arc<dyn BackendConnection>,
    config: Arc<StoreConfig>,
    schema_update_enabled: bool,
    admin_lock: Arc<Mutex<()>>,
}

impl StoreOperations {
    /// Connects through the process-wide pool.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let connection = ConnectionPool::global().connection(config.variant, &config.address)?;
        Ok(Self::new(connection, config))
    }

    pub fn new(connection: Arc<dyn BackendConnection>, config: StoreConfig) -> Self {
        let schema_update_enabled = connection
            .properties()
            .get_bool(ONLINE_SCHEMA_UPDATE_KEY, false);
        debug!(
            address = connection.address(),
            namespace = config.namespace.as_deref().unwrap_or(""),
            schema_update_enabled,
            "store operations ready"
        );
        Self {
            connection,
            config: Arc::new(config),
            schema_update_enabled,
            admin_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<dyn BackendConnection> {
        &self.connection
    }

    pub fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    pub fn is_schema_update_enabled(&self) -> bool {
        self.schema_update_enabled
    }

    pub fn qualified_table_name(&self, name: &str) -> TableName {
        TableName::qualified(self.namespace(), name)
    }

    fn admin(&self) -> Result<MutexGuard<'_, ()>> {
        self.admin_lock.lock().map_err(|_| Error::AdminLockPoisoned)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        self.connection.table_exists(&self.qualified_table_name(name))
    }

    /// `false` when the table itself does not exist.
    pub fn column_family_exists(&self, name: &str, family: &[u8]) -> Result<bool> {
        match self.connection.describe_table(&self.qualified_table_name(name)) {
            Ok(descriptor) => Ok(descriptor.has_family(family)),
            Err(err) if err.is_table_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Creates the table unless it already exists. Split points are sorted
    /// and deduplicated; empty split points are ignored.
    pub fn create_table(&self, name: &str, families: &[ByteId], splits: &[ByteId]) -> Result<()> {
        let table = self.qualified_table_name(name);
        let _admin = self.admin()?;
        if self.connection.table_exists(&table)? {
            debug!(table = %table, "table already exists");
            return Ok(());
        }
        let mut split_keys: Vec<ByteId> = splits.iter().filter(|s| !s.is_empty()).cloned().collect();
        split_keys.sort();
        split_keys.dedup();
        let descriptor = TableDescriptor::new(table.clone()).with_families(families.iter().cloned());
        match self.connection.create_table(descriptor, &split_keys) {
            Ok(()) => {
                info!(table = %table, families = families.len(), splits = split_keys.len(), "created table");
                Ok(())
            }
            // Another client created it between the probe and the create.
            Err(Error::TableExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Adds any of `families` the table lacks. Returns the number added.
    pub fn add_column_families(&self, name: &str, families: &[ByteId]) -> Result<usize> {
        let table = self.qualified_table_name(name);
        let _admin = self.admin()?;
        let mut descriptor = self.connection.describe_table(&table)?;
        let added = families
            .iter()
            .filter(|family| descriptor.add_family((*family).clone()))
            .count();
        if added == 0 {
            return Ok(0);
        }
        if self.schema_update_enabled {
            self.connection.modify_table(descriptor)?;
        } else {
            let was_enabled = self.connection.is_table_enabled(&table)?;
            if was_enabled {
                self.connection.disable_table(&table)?;
            }
            let modified = self.connection.modify_table(descriptor);
            if was_enabled {
                self.connection.enable_table(&table)?;
            }
            modified?;
        }
        info!(table = %table, added, "added column families");
        Ok(added)
    }

    /// Disables and drops the table. Failures are logged and reported as
    /// `false`.
    pub fn delete_table(&self, name: &str) -> bool {
        let table = self.qualified_table_name(name);
        let result = self.admin().and_then(|_admin| self.disable_and_drop(&table));
        match result {
            Ok(()) => {
                info!(table = %table, "deleted table");
                true
            }
            Err(err) => {
                warn!(table = %table, error = %err, "unable to delete table");
                false
            }
        }
    }

    /// Deletes every table whose name starts with the namespace, or every
    /// table when no namespace is configured.
    pub fn delete_all_tables(&self) -> Result<Vec<TableName>> {
        let _admin = self.admin()?;
        let prefix = self.namespace().unwrap_or("");
        let mut deleted = Vec::new();
        for table in self.connection.list_tables()? {
            if !table.as_str().starts_with(prefix) {
                continue;
            }
            self.disable_and_drop(&table)?;
            debug!(table = %table, "deleted table");
            deleted.push(table);
        }
        info!(namespace = prefix, tables = deleted.len(), "deleted namespace tables");
        Ok(deleted)
    }

    fn disable_and_drop(&self, table: &TableName) -> Result<()> {
        if self.connection.is_table_enabled(table)? {
            self.connection.disable_table(table)?;
        }
        self.connection.drop_table(table)
    }

    /// Attaches `spec` to the table and waits for the change to reach every
    /// region, within the bounds of `control`.
    pub fn ensure_coprocessor(
        &self,
        name: &str,
        spec: &CoprocessorSpec,
        control: &InstallControl,
    ) -> Result<CoprocessorOutcome> {
        let table = self.qualified_table_name(name);
        let _admin = self.admin()?;
        let outcome = coprocessor::install(
            self.connection.as_ref(),
            &table,
            spec,
            self.schema_update_enabled,
            control,
        )?;
        match outcome {
            CoprocessorOutcome::TimedOut { regions_remaining } => warn!(
                table = %table,
                coprocessor = %spec.class_name,
                regions_remaining,
                "coprocessor roll-out timed out"
            ),
            CoprocessorOutcome::Cancelled => warn!(
                table = %table,
                coprocessor = %spec.class_name,
                "coprocessor install cancelled"
            ),
            CoprocessorOutcome::Installed => info!(
                table = %table,
                coprocessor = %spec.class_name,
                "installed coprocessor"
            ),
            CoprocessorOutcome::AlreadyInstalled => {}
        }
        Ok(outcome)
    }

    /// Installs the configured pushdown coprocessor, if any, on a backend
    /// that can host it.
    pub fn ensure_configured_coprocessor(&self, name: &str) -> Result<Option<CoprocessorOutcome>> {
        let Some(class_name) = self.config.coprocessor_class.as_deref() else {
            return Ok(None);
        };
        if !self.connection.supports_coprocessors() {
            debug!(variant = %self.connection.variant(), "backend cannot host coprocessors");
            return Ok(None);
        }
        let mut spec = CoprocessorSpec::new(class_name);
        spec.jar_path = self.config.coprocessor_jar.clone();
        let control = InstallControl::from_config(&self.config);
        self.ensure_coprocessor(name, &spec, &control).map(Some)
    }

    /// Opens a scanner for `request`. Rows are fetched lazily.
    pub fn scan(&self, request: &ScanRequest) -> Result<ScanStream> {
        debug!(
            table = %request.table(),
            ranges = request.ranges().ranges().len(),
            caching = request.caching(),
            first_batch = request.first_batch(),
            cache_blocks = request.cache_blocks(),
            server_filter = request.server_filter().is_some(),
            "opening scanner"
        );
        let scanner = self.connection.open_scanner(request)?;
        Ok(ScanStream::new(request.table().clone(), scanner, request.caching())
            .with_first_batch(request.first_batch()))
    }

    pub fn region_boundaries(&self, name: &str) -> Result<Vec<ByteId>> {
        self.connection
            .region_start_keys(&self.qualified_table_name(name))
    }

    /// Returns a buffered writer, creating the table and any missing
    /// families first when `create_table` is set.
    pub fn create_writer(
        &self,
        name: &str,
        families: &[ByteId],
        create_table: bool,
        splits: &[ByteId],
    ) -> Result<TableWriter> {
        let table = self.qualified_table_name(name);
        if create_table {
            self.create_table(name, families, splits)?;
            self.add_column_families(name, families)?;
        } else if !self.connection.table_exists(&table)? {
            return Err(Error::TableNotFound(table.to_string()));
        }
        Ok(TableWriter::new(
            self.connection.clone(),
            table,
            self.config.writer_buffer_size,
        ))
    }
}
