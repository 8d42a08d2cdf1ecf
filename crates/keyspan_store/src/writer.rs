use std::sync::Arc;

use bytes::Bytes;
use keyspan_core::ByteId;
use tracing::{debug, warn};

use crate::backend::{BackendConnection, RowMutation};
use crate::error::Result;
use crate::table::TableName;

/// Buffered mutation writer for one table.
///
/// Mutations are sent once the buffer reaches `buffer_size`, on [`flush`],
/// and on [`close`]. Dropping an open writer flushes on a best-effort basis
/// and only logs failures.
///
/// [`flush`]: TableWriter::flush
/// [`close`]: TableWriter::close
pub struct TableWriter {
    connection: Arc<dyn BackendConnection>,
    table: TableName,
    buffer: Vec<RowMutation>,
    buffer_size: usize,
    written: u64,
    closed: bool,
}

impl TableWriter {
    pub(crate) fn new(connection: Arc<dyn BackendConnection>, table: TableName, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            connection,
            table,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            written: 0,
            closed: false,
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Mutations sent to the backend so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn write(&mut self, mutation: RowMutation) -> Result<()> {
        self.buffer.push(mutation);
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn put(
        &mut self,
        row: impl Into<ByteId>,
        family: impl Into<ByteId>,
        qualifier: impl Into<ByteId>,
        value: impl Into<Bytes>,
        visibility: impl Into<ByteId>,
    ) -> Result<()> {
        self.write(RowMutation::put(row, family, qualifier, value).with_visibility(visibility))
    }

    pub fn delete_row(&mut self, row: impl Into<ByteId>) -> Result<()> {
        self.write(RowMutation::DeleteRow { row: row.into() })
    }

    /// On failure the batch stays buffered so a later flush can retry it.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = self.buffer.clone();
        let count = batch.len();
        self.connection.mutate(&self.table, batch)?;
        self.buffer.clear();
        self.written += count as u64;
        debug!(table = %self.table, mutations = count, "flushed writer buffer");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if self.closed || self.buffer.is_empty() {
            return;
        }
        if let Err(err) = self.flush() {
            warn!(
                table = %self.table,
                pending = self.buffer.len(),
                error = %err,
                "dropping writer with unflushed mutations"
            );
        }
    }
}
