use std::sync::Arc;

use keyspan_core::{ByteId, RowId};
use keyspan_store::{Result, RowMutation, StoreOperations, TableWriter};
use tracing::{debug, warn};

use crate::adapter::DataAdapter;
use crate::index::Index;

/// Writes entries of one adapter into an index table.
///
/// Opening the writer creates the table and the adapter's column family if
/// needed and installs the configured pushdown coprocessor. An entry written
/// at several insertion ids becomes one physical row per id, each recording
/// how many duplicates exist. Rows of merge-capable adapters get a unique id
/// suffix so repeated writes of the same entry land in separate rows that a
/// query later folds back together.
pub struct IndexWriter<T> {
    index: Index,
    adapter: Arc<dyn DataAdapter<T>>,
    family: ByteId,
    writer: TableWriter,
    merging: bool,
    unique_salt: u32,
    next_unique: u64,
}

impl<T> IndexWriter<T> {
    pub fn open(
        ops: &StoreOperations,
        index: Index,
        adapter: Arc<dyn DataAdapter<T>>,
        splits: &[ByteId],
    ) -> Result<Self> {
        let family = adapter.adapter_id();
        let writer = ops.create_writer(index.id(), std::slice::from_ref(&family), true, splits)?;
        match ops.ensure_configured_coprocessor(index.id()) {
            Ok(Some(outcome)) => {
                debug!(index = %index.id(), outcome = ?outcome, "pushdown coprocessor checked")
            }
            Ok(None) => {}
            // Queries still filter on the client without the coprocessor.
            Err(err) => warn!(index = %index.id(), error = %err, "unable to install pushdown coprocessor"),
        }
        let merging = adapter.merge_transform().is_some();
        Ok(Self {
            index,
            adapter,
            family,
            writer,
            merging,
            unique_salt: rand::random(),
            next_unique: 0,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn written(&self) -> u64 {
        self.writer.written()
    }

    /// Writes `entry` at every insertion id and returns the row ids used.
    pub fn write(&mut self, entry: &T, insertion_ids: &[ByteId]) -> Result<Vec<RowId>> {
        let encoded = self.adapter.encode(entry, &self.index);
        let duplicates = u32::try_from(insertion_ids.len().saturating_sub(1)).unwrap_or(u32::MAX);
        let mut rows = Vec::with_capacity(insertion_ids.len());
        for insertion_id in insertion_ids {
            let mut row_id =
                RowId::new(insertion_id.clone(), encoded.data_id.clone()).with_duplicates(duplicates);
            if self.merging {
                row_id = row_id.with_unique_id(self.next_unique_id());
            }
            let key = row_id.encode();
            for field in &encoded.fields {
                let put = RowMutation::put(
                    key.clone(),
                    self.family.clone(),
                    field.qualifier.clone(),
                    field.value.clone(),
                );
                self.writer.write(put.with_visibility(field.visibility.clone()))?;
            }
            rows.push(row_id);
        }
        Ok(rows)
    }

    /// Deletes the physical rows previously returned by [`write`](Self::write).
    pub fn delete(&mut self, row_ids: &[RowId]) -> Result<()> {
        for row_id in row_ids {
            self.writer.delete_row(row_id.encode())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    /// Process-random salt followed by a per-writer counter.
    fn next_unique_id(&mut self) -> ByteId {
        let counter = self.next_unique;
        self.next_unique += 1;
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&self.unique_salt.to_be_bytes());
        bytes.extend_from_slice(&counter.to_be_bytes());
        ByteId::from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use keyspan_store::{MemoryBackend, StoreConfig};

    use super::*;
    use crate::adapter::{AdapterRow, EncodedEntry, EncodedField, MergeTransform};

    struct Counter {
        merging: bool,
    }

    struct Sum;

    impl MergeTransform for Sum {
        fn merge(&self, accumulated: &mut AdapterRow, next: AdapterRow) {
            let total = [accumulated.field(b"n"), next.field(b"n")]
                .into_iter()
                .flatten()
                .map(|value| value.first().copied().unwrap_or(0))
                .sum::<u8>();
            accumulated.set_field("n", Bytes::from(vec![total]));
        }
    }

    impl DataAdapter<(String, u8)> for Counter {
        fn adapter_id(&self) -> ByteId {
            ByteId::from("counter")
        }

        fn field_ids(&self) -> Vec<ByteId> {
            vec![ByteId::from("n")]
        }

        fn decode(&self, row: &AdapterRow, _index: &Index) -> Option<(String, u8)> {
            let name = row.row_id().data_id().to_string_lossy();
            Some((name, *row.field(b"n")?.first()?))
        }

        fn encode(&self, entry: &(String, u8), _index: &Index) -> EncodedEntry {
            EncodedEntry {
                data_id: ByteId::from(entry.0.as_str()),
                fields: vec![EncodedField::new("n", Bytes::from(vec![entry.1]))],
            }
        }

        fn merge_transform(&self) -> Option<Arc<dyn MergeTransform>> {
            self.merging.then(|| Arc::new(Sum) as Arc<dyn MergeTransform>)
        }
    }

    fn ops() -> (MemoryBackend, StoreOperations) {
        let backend = MemoryBackend::new("memory://index-writer");
        let ops = StoreOperations::new(
            Arc::new(backend.clone()),
            StoreConfig::new("memory://index-writer"),
        );
        (backend, ops)
    }

    fn open(ops: &StoreOperations, merging: bool) -> IndexWriter<(String, u8)> {
        IndexWriter::<(String, u8)>::open(ops, Index::new("idx"), Arc::new(Counter { merging }), &[])
            .expect("open writer")
    }

    #[test]
    fn duplicates_record_every_insertion_id() {
        let (backend, ops) = ops();
        let mut writer = open(&ops, false);
        let rows = writer
            .write(&("a".to_string(), 1), &[ByteId::from("p1"), ByteId::from("p2"), ByteId::from("p3")])
            .expect("write");
        writer.close().expect("close");

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.duplicates() == 2 && row.unique_id().is_empty()));
        assert_eq!(backend.row_count(&ops.qualified_table_name("idx")), 3);
        assert!(ops.column_family_exists("idx", b"counter").expect("probe"));
    }

    #[test]
    fn merging_adapters_get_distinct_row_ids() {
        let (backend, ops) = ops();
        let mut writer = open(&ops, true);
        let first = writer.write(&("a".to_string(), 1), &[ByteId::from("p")]).expect("write");
        let second = writer.write(&("a".to_string(), 2), &[ByteId::from("p")]).expect("write");
        writer.flush().expect("flush");

        assert_ne!(first[0], second[0]);
        assert_eq!(first[0].logical_key(), second[0].logical_key());
        assert_eq!(first[0].unique_id().len(), 12);
        assert_eq!(backend.row_count(&ops.qualified_table_name("idx")), 2);

        writer.delete(&first).expect("delete");
        writer.close().expect("close");
        assert_eq!(backend.row_count(&ops.qualified_table_name("idx")), 1);
    }

    #[test]
    fn no_insertion_ids_writes_nothing() {
        let (_backend, ops) = ops();
        let mut writer = open(&ops, false);
        assert!(writer.write(&("a".to_string(), 1), &[]).expect("write").is_empty());
        writer.close().expect("close");
        assert_eq!(writer.written(), 0);
    }
}
