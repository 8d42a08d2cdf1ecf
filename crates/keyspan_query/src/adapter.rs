//! Adapters translate between typed entries and the cells of one column
//! family.

use std::collections::btree_map::{self, BTreeMap};
use std::sync::Arc;

use bytes::Bytes;
use keyspan_core::{ByteId, FieldCodecs, RowId};
use keyspan_store::RawRow;

use crate::index::Index;

/// The cells of one physical row that belong to one adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterRow {
    row_id: RowId,
    adapter_id: ByteId,
    fields: BTreeMap<ByteId, Bytes>,
}

impl AdapterRow {
    pub fn new(row_id: RowId, adapter_id: ByteId) -> Self {
        Self {
            row_id,
            adapter_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, qualifier: impl Into<ByteId>, value: impl Into<Bytes>) -> Self {
        self.set_field(qualifier, value);
        self
    }

    pub fn row_id(&self) -> &RowId {
        &self.row_id
    }

    pub fn adapter_id(&self) -> &ByteId {
        &self.adapter_id
    }

    pub fn field(&self, qualifier: &[u8]) -> Option<&Bytes> {
        self.fields.get(qualifier)
    }

    /// Decodes field `qualifier` with the codec bound to it in `codecs`.
    pub fn read_field<V: 'static>(&self, codecs: &FieldCodecs, qualifier: &[u8]) -> Option<V> {
        codecs.read(qualifier, self.field(qualifier)?)
    }

    pub fn set_field(&mut self, qualifier: impl Into<ByteId>, value: impl Into<Bytes>) {
        self.fields.insert(qualifier.into(), value.into());
    }

    pub fn fields(&self) -> btree_map::Iter<'_, ByteId, Bytes> {
        self.fields.iter()
    }

    /// Splits a raw row into one adapter row per column family, in family
    /// order.
    pub fn split_raw(raw: &RawRow) -> keyspan_core::Result<Vec<AdapterRow>> {
        let row_id = RowId::decode(raw.key.as_bytes())?;
        let mut by_family: BTreeMap<&ByteId, AdapterRow> = BTreeMap::new();
        for cell in &raw.cells {
            by_family
                .entry(&cell.family)
                .or_insert_with(|| AdapterRow::new(row_id.clone(), cell.family.clone()))
                .set_field(cell.qualifier.clone(), cell.value.clone());
        }
        Ok(by_family.into_values().collect())
    }
}

/// One field of an encoded entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedField {
    pub qualifier: ByteId,
    pub value: Bytes,
    pub visibility: ByteId,
}

impl EncodedField {
    pub fn new(qualifier: impl Into<ByteId>, value: impl Into<Bytes>) -> Self {
        Self {
            qualifier: qualifier.into(),
            value: value.into(),
            visibility: ByteId::empty(),
        }
    }

    pub fn with_visibility(mut self, visibility: impl Into<ByteId>) -> Self {
        self.visibility = visibility.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedEntry {
    pub data_id: ByteId,
    pub fields: Vec<EncodedField>,
}

/// Folds the physical rows of one logical entry into a single row.
pub trait MergeTransform: Send + Sync {
    /// Folds `next` into `accumulated`. Rows arrive in row-key order.
    fn merge(&self, accumulated: &mut AdapterRow, next: AdapterRow);
}

pub trait DataAdapter<T>: Send + Sync {
    /// Doubles as the column family the adapter's cells live in.
    fn adapter_id(&self) -> ByteId;

    fn field_ids(&self) -> Vec<ByteId>;

    /// `None` when the row does not hold a complete entry.
    fn decode(&self, row: &AdapterRow, index: &Index) -> Option<T>;

    fn encode(&self, entry: &T, index: &Index) -> EncodedEntry;

    /// Per-field readers and writers, for adapters that bind them.
    fn field_codecs(&self) -> Option<&FieldCodecs> {
        None
    }

    /// Adapters whose values combine across physical rows return their fold.
    fn merge_transform(&self) -> Option<Arc<dyn MergeTransform>> {
        None
    }
}

/// Adapters available to a query, keyed by adapter id.
pub struct AdapterStore<T> {
    adapters: BTreeMap<ByteId, Arc<dyn DataAdapter<T>>>,
}

impl<T> AdapterStore<T> {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Replaces any adapter already registered under the same id.
    pub fn add(&mut self, adapter: Arc<dyn DataAdapter<T>>) {
        self.adapters.insert(adapter.adapter_id(), adapter);
    }

    pub fn get(&self, adapter_id: &[u8]) -> Option<&Arc<dyn DataAdapter<T>>> {
        self.adapters.get(adapter_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ByteId> {
        self.adapters.keys()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl<T> Default for AdapterStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AdapterStore<T> {
    fn clone(&self) -> Self {
        Self {
            adapters: self.adapters.clone(),
        }
    }
}
