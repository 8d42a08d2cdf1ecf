//! Shared fixtures for query integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use keyspan_core::ByteId;
use keyspan_query::{
    AdapterRow, AdapterStore, DataAdapter, EncodedEntry, EncodedField, Index, IndexWriter,
    MergeTransform,
};
use keyspan_store::{MemoryBackend, StoreConfig, StoreOperations};

pub const PUSHDOWN_CLASS: &str = "keyspan.coprocessor.PushdownFilter";

pub fn memory_store(label: &str, config: StoreConfig) -> (MemoryBackend, StoreOperations) {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let address = format!("memory://{label}-{}", NEXT.fetch_add(1, Ordering::Relaxed));
    let backend = MemoryBackend::new(address.clone());
    let config = StoreConfig { address, ..config };
    let ops = StoreOperations::new(Arc::new(backend.clone()), config);
    (backend, ops)
}

pub fn spatial_index() -> Index {
    Index::new("spatial").with_dimension_fields(["x"])
}

/// Index position of a point: its `x` as big-endian bytes.
pub fn position(x: u32) -> ByteId {
    ByteId::from(x.to_be_bytes().to_vec())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Point {
    pub id: String,
    pub x: u32,
    pub tag: String,
}

impl Point {
    pub fn new(x: u32) -> Self {
        Self {
            id: format!("p{x:03}"),
            x,
            tag: if x % 2 == 0 { "even" } else { "odd" }.to_string(),
        }
    }
}

pub struct PointAdapter;

impl DataAdapter<Point> for PointAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from("point")
    }

    fn field_ids(&self) -> Vec<ByteId> {
        vec![ByteId::from("x"), ByteId::from("tag")]
    }

    fn decode(&self, row: &AdapterRow, _index: &Index) -> Option<Point> {
        let raw: [u8; 4] = row.field(b"x")?.as_ref().try_into().ok()?;
        let tag = row
            .field(b"tag")
            .map(|tag| String::from_utf8_lossy(tag).into_owned())
            .unwrap_or_default();
        Some(Point {
            id: row.row_id().data_id().to_string_lossy(),
            x: u32::from_be_bytes(raw),
            tag,
        })
    }

    fn encode(&self, point: &Point, _index: &Index) -> EncodedEntry {
        EncodedEntry {
            data_id: ByteId::from(point.id.as_str()),
            fields: vec![
                EncodedField::new("x", Bytes::copy_from_slice(&point.x.to_be_bytes())),
                EncodedField::new("tag", Bytes::from(point.tag.clone())),
            ],
        }
    }
}

/// Same cells as [`PointAdapter`] under another column family.
pub struct MirrorPointAdapter;

impl DataAdapter<Point> for MirrorPointAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from("mirror")
    }

    fn field_ids(&self) -> Vec<ByteId> {
        PointAdapter.field_ids()
    }

    fn decode(&self, row: &AdapterRow, index: &Index) -> Option<Point> {
        PointAdapter.decode(row, index)
    }

    fn encode(&self, point: &Point, index: &Index) -> EncodedEntry {
        PointAdapter.encode(point, index)
    }
}

/// Running count per name; writes add to the stored total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tally {
    pub name: String,
    pub count: u64,
}

pub struct TallyAdapter;

struct SumCounts;

fn count_of(row: &AdapterRow) -> u64 {
    row.field(b"count")
        .and_then(|raw| <[u8; 8]>::try_from(raw.as_ref()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

impl MergeTransform for SumCounts {
    fn merge(&self, accumulated: &mut AdapterRow, next: AdapterRow) {
        let total = count_of(accumulated) + count_of(&next);
        accumulated.set_field("count", Bytes::copy_from_slice(&total.to_be_bytes()));
    }
}

impl DataAdapter<Tally> for TallyAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from("tally")
    }

    fn field_ids(&self) -> Vec<ByteId> {
        vec![ByteId::from("count")]
    }

    fn decode(&self, row: &AdapterRow, _index: &Index) -> Option<Tally> {
        row.field(b"count")?;
        Some(Tally {
            name: row.row_id().data_id().to_string_lossy(),
            count: count_of(row),
        })
    }

    fn encode(&self, tally: &Tally, _index: &Index) -> EncodedEntry {
        EncodedEntry {
            data_id: ByteId::from(tally.name.as_str()),
            fields: vec![EncodedField::new(
                "count",
                Bytes::copy_from_slice(&tally.count.to_be_bytes()),
            )],
        }
    }

    fn merge_transform(&self) -> Option<Arc<dyn MergeTransform>> {
        Some(Arc::new(SumCounts))
    }
}

/// Tallies stored one row per write and never folded.
pub struct PlainTallyAdapter;

impl DataAdapter<Tally> for PlainTallyAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from("plain")
    }

    fn field_ids(&self) -> Vec<ByteId> {
        TallyAdapter.field_ids()
    }

    fn decode(&self, row: &AdapterRow, index: &Index) -> Option<Tally> {
        TallyAdapter.decode(row, index)
    }

    fn encode(&self, tally: &Tally, index: &Index) -> EncodedEntry {
        TallyAdapter.encode(tally, index)
    }
}

pub fn tally(name: &str, count: u64) -> Tally {
    Tally {
        name: name.to_string(),
        count,
    }
}

pub fn point_store() -> AdapterStore<Point> {
    let mut store = AdapterStore::new();
    store.add(Arc::new(PointAdapter));
    store
}

/// Writes points `0..count`, each at its own position.
pub fn ingest_points(ops: &StoreOperations, count: u32) {
    let mut writer =
        IndexWriter::<Point>::open(ops, spatial_index(), Arc::new(PointAdapter), &[]).expect("open writer");
    for x in 0..count {
        writer
            .write(&Point::new(x), &[position(x)])
            .expect("write point");
    }
    writer.close().expect("close writer");
}
