//! Entry types the workload writes and queries.

use std::sync::Arc;

use bytes::Bytes;
use keyspan_core::{ByteId, CodecRegistry, FieldCodec, FieldCodecs};
use keyspan_query::{AdapterRow, DataAdapter, EncodedEntry, EncodedField, Index, MergeTransform};

pub const READING_ADAPTER: &str = "reading";
pub const HITS_ADAPTER: &str = "hits";

pub fn readings_index() -> Index {
    Index::new("readings").with_dimension_fields(["cell"])
}

/// Index position of a grid cell.
pub fn cell_position(cell: u32) -> ByteId {
    ByteId::from(cell.to_be_bytes().to_vec())
}

/// One sensor measurement, indexed by the grid cells it covers.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub id: String,
    pub sensor: String,
    pub cell: u64,
    pub value: f64,
    pub flagged: bool,
}

pub struct ReadingAdapter {
    codecs: FieldCodecs,
}

impl ReadingAdapter {
    pub fn new(registry: &CodecRegistry) -> anyhow::Result<Self> {
        let mut codecs = FieldCodecs::new();
        codecs.bind::<u64>(registry, "cell")?;
        codecs.bind::<String>(registry, "sensor")?;
        codecs.bind::<f64>(registry, "value")?;
        codecs.bind::<bool>(registry, "flagged")?;
        Ok(Self { codecs })
    }

    fn field<V: 'static>(&self, field_id: &str, value: &V) -> EncodedField {
        let bytes = self
            .codecs
            .write(field_id.as_bytes(), Some(value))
            .unwrap_or_default();
        EncodedField::new(field_id, bytes)
    }
}

impl DataAdapter<Reading> for ReadingAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from(READING_ADAPTER)
    }

    fn field_ids(&self) -> Vec<ByteId> {
        self.codecs.field_ids()
    }

    fn decode(&self, row: &AdapterRow, _index: &Index) -> Option<Reading> {
        Some(Reading {
            id: row.row_id().data_id().to_string_lossy(),
            cell: row.read_field(&self.codecs, b"cell")?,
            sensor: row.read_field(&self.codecs, b"sensor")?,
            value: row.read_field(&self.codecs, b"value")?,
            flagged: row.read_field(&self.codecs, b"flagged").unwrap_or(false),
        })
    }

    fn encode(&self, reading: &Reading, _index: &Index) -> EncodedEntry {
        EncodedEntry {
            data_id: ByteId::from(reading.id.as_str()),
            fields: vec![
                self.field("cell", &reading.cell),
                self.field("sensor", &reading.sensor),
                self.field("value", &reading.value),
                self.field("flagged", &reading.flagged),
            ],
        }
    }

    fn field_codecs(&self) -> Option<&FieldCodecs> {
        Some(&self.codecs)
    }
}

/// Number of readings that landed in a cell. Every reading adds one row; a
/// query folds them into a single total per cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellHits {
    pub cell: u64,
    pub hits: u64,
}

pub struct HitsAdapter {
    counter: FieldCodec<u64>,
}

impl HitsAdapter {
    pub fn new(registry: &CodecRegistry) -> anyhow::Result<Self> {
        Ok(Self {
            counter: registry
                .codec()
                .ok_or_else(|| anyhow::anyhow!("no u64 codec registered"))?,
        })
    }
}

struct SumHits {
    counter: FieldCodec<u64>,
}

impl MergeTransform for SumHits {
    fn merge(&self, accumulated: &mut AdapterRow, next: AdapterRow) {
        let read = |row: &AdapterRow| {
            row.field(b"hits")
                .and_then(|raw| self.counter.read(raw))
                .unwrap_or(0)
        };
        let total = read(accumulated).saturating_add(read(&next));
        accumulated.set_field("hits", Bytes::from(self.counter.write(Some(&total))));
    }
}

impl DataAdapter<CellHits> for HitsAdapter {
    fn adapter_id(&self) -> ByteId {
        ByteId::from(HITS_ADAPTER)
    }

    fn field_ids(&self) -> Vec<ByteId> {
        vec![ByteId::from("cell"), ByteId::from("hits")]
    }

    fn decode(&self, row: &AdapterRow, _index: &Index) -> Option<CellHits> {
        Some(CellHits {
            cell: self.counter.read(row.field(b"cell")?)?,
            hits: self.counter.read(row.field(b"hits")?)?,
        })
    }

    fn encode(&self, hits: &CellHits, _index: &Index) -> EncodedEntry {
        EncodedEntry {
            data_id: ByteId::from("hits"),
            fields: vec![
                EncodedField::new("cell", self.counter.write(Some(&hits.cell))),
                EncodedField::new("hits", self.counter.write(Some(&hits.hits))),
            ],
        }
    }

    fn merge_transform(&self) -> Option<Arc<dyn MergeTransform>> {
        Some(Arc::new(SumHits {
            counter: self.counter.clone(),
        }))
    }
}
