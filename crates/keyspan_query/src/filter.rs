//! Query filters and their server-side payload.
//!
//! Every filter runs on the client over decoded [`AdapterRow`]s. Filters that
//! are also [`DistributableFilter`]s can be serialized into one payload and
//! evaluated next to the data by a coprocessor; the client still applies
//! them, so pushdown only ever saves work.
//!
//! Payload layout (big-endian):
//! `u32 count`, then per filter `u32 id_len | id | u32 len | payload`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use keyspan_core::ByteId;
use keyspan_store::{Error, PushdownEvaluator, RawRow, Result, RowPredicate};
use tracing::debug;

use crate::adapter::AdapterRow;

pub trait QueryFilter: Send + Sync {
    fn accept(&self, row: &AdapterRow) -> bool;
}

/// Logical AND of its members.
pub struct FilterList {
    filters: Vec<Arc<dyn QueryFilter>>,
}

impl FilterList {
    pub fn new(filters: Vec<Arc<dyn QueryFilter>>) -> Self {
        Self { filters }
    }

    /// No filters yields `None`, a single filter is used as is, several are
    /// wrapped in a list.
    pub fn combine(mut filters: Vec<Arc<dyn QueryFilter>>) -> Option<Arc<dyn QueryFilter>> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Arc::new(FilterList::new(filters))),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl QueryFilter for FilterList {
    fn accept(&self, row: &AdapterRow) -> bool {
        self.filters.iter().all(|filter| filter.accept(row))
    }
}

/// A filter that can be shipped to and rebuilt by the backend.
pub trait DistributableFilter: QueryFilter {
    /// Key under which a [`FilterFactory`] knows how to rebuild the filter.
    fn filter_id(&self) -> &str;

    fn to_payload(&self) -> Vec<u8>;
}

/// Runs a distributable filter in the client chain.
pub(crate) struct ClientSide(pub(crate) Arc<dyn DistributableFilter>);

impl QueryFilter for ClientSide {
    fn accept(&self, row: &AdapterRow) -> bool {
        self.0.accept(row)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparison {
    fn code(self) -> u8 {
        match self {
            Comparison::Equal => 0,
            Comparison::Less => 1,
            Comparison::LessOrEqual => 2,
            Comparison::Greater => 3,
            Comparison::GreaterOrEqual => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Comparison::Equal,
            1 => Comparison::Less,
            2 => Comparison::LessOrEqual,
            3 => Comparison::Greater,
            4 => Comparison::GreaterOrEqual,
            _ => return None,
        })
    }
}

/// Compares one field's encoded bytes against a constant, in unsigned
/// byte order. Rows without the field are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldValueFilter {
    field: ByteId,
    comparison: Comparison,
    value: Bytes,
}

impl FieldValueFilter {
    pub const ID: &'static str = "field_value";

    pub fn new(field: impl Into<ByteId>, comparison: Comparison, value: impl Into<Bytes>) -> Self {
        Self {
            field: field.into(),
            comparison,
            value: value.into(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let code = take_u8(&mut buf)?;
        let comparison = Comparison::from_code(code)
            .ok_or_else(|| Error::FilterConstruction(format!("unknown comparison code {code}")))?;
        let field = take_chunk(&mut buf)?;
        Ok(Self {
            field: ByteId::from(field),
            comparison,
            value: Bytes::copy_from_slice(buf),
        })
    }
}

impl QueryFilter for FieldValueFilter {
    fn accept(&self, row: &AdapterRow) -> bool {
        let Some(actual) = row.field(self.field.as_bytes()) else {
            return false;
        };
        let ordering = actual[..].cmp(&self.value[..]);
        match self.comparison {
            Comparison::Equal => ordering.is_eq(),
            Comparison::Less => ordering.is_lt(),
            Comparison::LessOrEqual => ordering.is_le(),
            Comparison::Greater => ordering.is_gt(),
            Comparison::GreaterOrEqual => ordering.is_ge(),
        }
    }
}

impl DistributableFilter for FieldValueFilter {
    fn filter_id(&self) -> &str {
        Self::ID
    }

    fn to_payload(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(1 + 4 + self.field.len() + self.value.len());
        out.put_u8(self.comparison.code());
        out.put_u32(self.field.len() as u32);
        out.put_slice(self.field.as_bytes());
        out.put_slice(&self.value);
        out.to_vec()
    }
}

pub type FilterDecoder = fn(&[u8]) -> Result<Arc<dyn DistributableFilter>>;

/// Rebuilds distributable filters from `(filter_id, payload)` pairs.
#[derive(Clone)]
pub struct FilterFactory {
    decoders: HashMap<String, FilterDecoder>,
}

impl FilterFactory {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register(FieldValueFilter::ID, |payload| {
            Ok(Arc::new(FieldValueFilter::decode(payload)?) as Arc<dyn DistributableFilter>)
        });
        factory
    }

    pub fn register(&mut self, filter_id: impl Into<String>, decoder: FilterDecoder) {
        self.decoders.insert(filter_id.into(), decoder);
    }

    pub fn build(&self, filter_id: &str, payload: &[u8]) -> Result<Arc<dyn DistributableFilter>> {
        let decoder = self
            .decoders
            .get(filter_id)
            .ok_or_else(|| Error::FilterConstruction(format!("unknown filter id '{filter_id}'")))?;
        decoder(payload)
    }
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Serializes distributable filters into a server filter payload.
pub trait ServerFilterBuilder: Send + Sync {
    fn build(&self, filters: &[Arc<dyn DistributableFilter>]) -> Result<Bytes>;
}

/// Default payload format; see the module docs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DistributableFilterCodec;

impl DistributableFilterCodec {
    pub fn decode(payload: &[u8]) -> Result<Vec<(String, Bytes)>> {
        let mut buf = payload;
        let count = take_u32(&mut buf)? as usize;
        // Every entry needs at least its two length prefixes.
        if count > buf.len() / 8 {
            return Err(Error::FilterConstruction(format!(
                "filter count {count} exceeds payload size {}",
                payload.len()
            )));
        }
        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let id = take_chunk(&mut buf)?;
            let id = std::str::from_utf8(id)
                .map_err(|_| Error::FilterConstruction("filter id is not UTF-8".to_string()))?
                .to_string();
            let body = Bytes::copy_from_slice(take_chunk(&mut buf)?);
            filters.push((id, body));
        }
        if !buf.is_empty() {
            return Err(Error::FilterConstruction(format!(
                "{} trailing bytes after filters",
                buf.len()
            )));
        }
        Ok(filters)
    }
}

impl ServerFilterBuilder for DistributableFilterCodec {
    fn build(&self, filters: &[Arc<dyn DistributableFilter>]) -> Result<Bytes> {
        let count = u32::try_from(filters.len())
            .map_err(|_| Error::FilterConstruction("too many filters".to_string()))?;
        let mut out = BytesMut::new();
        out.put_u32(count);
        for filter in filters {
            let id = filter.filter_id().as_bytes();
            let payload = filter.to_payload();
            out.put_u32(chunk_len(id.len())?);
            out.put_slice(id);
            out.put_u32(chunk_len(payload.len())?);
            out.put_slice(&payload);
        }
        Ok(out.freeze())
    }
}

fn chunk_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::FilterConstruction(format!("chunk of {len} bytes too large")))
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::FilterConstruction("truncated payload".to_string()));
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::FilterConstruction("truncated length prefix".to_string()));
    }
    Ok(buf.get_u32())
}

fn take_chunk<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = take_u32(buf)? as usize;
    if buf.len() < len {
        return Err(Error::FilterConstruction(format!(
            "chunk of {len} bytes overruns payload ({} left)",
            buf.len()
        )));
    }
    let current: &'a [u8] = *buf;
    let (chunk, rest) = current.split_at(len);
    *buf = rest;
    Ok(chunk)
}

/// Backend-side evaluator for [`DistributableFilterCodec`] payloads.
///
/// A row is kept when any of its column families, read as an adapter row,
/// passes every filter. Rows whose key is not a valid row id are kept and
/// left for the client to judge.
#[derive(Clone, Default)]
pub struct PushdownFilterEvaluator {
    factory: FilterFactory,
}

impl PushdownFilterEvaluator {
    pub fn new(factory: FilterFactory) -> Self {
        Self { factory }
    }
}

impl PushdownEvaluator for PushdownFilterEvaluator {
    fn prepare(&self, payload: &[u8]) -> Result<RowPredicate> {
        let filters = DistributableFilterCodec::decode(payload)?
            .into_iter()
            .map(|(id, body)| self.factory.build(&id, &body))
            .collect::<Result<Vec<_>>>()?;
        debug!(filters = filters.len(), "prepared pushdown filters");
        Ok(Box::new(move |raw: &RawRow| match AdapterRow::split_raw(raw) {
            Ok(rows) => rows
                .iter()
                .any(|row| filters.iter().all(|filter| filter.accept(row))),
            Err(_) => true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use keyspan_core::RowId;
    use keyspan_store::Cell;

    use super::*;

    fn row(value: &'static [u8]) -> AdapterRow {
        AdapterRow::new(RowId::new("i", "d"), ByteId::from("a")).with_field("speed", Bytes::from_static(value))
    }

    #[test]
    fn combine_collapses_trivial_lists() {
        assert!(FilterList::combine(Vec::new()).is_none());
        let single: Arc<dyn QueryFilter> = Arc::new(FieldValueFilter::new("speed", Comparison::Equal, "x"));
        let combined = FilterList::combine(vec![single.clone()]).expect("one filter");
        assert!(Arc::ptr_eq(&single, &combined));

        let list = FilterList::combine(vec![
            Arc::new(FieldValueFilter::new("speed", Comparison::GreaterOrEqual, &b"\x10"[..])),
            Arc::new(FieldValueFilter::new("speed", Comparison::Less, &b"\x20"[..])),
        ])
        .expect("list");
        assert!(list.accept(&row(b"\x10")));
        assert!(list.accept(&row(b"\x1f")));
        assert!(!list.accept(&row(b"\x20")));
    }

    #[test]
    fn field_value_filter_rejects_missing_fields() {
        let filter = FieldValueFilter::new("heading", Comparison::Equal, "n");
        assert!(!filter.accept(&row(b"n")));
    }

    #[test]
    fn payload_decodes_to_equivalent_filters() {
        let filters: Vec<Arc<dyn DistributableFilter>> = vec![
            Arc::new(FieldValueFilter::new("speed", Comparison::Greater, &b"\x05"[..])),
            Arc::new(FieldValueFilter::new("speed", Comparison::LessOrEqual, &b"\x09"[..])),
        ];
        let payload = DistributableFilterCodec.build(&filters).expect("build");
        assert_eq!(&payload[..4], &2u32.to_be_bytes());

        let decoded = DistributableFilterCodec::decode(&payload).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, FieldValueFilter::ID);

        let factory = FilterFactory::with_defaults();
        for ((id, body), original) in decoded.iter().zip(&filters) {
            let rebuilt = factory.build(id, body).expect("rebuild");
            assert_eq!(rebuilt.to_payload(), original.to_payload());
        }
    }

    #[test]
    fn malformed_payloads_are_construction_errors() {
        assert!(matches!(
            DistributableFilterCodec::decode(&[0, 0]),
            Err(Error::FilterConstruction(_))
        ));
        assert!(DistributableFilterCodec::decode(&[0, 0, 0, 9]).is_err());
        let mut overrun = vec![0, 0, 0, 1, 0, 0, 0, 50];
        overrun.extend_from_slice(b"short");
        assert!(DistributableFilterCodec::decode(&overrun).is_err());
        assert!(FilterFactory::with_defaults().build("nope", &[]).is_err());
        assert!(FieldValueFilter::decode(&[9, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn evaluator_keeps_rows_passing_in_any_family() {
        let filters: Vec<Arc<dyn DistributableFilter>> =
            vec![Arc::new(FieldValueFilter::new("speed", Comparison::Equal, &b"\x07"[..]))];
        let payload = DistributableFilterCodec.build(&filters).expect("build");
        let accept = PushdownFilterEvaluator::default()
            .prepare(&payload)
            .expect("prepare");

        let raw = |family: &str, value: &'static [u8]| RawRow {
            key: RowId::new("i", "d").encode(),
            cells: vec![Cell {
                family: ByteId::from(family),
                qualifier: ByteId::from("speed"),
                value: Bytes::from_static(value),
                visibility: ByteId::empty(),
                timestamp: 1,
            }],
        };
        assert!(accept(&raw("a", b"\x07")));
        assert!(!accept(&raw("a", b"\x08")));
        let unparseable = RawRow {
            key: ByteId::from("x"),
            cells: Vec::new(),
        };
        assert!(accept(&unparseable));
    }
}
