//! Field codec registry.
//!
//! Each logical value type has one reader/writer pair that converts values to
//! and from the bytes stored in a cell. The registry is an open mapping keyed
//! by the Rust type, built once and read-only afterwards; supporting a new
//! type means registering a codec for it, never editing an existing one.

mod base;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::id::ByteId;

pub use base::{
    BoolCodec, ByteIdCodec, BytesCodec, F32Codec, F64Codec, I16Codec, I32Codec, I64Codec, I8Codec,
    StringCodec, U64Codec, U8Codec,
};

/// Decodes a cell value. Must never panic: malformed input yields `None`.
pub trait FieldReader<T>: Send + Sync {
    fn read_field(&self, bytes: &[u8]) -> Option<T>;
}

/// Encodes a cell value and derives its visibility label.
pub trait FieldWriter<T>: Send + Sync {
    fn write_field(&self, value: Option<&T>) -> Vec<u8>;

    /// Visibility label for `value` of field `field_id` within `row`.
    fn visibility(&self, _row: &dyn Any, _field_id: &ByteId, _value: Option<&T>) -> Vec<u8> {
        Vec::new()
    }
}

type VisibilityFn<T> = dyn Fn(&dyn Any, &ByteId, Option<&T>) -> Vec<u8> + Send + Sync;

/// Reader/writer pair for one logical type.
pub struct FieldCodec<T> {
    reader: Arc<dyn FieldReader<T>>,
    writer: Arc<dyn FieldWriter<T>>,
}

impl<T> Clone for FieldCodec<T> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<T> fmt::Debug for FieldCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: 'static> FieldCodec<T> {
    pub fn new(reader: Arc<dyn FieldReader<T>>, writer: Arc<dyn FieldWriter<T>>) -> Self {
        Self { reader, writer }
    }

    /// Builds a codec from one value implementing both halves.
    pub fn from_shared<C>(codec: C) -> Self
    where
        C: FieldReader<T> + FieldWriter<T> + 'static,
    {
        let shared = Arc::new(codec);
        Self {
            reader: shared.clone(),
            writer: shared,
        }
    }

    /// Replaces the visibility derivation while keeping the byte encoding.
    pub fn with_visibility<F>(self, derive: F) -> Self
    where
        F: Fn(&dyn Any, &ByteId, Option<&T>) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            reader: self.reader,
            writer: Arc::new(LabelledWriter {
                inner: self.writer,
                derive: Box::new(derive),
            }),
        }
    }

    pub fn reader(&self) -> Arc<dyn FieldReader<T>> {
        self.reader.clone()
    }

    pub fn writer(&self) -> Arc<dyn FieldWriter<T>> {
        self.writer.clone()
    }

    pub fn read(&self, bytes: &[u8]) -> Option<T> {
        self.reader.read_field(bytes)
    }

    pub fn write(&self, value: Option<&T>) -> Vec<u8> {
        self.writer.write_field(value)
    }

    pub fn visibility(&self, row: &dyn Any, field_id: &ByteId, value: Option<&T>) -> Vec<u8> {
        self.writer.visibility(row, field_id, value)
    }
}

struct LabelledWriter<T> {
    inner: Arc<dyn FieldWriter<T>>,
    derive: Box<VisibilityFn<T>>,
}

impl<T> FieldWriter<T> for LabelledWriter<T> {
    fn write_field(&self, value: Option<&T>) -> Vec<u8> {
        self.inner.write_field(value)
    }

    fn visibility(&self, row: &dyn Any, field_id: &ByteId, value: Option<&T>) -> Vec<u8> {
        (self.derive)(row, field_id, value)
    }
}

#[derive(Clone)]
struct RegisteredCodec {
    type_name: &'static str,
    codec: Arc<dyn Any + Send + Sync>,
}

/// Mapping from logical type to its codec.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<TypeId, RegisteredCodec>,
}

static GLOBAL_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();

impl CodecRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(FieldCodec::<bool>::from_shared(BoolCodec));
        registry.register(FieldCodec::<i8>::from_shared(I8Codec));
        registry.register(FieldCodec::<u8>::from_shared(U8Codec));
        registry.register(FieldCodec::<i16>::from_shared(I16Codec));
        registry.register(FieldCodec::<i32>::from_shared(I32Codec));
        registry.register(FieldCodec::<i64>::from_shared(I64Codec));
        registry.register(FieldCodec::<u64>::from_shared(U64Codec));
        registry.register(FieldCodec::<f32>::from_shared(F32Codec));
        registry.register(FieldCodec::<f64>::from_shared(F64Codec));
        registry.register(FieldCodec::<String>::from_shared(StringCodec));
        registry.register(FieldCodec::<Vec<u8>>::from_shared(BytesCodec));
        registry.register(FieldCodec::<ByteId>::from_shared(ByteIdCodec));
        registry
    }

    /// Process-wide registry of built-in codecs, initialised on first use.
    pub fn global() -> &'static CodecRegistry {
        GLOBAL_REGISTRY.get_or_init(Self::with_defaults)
    }

    /// Registers `codec` for `T`, returning `true` if it replaced one.
    pub fn register<T: 'static>(&mut self, codec: FieldCodec<T>) -> bool {
        let type_name = std::any::type_name::<T>();
        tracing::debug!(field_type = type_name, "registering field codec");
        self.codecs
            .insert(
                TypeId::of::<T>(),
                RegisteredCodec {
                    type_name,
                    codec: Arc::new(codec),
                },
            )
            .is_some()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.codecs.contains_key(&TypeId::of::<T>())
    }

    pub fn codec<T: 'static>(&self) -> Option<FieldCodec<T>> {
        self.codecs
            .get(&TypeId::of::<T>())?
            .codec
            .downcast_ref::<FieldCodec<T>>()
            .cloned()
    }

    pub fn reader<T: 'static>(&self) -> Option<Arc<dyn FieldReader<T>>> {
        self.codec::<T>().map(|codec| codec.reader())
    }

    pub fn writer<T: 'static>(&self) -> Option<Arc<dyn FieldWriter<T>>> {
        self.codec::<T>().map(|codec| codec.writer())
    }

    /// Names of every registered type, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.values().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Codecs of one adapter's fields, keyed by field id.
///
/// Each field may use a different logical type; lookups name the type and
/// return `None` when the field is unknown or bound to another type.
#[derive(Clone, Default)]
pub struct FieldCodecs {
    fields: HashMap<ByteId, RegisteredCodec>,
}

impl FieldCodecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: 'static>(&mut self, field_id: impl Into<ByteId>, codec: FieldCodec<T>) {
        self.fields.insert(
            field_id.into(),
            RegisteredCodec {
                type_name: std::any::type_name::<T>(),
                codec: Arc::new(codec),
            },
        );
    }

    /// Binds `field_id` to the codec `registry` holds for `T`.
    pub fn bind<T: 'static>(
        &mut self,
        registry: &CodecRegistry,
        field_id: impl Into<ByteId>,
    ) -> Result<()> {
        let field_id = field_id.into();
        let codec = registry.codec::<T>().ok_or_else(|| Error::MissingCodec {
            field: field_id.to_string_lossy(),
            field_type: std::any::type_name::<T>(),
        })?;
        self.insert(field_id, codec);
        Ok(())
    }

    pub fn codec<T: 'static>(&self, field_id: &[u8]) -> Option<&FieldCodec<T>> {
        self.fields.get(field_id)?.codec.downcast_ref::<FieldCodec<T>>()
    }

    pub fn read<T: 'static>(&self, field_id: &[u8], bytes: &[u8]) -> Option<T> {
        self.codec::<T>(field_id)?.read(bytes)
    }

    /// Encodes `value`; `None` when `field_id` is not bound to `T`.
    pub fn write<T: 'static>(&self, field_id: &[u8], value: Option<&T>) -> Option<Vec<u8>> {
        Some(self.codec::<T>(field_id)?.write(value))
    }

    /// Field ids in byte order.
    pub fn field_ids(&self) -> Vec<ByteId> {
        let mut ids: Vec<_> = self.fields.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for FieldCodecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|(id, entry)| (id.to_string_lossy(), entry.type_name))
            .collect();
        fields.sort_unstable();
        f.debug_struct("FieldCodecs").field("fields", &fields).finish()
    }
}
