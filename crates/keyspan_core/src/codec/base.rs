//! Built-in codecs for primitive field types.
//!
//! Numerics are fixed-width big-endian. Readers look at the leading bytes and
//! return `None` when the input is shorter than the type. Writers emit an
//! empty value for `None`, except the boolean writer which emits `[0]`.

use super::{FieldReader, FieldWriter};
use crate::id::ByteId;

/// Single-byte boolean. Any byte that is positive as a signed value reads as
/// `true`; `None` and `false` both write `[0]`.
pub struct BoolCodec;

impl FieldReader<bool> for BoolCodec {
    fn read_field(&self, bytes: &[u8]) -> Option<bool> {
        let first = *bytes.first()?;
        Some((first as i8) > 0)
    }
}

impl FieldWriter<bool> for BoolCodec {
    fn write_field(&self, value: Option<&bool>) -> Vec<u8> {
        vec![u8::from(value.copied().unwrap_or(false))]
    }
}

macro_rules! fixed_width_codec {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $width:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl FieldReader<$ty> for $name {
            fn read_field(&self, bytes: &[u8]) -> Option<$ty> {
                let raw: [u8; $width] = bytes.get(..$width)?.try_into().ok()?;
                Some(<$ty>::from_be_bytes(raw))
            }
        }

        impl FieldWriter<$ty> for $name {
            fn write_field(&self, value: Option<&$ty>) -> Vec<u8> {
                value.map(|v| v.to_be_bytes().to_vec()).unwrap_or_default()
            }
        }
    };
}

fixed_width_codec!(I8Codec, i8, 1);
fixed_width_codec!(U8Codec, u8, 1);
fixed_width_codec!(I16Codec, i16, 2);
fixed_width_codec!(I32Codec, i32, 4);
fixed_width_codec!(I64Codec, i64, 8);
fixed_width_codec!(U64Codec, u64, 8);
fixed_width_codec!(
    /// IEEE-754 bits, big-endian.
    F32Codec,
    f32,
    4
);
fixed_width_codec!(
    /// IEEE-754 bits, big-endian.
    F64Codec,
    f64,
    8
);

/// UTF-8 text. Empty or invalid input reads as `None`.
pub struct StringCodec;

impl FieldReader<String> for StringCodec {
    fn read_field(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

impl FieldWriter<String> for StringCodec {
    fn write_field(&self, value: Option<&String>) -> Vec<u8> {
        value.map(|v| v.as_bytes().to_vec()).unwrap_or_default()
    }
}

pub struct BytesCodec;

impl FieldReader<Vec<u8>> for BytesCodec {
    fn read_field(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        (!bytes.is_empty()).then(|| bytes.to_vec())
    }
}

impl FieldWriter<Vec<u8>> for BytesCodec {
    fn write_field(&self, value: Option<&Vec<u8>>) -> Vec<u8> {
        value.cloned().unwrap_or_default()
    }
}

pub struct ByteIdCodec;

impl FieldReader<ByteId> for ByteIdCodec {
    fn read_field(&self, bytes: &[u8]) -> Option<ByteId> {
        (!bytes.is_empty()).then(|| ByteId::from(bytes))
    }
}

impl FieldWriter<ByteId> for ByteIdCodec {
    fn write_field(&self, value: Option<&ByteId>) -> Vec<u8> {
        value.map(ByteId::to_vec).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecRegistry;

    #[test]
    fn boolean_contract() {
        let codec = CodecRegistry::global().codec::<bool>().expect("bool codec");
        assert_eq!(codec.read(&[]), None);
        assert_eq!(codec.read(&[0]), Some(false));
        assert_eq!(codec.read(&[1]), Some(true));
        assert_eq!(codec.read(&[5]), Some(true));
        assert_eq!(codec.read(&[1, 0, 0]), Some(true));
        assert_eq!(codec.write(None), vec![0]);
        assert_eq!(codec.write(Some(&false)), vec![0]);
        assert_eq!(codec.write(Some(&true)), vec![1]);
        assert!(codec
            .visibility(&(), &ByteId::from("f"), Some(&true))
            .is_empty());
    }

    #[test]
    fn boolean_reads_high_bytes_as_signed() {
        assert_eq!(BoolCodec.read_field(&[0x7F]), Some(true));
        assert_eq!(BoolCodec.read_field(&[0x80]), Some(false));
        assert_eq!(BoolCodec.read_field(&[0xFF]), Some(false));
    }

    #[test]
    fn undersized_numeric_input_reads_as_none() {
        assert_eq!(I64Codec.read_field(&[0; 7]), None);
        assert_eq!(I32Codec.read_field(&[]), None);
        assert_eq!(F64Codec.read_field(&[0; 3]), None);
        assert_eq!(U8Codec.read_field(&[]), None);
        assert_eq!(I16Codec.read_field(&[0x01, 0x02, 0xFF]), Some(0x0102));
    }

    #[test]
    fn write_read_is_a_fixed_point() {
        fn check<T: PartialEq + std::fmt::Debug + 'static>(values: &[T]) {
            let codec = CodecRegistry::global().codec::<T>().expect("registered codec");
            for value in values {
                let bytes = codec.write(Some(value));
                let read = codec.read(&bytes);
                assert_eq!(read.as_ref(), Some(value));
                assert_eq!(codec.write(read.as_ref()), bytes);
            }
        }

        check(&[true, false]);
        check(&[i8::MIN, -1, 0, i8::MAX]);
        check(&[0u8, 200, u8::MAX]);
        check(&[i16::MIN, 0, i16::MAX]);
        check(&[i32::MIN, -7, 0, i32::MAX]);
        check(&[i64::MIN, 0, 1_707_654_000_000, i64::MAX]);
        check(&[0u64, u64::MAX]);
        check(&[0.0f32, -1.5, f32::MAX]);
        check(&[0.0f64, 3.25, f64::MIN_POSITIVE]);
        check(&["a".to_string(), "grüße".to_string()]);
        check(&[vec![0u8], vec![1, 2, 3]]);
        check(&[ByteId::from("adapter"), ByteId::from([0xFF])]);
    }

    #[test]
    fn none_writes_empty_for_non_boolean_types() {
        assert!(I64Codec.write_field(None).is_empty());
        assert!(StringCodec.write_field(None).is_empty());
        assert_eq!(StringCodec.read_field(&[0xC3, 0x28]), None);
        assert_eq!(BytesCodec.read_field(&[]), None);
    }
}
