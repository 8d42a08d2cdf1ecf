use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::id::ByteId;

/// Width of each big-endian length/count field in the row-id trailer.
const TRAILER_FIELD_LEN: usize = 4;
/// Trailer holds the data id length, the unique id length and the duplicate count.
const TRAILER_LEN: usize = TRAILER_FIELD_LEN * 3;

/// Composite row key for one stored entry.
///
/// Layout:
/// `insertion_id | data_id | unique_id | u32 data_id_len | u32 unique_id_len | u32 duplicates`
///
/// The insertion id comes first so rows sort by index position, and rows
/// written for the same entry at the same position sort next to each other.
/// The insertion id length is implied by the total length.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowId {
    insertion_id: ByteId,
    data_id: ByteId,
    unique_id: ByteId,
    duplicates: u32,
}

impl RowId {
    pub fn new(insertion_id: impl Into<ByteId>, data_id: impl Into<ByteId>) -> Self {
        Self {
            insertion_id: insertion_id.into(),
            data_id: data_id.into(),
            unique_id: ByteId::empty(),
            duplicates: 0,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<ByteId>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_duplicates(mut self, duplicates: u32) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn insertion_id(&self) -> &ByteId {
        &self.insertion_id
    }

    pub fn data_id(&self) -> &ByteId {
        &self.data_id
    }

    pub fn unique_id(&self) -> &ByteId {
        &self.unique_id
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    /// Insertion id and data id: the identity shared by every physical row
    /// written for one entry at one index position. The two parts compare
    /// separately, so `("a", "bc")` and `("ab", "c")` stay distinct.
    pub fn logical_key(&self) -> (&ByteId, &ByteId) {
        (&self.insertion_id, &self.data_id)
    }

    pub fn encode(&self) -> ByteId {
        let mut out = BytesMut::with_capacity(
            self.insertion_id.len() + self.data_id.len() + self.unique_id.len() + TRAILER_LEN,
        );
        out.put_slice(self.insertion_id.as_bytes());
        out.put_slice(self.data_id.as_bytes());
        out.put_slice(self.unique_id.as_bytes());
        out.put_u32(self.data_id.len() as u32);
        out.put_u32(self.unique_id.len() as u32);
        out.put_u32(self.duplicates);
        ByteId::from(out.freeze())
    }

    pub fn decode(key: &[u8]) -> Result<Self> {
        if key.len() < TRAILER_LEN {
            return Err(Error::malformed_row_id(key, "shorter than trailer"));
        }
        let trailer_start = key.len() - TRAILER_LEN;
        let data_len = read_u32(&key[trailer_start..]) as usize;
        let unique_len = read_u32(&key[trailer_start + TRAILER_FIELD_LEN..]) as usize;
        let duplicates = read_u32(&key[trailer_start + 2 * TRAILER_FIELD_LEN..]);

        let ids_len = data_len
            .checked_add(unique_len)
            .filter(|len| *len <= trailer_start)
            .ok_or_else(|| Error::malformed_row_id(key, "id lengths exceed key"))?;
        let insertion_end = trailer_start - ids_len;
        let data_end = insertion_end + data_len;

        Ok(Self {
            insertion_id: ByteId::from(&key[..insertion_end]),
            data_id: ByteId::from(&key[insertion_end..data_end]),
            unique_id: ByteId::from(&key[data_end..trailer_start]),
            duplicates,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; TRAILER_FIELD_LEN];
    raw.copy_from_slice(&bytes[..TRAILER_FIELD_LEN]);
    u32::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_components() {
        let id = RowId::new([0x01, 0x02, 0x03], "feature-9")
            .with_unique_id([0x00, 0x00, 0x00, 0x07])
            .with_duplicates(2);
        let decoded = RowId::decode(id.encode().as_bytes()).expect("decode row id");
        assert_eq!(decoded, id);
        assert_eq!(
            decoded.logical_key(),
            (&ByteId::from([0x01, 0x02, 0x03]), &ByteId::from("feature-9"))
        );
    }

    #[test]
    fn insertion_id_prefixes_encoded_key() {
        let id = RowId::new("cell", "d");
        assert!(id.encode().starts_with(b"cell"));
    }

    #[test]
    fn decode_rejects_short_and_inconsistent_keys() {
        assert!(matches!(
            RowId::decode(&[0x00; 5]),
            Err(Error::MalformedRowId { .. })
        ));

        let mut key = vec![b'x'];
        key.extend_from_slice(&50u32.to_be_bytes());
        key.extend_from_slice(&0u32.to_be_bytes());
        key.extend_from_slice(&0u32.to_be_bytes());
        assert!(RowId::decode(&key).is_err());

        let mut overflow = vec![];
        overflow.extend_from_slice(&u32::MAX.to_be_bytes());
        overflow.extend_from_slice(&u32::MAX.to_be_bytes());
        overflow.extend_from_slice(&0u32.to_be_bytes());
        assert!(RowId::decode(&overflow).is_err());
    }

    #[test]
    fn logical_key_keeps_id_boundaries() {
        let left = RowId::new("a", "bc");
        let right = RowId::new("ab", "c");
        assert_ne!(left.logical_key(), right.logical_key());
        assert_eq!(
            left.logical_key(),
            RowId::new("a", "bc").with_unique_id([0x09]).logical_key()
        );
    }

    #[test]
    fn rows_for_one_entry_sort_together() {
        let first = RowId::new("p", "entry").with_unique_id([0x01]).encode();
        let second = RowId::new("p", "entry").with_unique_id([0x02]).encode();
        let other = RowId::new("p", "entrz").encode();
        assert!(first < second);
        assert!(second < other);
    }
}
