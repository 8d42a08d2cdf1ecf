//! Core vocabulary shared by the KeySpan storage and query crates.
//!
//! Everything in this crate is a pure value type:
//! - [`ByteId`] and [`ByteRange`] describe keys and key intervals in the
//!   backend's unsigned byte-lexicographic order,
//! - [`RowId`] composes index insertion ids and entry ids into row keys,
//! - [`codec`] maps logical field types to their cell encodings,
//! - [`visibility`] evaluates cell visibility labels against authorizations.

pub mod codec;
pub mod error;
pub mod id;
pub mod range;
pub mod row_id;
pub mod visibility;

pub use codec::{CodecRegistry, FieldCodec, FieldCodecs, FieldReader, FieldWriter};
pub use error::{Error, Result};
pub use id::{next_prefix, ByteId};
pub use range::ByteRange;
pub use row_id::RowId;
pub use visibility::Authorizations;
