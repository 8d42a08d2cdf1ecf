use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while composing or decoding identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A row key could not be split into its components.
    #[error("malformed row id ({reason}): {key}")]
    MalformedRowId { key: String, reason: &'static str },

    /// A visibility label is not a valid expression.
    #[error("invalid visibility expression '{0}'")]
    InvalidVisibility(String),

    #[error("no codec registered for field '{field}' of type {field_type}")]
    MissingCodec { field: String, field_type: &'static str },
}

impl Error {
    pub(crate) fn malformed_row_id(key: &[u8], reason: &'static str) -> Self {
        Error::MalformedRowId {
            key: hex::encode(key),
            reason,
        }
    }
}
