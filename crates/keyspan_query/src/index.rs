use keyspan_core::ByteId;
use serde::{Deserialize, Serialize};

/// A secondary index: one physical table whose row keys start with the
/// insertion ids produced by the index's space-filling curve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    id: String,
    dimension_fields: Vec<ByteId>,
}

impl Index {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dimension_fields: Vec::new(),
        }
    }

    /// Fields the index is built over. Always read back, even when a query
    /// asks for a subset of fields, so entries can be decoded.
    pub fn with_dimension_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ByteId>,
    {
        self.dimension_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Unqualified table name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dimension_fields(&self) -> &[ByteId] {
        &self.dimension_fields
    }
}
