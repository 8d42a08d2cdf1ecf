use std::collections::BTreeSet;
use std::fmt;

use keyspan_core::ByteId;
use serde::{Deserialize, Serialize};

/// Separator between namespace and table name in qualified names.
pub const NAMESPACE_SEPARATOR: &str = "_";

/// Fully qualified physical table name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(qualified: impl Into<String>) -> Self {
        Self(qualified.into())
    }

    /// Qualifies `name` with `namespace`; an absent or empty namespace leaves it unchanged.
    pub fn qualified(namespace: Option<&str>, name: &str) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{ns}{NAMESPACE_SEPARATOR}{name}")),
            None => Self(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side code unit attached to a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoprocessorSpec {
    pub class_name: String,
    /// Optional archive the backend loads the class from.
    pub jar_path: Option<String>,
    pub priority: u32,
}

impl CoprocessorSpec {
    /// Priority band for user coprocessors.
    pub const PRIORITY_USER: u32 = 0x3FFF_FFFF;

    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            jar_path: None,
            priority: Self::PRIORITY_USER,
        }
    }

    pub fn with_jar(mut self, jar_path: impl Into<String>) -> Self {
        self.jar_path = Some(jar_path.into());
        self
    }
}

/// Schema of one physical table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    name: TableName,
    families: BTreeSet<ByteId>,
    coprocessors: Vec<CoprocessorSpec>,
}

impl TableDescriptor {
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            families: BTreeSet::new(),
            coprocessors: Vec::new(),
        }
    }

    pub fn with_families<I, F>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ByteId>,
    {
        for family in families {
            self.add_family(family);
        }
        self
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn families(&self) -> impl Iterator<Item = &ByteId> {
        self.families.iter()
    }

    /// Adds a column family, returning `false` if it was already declared.
    pub fn add_family(&mut self, family: impl Into<ByteId>) -> bool {
        self.families.insert(family.into())
    }

    pub fn has_family(&self, family: &[u8]) -> bool {
        self.families.contains(family)
    }

    pub fn coprocessors(&self) -> &[CoprocessorSpec] {
        &self.coprocessors
    }

    pub fn has_coprocessor(&self, class_name: &str) -> bool {
        self.coprocessors.iter().any(|cp| cp.class_name == class_name)
    }

    pub fn add_coprocessor(&mut self, spec: CoprocessorSpec) {
        if !self.has_coprocessor(&spec.class_name) {
            self.coprocessors.push(spec);
        }
    }
}

/// Progress of an asynchronous schema change across a table's regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterStatus {
    pub regions_remaining: usize,
    pub regions_total: usize,
}

impl AlterStatus {
    pub fn is_complete(&self) -> bool {
        self.regions_remaining == 0
    }
}
