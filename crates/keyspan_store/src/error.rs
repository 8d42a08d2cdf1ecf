use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by backend connections and [`crate::StoreOperations`].
#[derive(Error, Debug)]
pub enum Error {
    /// The backend could not be reached or no connector handles the address.
    #[error("connection to '{address}' failed: {reason}")]
    Connection { address: String, reason: String },

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("table '{0}' is disabled")]
    TableDisabled(String),

    /// I/O failure while opening or advancing a scanner.
    #[error("scan of table '{table}' failed: {reason}")]
    ScanExecution { table: String, reason: String },

    /// A server-side filter payload could not be built or decoded.
    #[error("server filter construction failed: {0}")]
    FilterConstruction(String),

    #[error("installing coprocessor '{coprocessor}' on '{table}' failed during {step}: {reason}")]
    CoprocessorInstall {
        table: String,
        coprocessor: String,
        step: &'static str,
        reason: String,
    },

    #[error("operation '{0}' is not supported by this backend")]
    Unsupported(&'static str),

    #[error("admin lock poisoned")]
    AdminLockPoisoned,

    /// Any other backend-reported failure.
    #[error("backend error during {operation} on '{table}': {reason}")]
    Backend {
        operation: &'static str,
        table: String,
        reason: String,
    },

    #[error(transparent)]
    Core(#[from] keyspan_core::Error),
}

impl Error {
    pub fn backend(operation: &'static str, table: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Backend {
            operation,
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn scan(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ScanExecution {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn is_table_not_found(&self) -> bool {
        matches!(self, Error::TableNotFound(_))
    }
}
