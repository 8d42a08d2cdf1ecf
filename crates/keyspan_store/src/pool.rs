use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info};

use crate::backend::BackendConnection;
use crate::config::BackendVariant;
use crate::error::{Error, Result};
use crate::memory::MemoryBackend;

/// Opens connections for one address scheme.
pub trait BackendConnector: Send + Sync {
    /// Scheme without the `://` separator, e.g. `memory`.
    fn scheme(&self) -> &'static str;

    /// `target` is the address with the scheme stripped.
    fn connect(&self, target: &str, variant: BackendVariant) -> Result<Arc<dyn BackendConnection>>;
}

/// Connects `memory://<name>?<key>=<value>&...` addresses. Query pairs become
/// backend properties.
pub struct MemoryConnector;

impl BackendConnector for MemoryConnector {
    fn scheme(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, target: &str, variant: BackendVariant) -> Result<Arc<dyn BackendConnection>> {
        let (name, query) = target.split_once('?').unwrap_or((target, ""));
        if name.is_empty() {
            return Err(Error::Connection {
                address: format!("memory://{target}"),
                reason: "missing backend name".to_string(),
            });
        }
        let backend = MemoryBackend::with_variant(format!("memory://{name}"), variant);
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "true"));
            backend.set_property(key, value);
        }
        Ok(Arc::new(backend))
    }
}

/// Shares one connection per `(variant, address)`.
pub struct ConnectionPool {
    connectors: Mutex<HashMap<&'static str, Arc<dyn BackendConnector>>>,
    connections: Mutex<HashMap<(BackendVariant, String), Arc<dyn BackendConnection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        let pool = Self {
            connectors: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        };
        pool.register_connector(Arc::new(MemoryConnector));
        pool
    }

    pub fn global() -> &'static ConnectionPool {
        static POOL: OnceLock<ConnectionPool> = OnceLock::new();
        POOL.get_or_init(ConnectionPool::new)
    }

    pub fn register_connector(&self, connector: Arc<dyn BackendConnector>) {
        if let Ok(mut connectors) = self.connectors.lock() {
            connectors.insert(connector.scheme(), connector);
        }
    }

    pub fn connection(&self, variant: BackendVariant, address: &str) -> Result<Arc<dyn BackendConnection>> {
        let key = (variant, address.to_string());
        let mut connections = self.connections.lock().map_err(|_| Error::Connection {
            address: address.to_string(),
            reason: "connection pool lock poisoned".to_string(),
        })?;
        if let Some(existing) = connections.get(&key) {
            debug!(address, variant = %variant, "reusing pooled connection");
            return Ok(existing.clone());
        }

        let (scheme, target) = address.split_once("://").ok_or_else(|| Error::Connection {
            address: address.to_string(),
            reason: "address must look like <scheme>://<target>".to_string(),
        })?;
        let connector = self
            .connectors
            .lock()
            .ok()
            .and_then(|connectors| connectors.get(scheme).cloned())
            .ok_or_else(|| Error::Connection {
                address: address.to_string(),
                reason: format!("no connector registered for scheme '{scheme}'"),
            })?;
        let connection = connector.connect(target, variant)?;
        info!(address, variant = %variant, "opened backend connection");
        connections.insert(key, connection.clone());
        Ok(connection)
    }

    /// Drops the pooled connection; the next request reconnects.
    pub fn evict(&self, variant: BackendVariant, address: &str) -> bool {
        self.connections
            .lock()
            .map(|mut connections| connections.remove(&(variant, address.to_string())).is_some())
            .unwrap_or(false)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}
