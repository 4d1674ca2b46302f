use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Selects the durable store behind the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceBackend {
    /// Volatile in-memory store. Recovery only works within a process.
    Memory,
    /// JSON document store on the local filesystem.
    File,
}

impl std::fmt::Display for PersistenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceBackend::Memory => write!(f, "memory"),
            PersistenceBackend::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for PersistenceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(PersistenceBackend::Memory),
            "file" => Ok(PersistenceBackend::File),
            other => Err(format!("unknown persistence backend: {}", other)),
        }
    }
}

/// Configuration for the durable job store.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    /// Store file location, required for the `file` backend.
    pub file_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            file_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Address this dispatcher is registered under; part of its endpoint
    /// identity, not a listening socket.
    pub bind_addr: SocketAddr,
    pub persistence: PersistenceConfig,
    /// Default timeout applied to gateway calls that do not carry their own.
    pub rpc_timeout_ms: u64,
    /// How long terminal jobs are kept before the retention sweep tombstones
    /// them and deletes their persisted record.
    pub retention_window_ms: u64,
    pub retention_sweep_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            bind_addr: "127.0.0.1:6070"
                .parse()
                .expect("default bind address is valid"),
            persistence: PersistenceConfig::default(),
            rpc_timeout_ms: 10_000,
            retention_window_ms: 3_600_000,
            retention_sweep_interval_ms: 60_000,
        }
    }
}

impl DispatcherConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_persistence(
        mut self,
        backend: PersistenceBackend,
        file_path: Option<PathBuf>,
    ) -> Self {
        self.persistence = PersistenceConfig { backend, file_path };
        self
    }

    pub fn with_rpc_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.rpc_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retention(mut self, window_ms: u64, sweep_interval_ms: u64) -> Self {
        self.retention_window_ms = window_ms;
        self.retention_sweep_interval_ms = sweep_interval_ms;
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.retention_window_ms as i64)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retention_sweep_interval_ms)
    }
}
