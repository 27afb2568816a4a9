//! Device identity.
//!
//! Sessions are keyed by a client-generated device identifier rather than a
//! user account.  The identifier is generated once, persisted in a small
//! key-value store under [`DEVICE_ID_KEY`], and reused for every case study.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::{Mutex, OnceLock};

use tracing::debug;
use utf8path::Path;

use crate::{Error, Result};

/// Storage key under which the device identifier is kept.
pub const DEVICE_ID_KEY: &str = "casebreaker_device_id";

/// A tiny persistent key-value store.
pub trait DeviceStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryDeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::unknown("device store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::unknown("device store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A store backed by a JSON object on disk.
///
/// A missing file reads as an empty store; it is created on first write.
#[derive(Debug)]
pub struct FileDeviceStore {
    path: Path<'static>,
    lock: Mutex<()>,
}

impl FileDeviceStore {
    /// Create a store at `path`.
    pub fn new(path: impl Into<Path<'static>>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path<'static> {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let file = match File::open(self.path.as_str()) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(Error::io("failed to open device store", err)),
        };
        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization("failed to parse device store", Some(Box::new(err)))
        })
    }
}

impl DeviceStore for FileDeviceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::unknown("device store lock poisoned"))?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::unknown("device store lock poisoned"))?;
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        if let Some(parent) = std::path::Path::new(self.path.as_str()).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create device store directory", err))?;
        }
        let file = File::create(self.path.as_str())
            .map_err(|err| Error::io("failed to create device store", err))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &values).map_err(|err| {
            Error::serialization("failed to write device store", Some(Box::new(err)))
        })
    }
}

/// The process-wide device identifier, resolved lazily from a store.
///
/// The first call to [`DeviceIdentity::device_id`] reads the store, generating
/// and persisting a fresh UUID if none is present; later calls return the
/// cached value.
pub struct DeviceIdentity {
    store: Box<dyn DeviceStore>,
    cached: OnceLock<String>,
}

impl DeviceIdentity {
    /// Create an identity backed by `store`.
    pub fn new(store: impl DeviceStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cached: OnceLock::new(),
        }
    }

    /// Return the device identifier, creating it on first use.
    pub fn device_id(&self) -> Result<&str> {
        if let Some(id) = self.cached.get() {
            return Ok(id);
        }
        let id = match self.store.get(DEVICE_ID_KEY)? {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                debug!(device_id = %id, "generated new device identifier");
                self.store.set(DEVICE_ID_KEY, &id)?;
                id
            }
        };
        Ok(self.cached.get_or_init(|| id))
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("cached", &self.cached.get())
            .finish_non_exhaustive()
    }
}
