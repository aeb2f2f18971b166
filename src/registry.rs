//! Durable port → worker-process registry.
//!
//! One JSON array in the configuration home is the single source of truth.
//! Every mutation rewrites the file atomically (temp file + rename); the file
//! exists iff at least one record is outstanding.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::process::{signal_pid, SignalMode};

pub const REGISTRY_FILE: &str = "ProcessInfo.json";

/// Environment override for the configuration home.
pub const CONF_HOME_ENV: &str = "SERVING_CONF_HOME";

/// One live serving process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub port: Vec<u16>,
    pub pid: u32,
    pub model: Vec<String>,
    pub start_time: f64,
}

impl ProcessRecord {
    pub fn new(ports: Vec<u16>, pid: u32, model: Vec<String>) -> Self {
        ProcessRecord {
            port: ports,
            pid,
            model,
            start_time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// Where the registry file lives: `$SERVING_CONF_HOME`, else the platform
/// config dir, else the working directory.
pub fn conf_home() -> PathBuf {
    std::env::var_os(CONF_HOME_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|d| d.join("servectl")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn open_default() -> Self {
        Registry {
            path: conf_home().join(REGISTRY_FILE),
        }
    }

    /// Registry backed by an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Registry { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means "no records", not an error.
    pub fn load(&self) -> Result<Vec<ProcessRecord>, RegistryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Append a record, creating the file if absent.
    pub fn append(&self, record: ProcessRecord) -> Result<(), RegistryError> {
        let mut records = self.load()?;
        records.push(record);
        self.persist(&records)
    }

    /// Scan records in order; the one whose port set contains `port` gets the
    /// termination signal and is removed (one removal per call). Reaching the
    /// last record without a match is an error and leaves the file unchanged.
    pub fn remove_by_port(&self, port: u16, mode: SignalMode) -> Result<(), RegistryError> {
        let records = self.load()?;
        for (idx, record) in records.iter().enumerate() {
            if record.port.contains(&port) {
                signal_pid(record.pid, mode)?;
                info!("stopped pid {} serving on port {}", record.pid, port);
                let mut rest = records.clone();
                rest.remove(idx);
                return self.persist(&rest);
            }
        }
        Err(RegistryError::PortNotFound(port))
    }

    /// Signal every recorded pid in sequence order, then delete the file.
    pub fn remove_all(&self, mode: SignalMode) -> Result<(), RegistryError> {
        for record in self.load()? {
            signal_pid(record.pid, mode)?;
            info!("stopped pid {} serving on {:?}", record.pid, record.port);
        }
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Atomic rewrite; an empty record set deletes the file instead.
    fn persist(&self, records: &[ProcessRecord]) -> Result<(), RegistryError> {
        if records.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(records)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
