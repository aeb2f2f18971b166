//! Error taxonomy for the control plane.
//!
//! Configuration problems are always fatal and never retried. Registry errors
//! are surfaced to the caller of the stop path. Launch failures on the
//! handshake path are reported to the gateway client without taking down the
//! control process.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid serving configuration. Fatal; the process exits nonzero.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("you must specify at least one serving model with --model")]
    NoModel,

    #[error("the input of --model should be a dir not file: {0}")]
    ModelPathIsFile(PathBuf),

    #[error("model path does not exist: {0}")]
    ModelPathMissing(PathBuf),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("device id {0} is not in CUDA_VISIBLE_DEVICES")]
    DeviceNotVisible(String),

    #[error("cannot use CPU and GPU in one operator selector: {0}")]
    MixedDeviceSelector(String),
}

/// Process registry failures on the stop/kill path.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("please confirm the port [{0}] you specified is correct")]
    PortNotFound(u16),

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("signal delivery is not supported on this platform")]
    Unsupported,
}

/// Worker launch failures.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("no available port found in [{base}, {base}+{attempts})")]
    PortAllocation { base: u16, attempts: u16 },

    #[error("worker process was not alive after the startup grace period")]
    SpawnFailure,

    #[error("worker exited with status {0:?}")]
    WorkerExit(Option<i32>),

    #[error("failed to launch worker: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
