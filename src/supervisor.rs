//! Top-level orchestration of the start and stop paths.

use log::{info, warn};

use crate::config::{self, ServingConfig};
use crate::error::RegistryError;
use crate::gateway::Gateway;
use crate::launch;
use crate::port::port_is_available;
use crate::process::SignalMode;
use crate::registry::{ProcessRecord, Registry};

/// Start serving. The registry record is persisted optimistically, before the
/// worker has proven it started, so that a wedged start can still be
/// reclaimed by `stop`.
///
/// Without encryption this call does not return control until the worker
/// exits. With encryption it blocks serving the handshake gateway instead,
/// and workers come up as child processes.
pub fn start(config: &ServingConfig) -> anyhow::Result<()> {
    let accelerator = if config.use_lite {
        // An alternate inference backend takes precedence over the selectors.
        info!("running with the lite backend, forcing cpu mode");
        false
    } else {
        config::uses_accelerator(&config.device_ids)
    };

    if port_is_available(config.port) {
        let record = ProcessRecord::new(
            vec![config.port],
            std::process::id(),
            config
                .models
                .iter()
                .map(|m| m.to_string_lossy().into_owned())
                .collect(),
        );
        Registry::open_default().append(record)?;
    } else {
        warn!("port {} already in use, not recording a new process", config.port);
    }

    if config.use_encryption_model {
        Gateway::new(config.clone(), accelerator).run(config.port)
    } else {
        let payload = launch::assemble(config, config.port, accelerator);
        launch::run_blocking(&payload)?;
        Ok(())
    }
}

/// Stop or kill serving processes through the registry. An explicit port must
/// match a record; no port means every record is processed.
pub fn stop(mode: SignalMode, port: Option<u16>) -> Result<(), RegistryError> {
    let registry = Registry::open_default();
    match port {
        Some(port) => registry.remove_by_port(port, mode),
        None => registry.remove_all(mode),
    }
}
