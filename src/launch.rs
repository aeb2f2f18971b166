//! The worker-spawn interface.
//!
//! The inference engine is an external collaborator: this module materializes
//! the operator pipeline, the per-port working directory, and the full tuning
//! flag set into a launch payload, then hands it to the engine binary. The
//! engine reports back only via process exit.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::info;
use serde::Serialize;

use crate::config::ServingConfig;
use crate::error::LaunchError;
use crate::ops::{build_sequence, OperatorSequence};
use crate::process::WorkerHandle;

/// Overrides the engine binary looked up on PATH.
pub const WORKER_BIN_ENV: &str = "SERVING_WORKER_BIN";

const DEFAULT_WORKER_BIN: &str = "serving_worker";

const LAUNCH_FILE: &str = "launch.json";

#[derive(Serialize, Debug, Clone)]
struct StagePayload {
    name: String,
    dedicated_engine: bool,
}

/// Everything the engine needs to come up on one port.
#[derive(Serialize, Debug, Clone)]
pub struct WorkerLaunch {
    op_sequence: Vec<StagePayload>,
    workdir: String,
    port: u16,
    device: String,
    model: Vec<String>,
    thread_num: u16,
    gpu_ids: Vec<String>,
    mem_optim: bool,
    ir_optim: bool,
    use_mkl: bool,
    precision: String,
    use_calib: bool,
    use_lite: bool,
    use_xpu: bool,
    gpu_multi_stream: bool,
    runtime_thread_num: Vec<u32>,
    batch_infer_size: Vec<u32>,
    max_body_size: usize,
    use_encryption_model: bool,
    product_name: Option<String>,
    container_id: Option<String>,
}

impl WorkerLaunch {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }
}

/// Assemble the launch payload for one port. `accelerator` selects the device
/// mode the validator derived; TensorRT and multi-stream only take effect in
/// accelerator mode, and TensorRT forces graph optimization on.
pub fn assemble(config: &ServingConfig, port: u16, accelerator: bool) -> WorkerLaunch {
    let device = if accelerator { "gpu" } else { "cpu" };
    let sequence = build_sequence(config);

    let use_trt = config.use_trt && accelerator;
    WorkerLaunch {
        op_sequence: stage_payloads(&sequence),
        workdir: format!("{}_{}", config.workdir, port),
        port,
        device: device.to_string(),
        model: config
            .models
            .iter()
            .map(|m| m.to_string_lossy().into_owned())
            .collect(),
        thread_num: config.thread_num,
        gpu_ids: if accelerator {
            config.device_ids.clone()
        } else {
            Vec::new()
        },
        mem_optim: config.mem_optim,
        ir_optim: config.ir_optim || use_trt,
        use_mkl: config.use_mkl,
        precision: config.precision.clone(),
        use_calib: config.use_calib,
        use_lite: config.use_lite,
        use_xpu: config.use_xpu,
        gpu_multi_stream: config.gpu_multi_stream && accelerator,
        runtime_thread_num: config.runtime_thread_num.clone(),
        batch_infer_size: config.batch_infer_size.clone(),
        max_body_size: config.max_body_size,
        use_encryption_model: config.use_encryption_model,
        product_name: config.product_name.clone(),
        container_id: config.container_id.clone(),
    }
}

fn stage_payloads(sequence: &OperatorSequence) -> Vec<StagePayload> {
    sequence
        .stages()
        .iter()
        .map(|s| StagePayload {
            name: s.name.clone(),
            dedicated_engine: s.dedicated_engine,
        })
        .collect()
}

/// Write the payload into the workdir and build the engine command line.
pub fn worker_command(launch: &WorkerLaunch) -> Result<Command, LaunchError> {
    fs::create_dir_all(&launch.workdir)?;
    let config_path = PathBuf::from(&launch.workdir).join(LAUNCH_FILE);
    fs::write(&config_path, serde_json::to_string_pretty(launch).map_err(std::io::Error::other)?)?;

    let bin = env::var(WORKER_BIN_ENV).unwrap_or_else(|_| DEFAULT_WORKER_BIN.to_string());
    let mut cmd = Command::new(bin);
    cmd.arg("--launch-config").arg(&config_path);
    Ok(cmd)
}

/// Run the worker as the terminal action of the calling process. On Unix the
/// launcher execs into the engine, so the pid recorded in the registry stays
/// correct; elsewhere it waits for the child and forwards the exit status.
pub fn run_blocking(launch: &WorkerLaunch) -> Result<(), LaunchError> {
    info!(
        "launching worker on port {} (workdir {})",
        launch.port, launch.workdir
    );
    let mut cmd = worker_command(launch)?;

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec only returns on failure
        Err(LaunchError::Io(cmd.exec()))
    }

    #[cfg(not(unix))]
    {
        let status = cmd.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(LaunchError::WorkerExit(status.code()))
        }
    }
}

/// Spawn the worker as a child process, detached from our stdio, and return a
/// handle for liveness polling and termination.
pub fn spawn(launch: &WorkerLaunch) -> Result<WorkerHandle, LaunchError> {
    info!(
        "spawning worker child on port {} (workdir {})",
        launch.port, launch.workdir
    );
    let child = worker_command(launch)?
        .stdin(Stdio::null())
        .spawn()?;
    Ok(WorkerHandle::new(child))
}
