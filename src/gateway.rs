//! One-shot key-handshake gateway for encryption-enabled deployments.
//!
//! The gateway is a short-lived HTTP listener on the externally requested
//! port. A client POSTs a base64 key; the key is written into every model
//! directory, a worker is spawned on an ephemerally allocated port, and after
//! a liveness grace period the port is returned. Further requests must
//! re-present the same key. Exactly one worker is ever in flight.

use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::config::ServingConfig;
use crate::error::LaunchError;
use crate::launch::{self, WorkerLaunch};
use crate::port::find_available_port;
use crate::process::WorkerHandle;

/// How long a freshly spawned worker gets before the liveness check.
pub const STARTUP_GRACE: Duration = Duration::from_secs(3);

/// Name of the key file written into each model directory.
pub const KEY_FILE: &str = "key";

const FAILURE_MESSAGE: &str = "start serving failed";

#[derive(Deserialize)]
struct KeyRequest {
    key: Option<String>,
}

/// Handshake phases. `WaitingKey` is also where a failed spawn lands, so the
/// next request can try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WaitingKey,
    Running,
}

/// Explicit state value passed to every request handler; no ambient globals.
pub struct GatewayState {
    pub phase: Phase,
    pub port: Option<u16>,
    worker: Option<WorkerHandle>,
}

impl GatewayState {
    fn new() -> Self {
        GatewayState {
            phase: Phase::Idle,
            port: None,
            worker: None,
        }
    }

    fn worker_alive(&mut self) -> bool {
        self.worker.as_mut().map(|w| w.is_alive()).unwrap_or(false)
    }
}

type SpawnFn = Box<dyn Fn(&WorkerLaunch) -> Result<WorkerHandle, LaunchError> + Send + Sync>;

pub struct Gateway {
    config: ServingConfig,
    accelerator: bool,
    grace: Duration,
    spawn: SpawnFn,
    state: Mutex<GatewayState>,
}

impl Gateway {
    pub fn new(config: ServingConfig, accelerator: bool) -> Self {
        Gateway::with_spawner(config, accelerator, STARTUP_GRACE, Box::new(launch::spawn))
    }

    /// Injection point for the spawn step and grace period (tests use a stub
    /// command and a short grace).
    pub fn with_spawner(
        config: ServingConfig,
        accelerator: bool,
        grace: Duration,
        spawn: SpawnFn,
    ) -> Self {
        Gateway {
            config,
            accelerator,
            grace,
            spawn,
            state: Mutex::new(GatewayState::new()),
        }
    }

    /// Current phase and worker port, for inspection.
    pub fn snapshot(&self) -> (Phase, Option<u16>) {
        let state = self.state.lock().unwrap();
        (state.phase, state.port)
    }

    /// Handle one start request body. Returns the wire-format JSON payload.
    /// Requests are serialized on the state lock; the spawn and the liveness
    /// grace wait happen while it is held, which is the accepted
    /// serialization point.
    pub fn handle_start(&self, body: &[u8]) -> serde_json::Value {
        let mut state = self.state.lock().unwrap();
        if self.start(&mut state, body) {
            json!({ "endpoint_list": [state.port] })
        } else {
            json!({ "message": FAILURE_MESSAGE })
        }
    }

    fn start(&self, state: &mut GatewayState, body: &[u8]) -> bool {
        let request: KeyRequest = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(e) => {
                warn!("malformed handshake request: {e}");
                return false;
            }
        };

        if state.phase != Phase::Running {
            // No worker yet (or the last spawn failed): expect a key.
            state.phase = Phase::WaitingKey;
            info!("waiting key for model");
            let Some(key) = decode_key(&request) else {
                warn!("not found key in request");
                return false;
            };
            if let Err(e) = self.write_key_files(&key) {
                error!("failed to write key files: {e}");
                return false;
            }
            match self.spawn_worker() {
                Ok((port, handle)) => {
                    state.phase = Phase::Running;
                    state.port = Some(port);
                    state.worker = Some(handle);
                    true
                }
                Err(e) => {
                    // Stay in WaitingKey; nothing is persisted for a worker
                    // that never came up.
                    error!("worker spawn failed: {e}");
                    false
                }
            }
        } else {
            // A worker is on record: it must still be alive, and the client
            // must re-present the original key. Rejections transition nothing.
            if !state.worker_alive() {
                warn!("recorded worker is no longer alive");
                return false;
            }
            match decode_key(&request) {
                Some(key) => self.check_key(&key),
                None => false,
            }
        }
    }

    /// Spawn on an ephemeral port and poll liveness after the grace period.
    fn spawn_worker(&self) -> Result<(u16, WorkerHandle), LaunchError> {
        let port = find_available_port()?;
        let payload = launch::assemble(&self.config, port, self.accelerator);
        let mut handle = (self.spawn)(&payload)?;

        std::thread::sleep(self.grace);
        if handle.is_alive() {
            Ok((port, handle))
        } else {
            Err(LaunchError::SpawnFailure)
        }
    }

    /// Write the decoded key as a file named `key` in every model directory.
    fn write_key_files(&self, key: &[u8]) -> std::io::Result<()> {
        for model in &self.config.models {
            fs::write(model.join(KEY_FILE), key)?;
        }
        Ok(())
    }

    /// Byte-for-byte comparison against the key files written at transition
    /// time. Every model directory must agree.
    fn check_key(&self, key: &[u8]) -> bool {
        for model in &self.config.models {
            match fs::read(model.join(KEY_FILE)) {
                Ok(current) if current == key => {}
                Ok(_) => return false,
                Err(e) => {
                    warn!("cannot read key file in {}: {e}", model.display());
                    return false;
                }
            }
        }
        true
    }

    /// Serve the handshake endpoint until the process is interrupted.
    pub fn run(self, listen_port: u16) -> anyhow::Result<()> {
        let gateway = Arc::new(self);
        let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async move {
            let make_svc = make_service_fn(move |_| {
                let gateway = gateway.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req| {
                        handle_request(gateway.clone(), req)
                    }))
                }
            });

            info!("starting encryption server on port {listen_port}, waiting for key from client");
            Server::bind(&addr).serve(make_svc).await?;
            Ok(())
        })
    }
}

async fn handle_request(
    gateway: Arc<Gateway>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let resp = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap();
        return Ok(resp);
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read handshake body: {e}");
            hyper::body::Bytes::new()
        }
    };

    // The handshake blocks for the spawn + grace period; keep it off the
    // async workers.
    let payload = tokio::task::spawn_blocking(move || gateway.handle_start(&body))
        .await
        .unwrap_or_else(|_| json!({ "message": FAILURE_MESSAGE }));

    let resp = Response::builder()
        .status(StatusCode::OK)
        .header("Content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    Ok(resp)
}

fn decode_key(request: &KeyRequest) -> Option<Vec<u8>> {
    let encoded = request.key.as_ref()?;
    match general_purpose::STANDARD.decode(encoded) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("key is not valid base64: {e}");
            None
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(models: Vec<PathBuf>) -> ServingConfig {
        ServingConfig {
            models,
            ops: vec![],
            device_ids: vec!["-1".to_string()],
            thread_num: 4,
            runtime_thread_num: vec![],
            batch_infer_size: vec![32],
            use_mkl: false,
            mem_optim: true,
            ir_optim: false,
            use_trt: false,
            use_lite: false,
            use_xpu: false,
            use_calib: false,
            gpu_multi_stream: false,
            use_encryption_model: true,
            workdir: "workdir".to_string(),
            max_body_size: 512 * 1024 * 1024,
            precision: "fp32".to_string(),
            product_name: None,
            container_id: None,
            port: 9393,
            device: "cpu".to_string(),
        }
    }

    fn key_body(raw: &[u8]) -> Vec<u8> {
        json!({ "key": general_purpose::STANDARD.encode(raw) })
            .to_string()
            .into_bytes()
    }

    fn sleeper_gateway(models: Vec<PathBuf>, spawns: Arc<AtomicUsize>) -> Gateway {
        Gateway::with_spawner(
            config(models),
            false,
            Duration::from_millis(50),
            Box::new(move |_launch| {
                spawns.fetch_add(1, Ordering::SeqCst);
                let child = Command::new("sleep").arg("60").spawn()?;
                Ok(WorkerHandle::new(child))
            }),
        )
    }

    #[test]
    fn test_correct_key_transitions_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let spawns = Arc::new(AtomicUsize::new(0));
        let gateway = sleeper_gateway(vec![dir.path().to_path_buf()], spawns.clone());

        let resp = gateway.handle_start(&key_body(b"secret"));
        let port = resp["endpoint_list"][0].as_u64().expect("success payload");

        let (phase, recorded) = gateway.snapshot();
        assert_eq!(phase, Phase::Running);
        assert_eq!(recorded, Some(port as u16));
        assert_eq!(
            std::fs::read(dir.path().join(KEY_FILE)).unwrap(),
            b"secret"
        );

        cleanup(&gateway);
    }

    #[test]
    fn test_wrong_key_rejected_worker_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let spawns = Arc::new(AtomicUsize::new(0));
        let gateway = sleeper_gateway(vec![dir.path().to_path_buf()], spawns.clone());

        gateway.handle_start(&key_body(b"secret"));
        let resp = gateway.handle_start(&key_body(b"wrong"));
        assert_eq!(resp["message"], FAILURE_MESSAGE);

        let (phase, _) = gateway.snapshot();
        assert_eq!(phase, Phase::Running, "rejection transitions nothing");
        assert!(gateway.state.lock().unwrap().worker_alive());
        assert_eq!(spawns.load(Ordering::SeqCst), 1);

        cleanup(&gateway);
    }

    #[test]
    fn test_represented_key_accepted_without_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let spawns = Arc::new(AtomicUsize::new(0));
        let gateway = sleeper_gateway(vec![dir.path().to_path_buf()], spawns.clone());

        let first = gateway.handle_start(&key_body(b"secret"));
        let second = gateway.handle_start(&key_body(b"secret"));
        assert_eq!(first["endpoint_list"], second["endpoint_list"]);
        assert_eq!(spawns.load(Ordering::SeqCst), 1, "no second worker");

        cleanup(&gateway);
    }

    #[test]
    fn test_missing_key_is_rejected_without_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let spawns = Arc::new(AtomicUsize::new(0));
        let gateway = sleeper_gateway(vec![dir.path().to_path_buf()], spawns.clone());

        let resp = gateway.handle_start(b"{}");
        assert_eq!(resp["message"], FAILURE_MESSAGE);
        assert_eq!(spawns.load(Ordering::SeqCst), 0);
        let (phase, _) = gateway.snapshot();
        assert_eq!(phase, Phase::WaitingKey);
    }

    #[test]
    fn test_dead_on_arrival_worker_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::with_spawner(
            config(vec![dir.path().to_path_buf()]),
            false,
            Duration::from_millis(50),
            Box::new(|_launch| {
                // Exits immediately; fails the post-grace liveness check.
                let child = Command::new("true").spawn()?;
                Ok(WorkerHandle::new(child))
            }),
        );

        let resp = gateway.handle_start(&key_body(b"secret"));
        assert_eq!(resp["message"], FAILURE_MESSAGE);
        let (phase, port) = gateway.snapshot();
        assert_eq!(phase, Phase::WaitingKey, "failed spawn stays in WaitingKey");
        assert_eq!(port, None);
    }

    fn cleanup(gateway: &Gateway) {
        let mut state = gateway.state.lock().unwrap();
        if let Some(worker) = state.worker.as_mut() {
            let _ = worker.terminate(crate::process::SignalMode::Kill);
        }
    }
}
