//! Validated serving configuration and device-selector normalization.
//!
//! The CLI hands over a raw `ServingConfig`; `validated()` normalizes the
//! device selectors and checks the model paths. Everything downstream treats
//! the config as an immutable snapshot.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Selector value meaning "no device" (CPU only).
pub const DEVICE_SENTINEL: &str = "-1";

/// Immutable snapshot of everything a start request carries.
#[derive(Debug, Clone)]
pub struct ServingConfig {
    /// Model directories, in serving order.
    pub models: Vec<PathBuf>,
    /// Explicit operator names (`name` or `name:0`), possibly empty.
    pub ops: Vec<String>,
    /// Device selectors, one per operator. Normalized by `validated()`.
    pub device_ids: Vec<String>,
    pub thread_num: u16,
    pub runtime_thread_num: Vec<u32>,
    pub batch_infer_size: Vec<u32>,
    pub use_mkl: bool,
    pub mem_optim: bool,
    pub ir_optim: bool,
    pub use_trt: bool,
    pub use_lite: bool,
    pub use_xpu: bool,
    pub use_calib: bool,
    pub gpu_multi_stream: bool,
    pub use_encryption_model: bool,
    pub workdir: String,
    pub max_body_size: usize,
    pub precision: String,
    pub product_name: Option<String>,
    pub container_id: Option<String>,
    /// Port the service (or the handshake gateway) listens on.
    pub port: u16,
    /// Kept for interface compatibility; the worker mode is derived from the
    /// device selectors, not from this string.
    pub device: String,
}

impl ServingConfig {
    /// Normalize the device selectors and validate the model paths.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.device_ids = format_device_ids(&self.device_ids)?;
        validate_model_dirs(&self.models)?;
        Ok(self)
    }
}

/// Normalize a raw device-selector list to one selector string per operator.
///
/// Absence, an empty string, or an empty list all mean "no device" and
/// collapse to the `["-1"]` sentinel. Non-empty values pass through after
/// validation against the `CUDA_VISIBLE_DEVICES` allowlist (when declared).
pub fn format_device_ids(raw: &[String]) -> Result<Vec<String>, ConfigError> {
    let visible: Option<Vec<String>> = env::var("CUDA_VISIBLE_DEVICES")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect());
    format_device_ids_with_allowlist(raw, visible.as_deref())
}

fn format_device_ids_with_allowlist(
    raw: &[String],
    visible: Option<&[String]>,
) -> Result<Vec<String>, ConfigError> {
    let normalized: Vec<String> =
        if raw.is_empty() || (raw.len() == 1 && raw[0].trim().is_empty()) {
            vec![DEVICE_SENTINEL.to_string()]
        } else {
            raw.to_vec()
        };

    for selector in &normalized {
        let mut has_device = false;
        let mut has_sentinel = false;

        for id in selector.split(',') {
            let id = id.trim();
            let parsed: i64 = id
                .parse()
                .map_err(|_| ConfigError::InvalidDeviceId(id.to_string()))?;
            if parsed < -1 {
                return Err(ConfigError::InvalidDeviceId(id.to_string()));
            }
            if parsed >= 0 {
                has_device = true;
                if let Some(allow) = visible {
                    if !allow.iter().any(|a| a == id) {
                        return Err(ConfigError::DeviceNotVisible(id.to_string()));
                    }
                }
            } else {
                has_sentinel = true;
            }
        }

        if has_device && has_sentinel {
            return Err(ConfigError::MixedDeviceSelector(selector.clone()));
        }
    }

    Ok(normalized)
}

/// True iff any selector references a non-negative device id.
pub fn uses_accelerator(selectors: &[String]) -> bool {
    selectors
        .iter()
        .flat_map(|s| s.split(','))
        .any(|id| id.trim().parse::<i64>().map_or(false, |v| v >= 0))
}

/// Every model path must be an existing directory. A plain file is a fatal
/// configuration error regardless of device mode.
pub fn validate_model_dirs(models: &[PathBuf]) -> Result<(), ConfigError> {
    if models.is_empty() {
        return Err(ConfigError::NoModel);
    }
    for model in models {
        if model.is_dir() {
            continue;
        }
        if model.is_file() {
            return Err(ConfigError::ModelPathIsFile(model.clone()));
        }
        return Err(ConfigError::ModelPathMissing(model.clone()));
    }
    Ok(())
}
