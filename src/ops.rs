//! Deterministic operator-pipeline assembly.
//!
//! A pipeline always starts with the ingestion stage and ends with the
//! response-formatting stage. In between come either the explicitly requested
//! operators, in the exact order given, or one inference stage per model
//! directory.

use crate::config::ServingConfig;

pub const READER_OP: &str = "GeneralReaderOp";
pub const INFER_OP: &str = "GeneralInferOp";
pub const DETECTION_OP: &str = "GeneralDetectionOp";
pub const RESPONSE_OP: &str = "GeneralResponseOp";

/// Operator types the engine ships with. Explicit names outside this list are
/// registered as new operator types on the sequence.
const KNOWN_OPS: &[&str] = &[
    READER_OP,
    INFER_OP,
    DETECTION_OP,
    RESPONSE_OP,
    "GeneralTextReaderOp",
    "GeneralTextResponseOp",
    "GeneralDistKVInferOp",
];

/// Default-inference overrides, keyed by model name. Additive: future
/// special cases get a new row here, not a branch in `build_sequence`.
struct StageOverride {
    model_name: &'static str,
    model_count: usize,
    position: usize,
    stage: &'static str,
}

const STAGE_OVERRIDES: &[StageOverride] = &[StageOverride {
    model_name: "ocr_det_model",
    model_count: 2,
    position: 0,
    stage: DETECTION_OP,
}];

/// One pipeline stage. `dedicated_engine` is set for explicitly requested
/// operators whose qualifier suffix is not the literal `"0"`; those run on
/// their own execution engine instead of sharing the default one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub dedicated_engine: bool,
}

impl Stage {
    fn shared(name: &str) -> Self {
        Stage {
            name: name.to_string(),
            dedicated_engine: false,
        }
    }
}

/// An ordered, immutable stage pipeline. Built once per start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSequence {
    stages: Vec<Stage>,
    registered_ops: Vec<String>,
}

impl OperatorSequence {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in pipeline order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Operator types first seen on the command line, in declaration order.
    pub fn registered_ops(&self) -> &[String] {
        &self.registered_ops
    }
}

/// Assemble the pipeline for a validated config. Pure and deterministic.
pub fn build_sequence(config: &ServingConfig) -> OperatorSequence {
    let mut stages = vec![Stage::shared(READER_OP)];
    let mut registered_ops = Vec::new();

    let explicit = explicit_stages(&config.ops, &mut registered_ops);
    if !explicit.is_empty() {
        stages.extend(explicit);
    } else {
        for (idx, model) in config.models.iter().enumerate() {
            let model_name = model
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = STAGE_OVERRIDES
                .iter()
                .find(|o| {
                    o.model_count == config.models.len()
                        && o.position == idx
                        && o.model_name == model_name
                })
                .map(|o| o.stage)
                .unwrap_or(INFER_OP);
            stages.push(Stage::shared(name));
        }
    }

    stages.push(Stage::shared(RESPONSE_OP));

    OperatorSequence {
        stages,
        registered_ops,
    }
}

/// Parse the `--op` list: `name` requests a dedicated engine, `name:0` shares
/// the default engine. Empty names contribute nothing.
fn explicit_stages(ops: &[String], registered_ops: &mut Vec<String>) -> Vec<Stage> {
    let mut stages = Vec::new();
    for op in ops {
        let parts: Vec<&str> = op.split(':').collect();
        let name = parts[0];
        if name.is_empty() {
            continue;
        }
        if !KNOWN_OPS.contains(&name) && !registered_ops.iter().any(|r| r == name) {
            registered_ops.push(name.to_string());
        }
        let shares_default = parts.len() >= 2 && parts[1] == "0";
        stages.push(Stage {
            name: name.to_string(),
            dedicated_engine: !shares_default,
        });
    }
    stages
}
