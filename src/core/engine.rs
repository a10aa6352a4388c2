use crate::error::{Result, ServiceError};

use once_cell::sync::OnceCell;
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use std::{path::Path, sync::Mutex};
use tracing::info;

static ORT_INIT: OnceCell<()> = OnceCell::new();

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Intra-op threads; `None` lets ONNX Runtime decide.
    pub intra_threads: Option<usize>,
}

fn ort_err(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Inference(e.to_string())
}

/// Builds a session for `model_path`. Running a session needs `&mut`, so it
/// comes back behind a mutex.
pub fn load_session(model_path: &Path, opts: SessionOptions) -> Result<Mutex<Session>> {
    ORT_INIT.get_or_init(|| {
        let _ = ort::init().with_name("audio-studio-ai").commit();
    });

    let mut builder = SessionBuilder::new()
        .map_err(ort_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_err)?;
    if let Some(n) = opts.intra_threads {
        builder = builder.with_intra_threads(n).map_err(ort_err)?;
    }
    let session = builder.commit_from_file(model_path).map_err(ort_err)?;

    info!(
        model = %model_path.display(),
        inputs = ?session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
        outputs = ?session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
        "onnx session ready"
    );
    Ok(Mutex::new(session))
}

/// Picks the tensor name at `index`: the manifest override when present,
/// otherwise `fallback` if the graph declares it, otherwise the graph's own
/// name at that position.
pub fn resolve_name(
    declared: &[String],
    overrides: &[String],
    index: usize,
    fallback: &str,
) -> Result<String> {
    if let Some(name) = overrides.get(index) {
        if declared.iter().any(|d| d == name) {
            return Ok(name.clone());
        }
        return Err(ServiceError::Inference(format!(
            "graph has no tensor named `{name}` (declared: {declared:?})"
        )));
    }
    if declared.iter().any(|d| d == fallback) {
        return Ok(fallback.to_string());
    }
    declared.get(index).cloned().ok_or_else(|| {
        ServiceError::Inference(format!(
            "graph declares no tensor at position {index} (wanted `{fallback}`)"
        ))
    })
}

pub fn input_names(session: &Session) -> Vec<String> {
    session.inputs.iter().map(|i| i.name.clone()).collect()
}

pub fn output_names(session: &Session) -> Vec<String> {
    session.outputs.iter().map(|o| o.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn override_must_exist_in_graph() {
        let declared = names(&["mix", "speaker"]);
        assert_eq!(resolve_name(&declared, &names(&["speaker"]), 0, "x").unwrap(), "speaker");
        assert!(resolve_name(&declared, &names(&["ghost"]), 0, "x").is_err());
    }

    #[test]
    fn fallback_then_position() {
        let declared = names(&["input_ids", "embedding"]);
        assert_eq!(resolve_name(&declared, &[], 1, "embedding").unwrap(), "embedding");
        assert_eq!(resolve_name(&declared, &[], 0, "tokens").unwrap(), "input_ids");
        assert!(resolve_name(&declared, &[], 5, "tokens").is_err());
    }
}
