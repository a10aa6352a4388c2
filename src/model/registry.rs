use crate::{
    error::{Result, ServiceError},
    types::ModelKind,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub description: String,
    pub manifest: String,
}

#[derive(Debug, Deserialize)]
pub struct RegistryDefaults {
    pub voice_clone: String,
    pub separator: String,
}

#[derive(Debug, Deserialize)]
pub struct Registry {
    pub defaults: RegistryDefaults,
    pub models: Vec<RegistryEntry>,
}

impl Registry {
    pub fn default_for(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::VoiceClone => &self.defaults.voice_clone,
            ModelKind::Separator => &self.defaults.separator,
        }
    }
}

const REGISTRY_JSON: &str = include_str!("../../models/registry.json");

pub fn load_registry() -> Result<Registry> {
    Ok(serde_json::from_str(REGISTRY_JSON)?)
}

/// An empty `model_name` selects the registry default for `kind`.
pub fn resolve_manifest_url(model_name: &str, kind: ModelKind) -> Result<String> {
    let reg = load_registry()?;
    let target = if model_name.is_empty() {
        reg.default_for(kind).to_string()
    } else {
        model_name.to_string()
    };

    let entry = reg
        .models
        .into_iter()
        .find(|m| m.name == target)
        .ok_or_else(|| ServiceError::Registry(format!("Model `{target}` not found in registry")))?;

    if entry.kind != kind {
        return Err(ServiceError::Registry(format!(
            "Model `{target}` is a {} model, expected {}",
            entry.kind.as_str(),
            kind.as_str()
        )));
    }
    Ok(entry.manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_registry_defaults_resolve() {
        let reg = load_registry().unwrap();
        for kind in [ModelKind::VoiceClone, ModelKind::Separator] {
            let url = resolve_manifest_url("", kind).unwrap();
            let named = resolve_manifest_url(reg.default_for(kind), kind).unwrap();
            assert_eq!(url, named);
        }
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let reg = load_registry().unwrap();
        let voice = reg.default_for(ModelKind::VoiceClone).to_string();
        let err = resolve_manifest_url(&voice, ModelKind::Separator).unwrap_err();
        assert!(err.to_string().contains("expected separator"));
    }

    #[test]
    fn unknown_model_is_a_registry_error() {
        let err = resolve_manifest_url("nope", ModelKind::Separator).unwrap_err();
        assert!(matches!(err, ServiceError::Registry(_)));
    }
}
