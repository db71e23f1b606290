use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "config/server.json";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub meta: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub model_dir: PathBuf,
    pub day_model: Option<ModelPaths>,
    pub hour_model: Option<ModelPaths>,
    pub history_capacity: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub log_vectors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            model_dir: PathBuf::from("saved_models"),
            day_model: None,
            hour_model: None,
            history_capacity: 100,
            gemini_api_key: None,
            gemini_model: crate::chat::DEFAULT_GEMINI_MODEL.to_string(),
            log_vectors: false,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// Config file (`CONFIG_PATH`, or the default path when present) overlaid by env vars.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from a key lookup (env vars in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(paths) = paths_from(&lookup, "DAY_MODEL_PATH", "DAY_META_PATH") {
            self.day_model = Some(paths);
        }
        if let Some(paths) = paths_from(&lookup, "HOUR_MODEL_PATH", "HOUR_META_PATH") {
            self.hour_model = Some(paths);
        }
        if let Some(cap) = lookup("HISTORY_CAPACITY").and_then(|s| s.parse().ok()) {
            self.history_capacity = cap;
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            self.gemini_model = model;
        }
        if lookup("LOG_PRED").as_deref() == Some("1") {
            self.log_vectors = true;
        }
        self
    }

    pub fn day_paths(&self) -> ModelPaths {
        self.day_model.clone().unwrap_or_else(|| ModelPaths {
            model: self.model_dir.join("best_day_model.json"),
            meta: self.model_dir.join("day_meta.json"),
        })
    }

    pub fn hour_paths(&self) -> ModelPaths {
        self.hour_model.clone().unwrap_or_else(|| ModelPaths {
            model: self.model_dir.join("best_hour_model.json"),
            meta: self.model_dir.join("hour_meta.json"),
        })
    }
}

fn paths_from<F>(lookup: &F, model_key: &str, meta_key: &str) -> Option<ModelPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let model = PathBuf::from(lookup(model_key)?);
    let meta = lookup(meta_key)
        .map(PathBuf::from)
        .unwrap_or_else(|| model.with_extension("meta.json"));
    Some(ModelPaths { model, meta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_saved_models() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.day_paths().model, PathBuf::from("saved_models/best_day_model.json"));
        assert_eq!(cfg.hour_paths().meta, PathBuf::from("saved_models/hour_meta.json"));
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = ServerConfig::default().with_overrides(lookup(&[
            ("PORT", "8080"),
            ("DAY_MODEL_PATH", "/models/day.pt"),
            ("GEMINI_API_KEY", "  "),
            ("LOG_PRED", "1"),
        ]));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.day_paths().model, PathBuf::from("/models/day.pt"));
        assert_eq!(cfg.day_paths().meta, PathBuf::from("/models/day.meta.json"));
        assert!(cfg.gemini_api_key.is_none());
        assert!(cfg.log_vectors);
    }

    #[test]
    fn bad_port_is_ignored() {
        let cfg = ServerConfig::default().with_overrides(lookup(&[("PORT", "not-a-port")]));
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 7000, "model_dir": "m"}"#).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.gemini_model, "gemini-2.5-flash");
        assert_eq!(cfg.day_paths().model, PathBuf::from("m/best_day_model.json"));
    }
}
