use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::defaults::RagConfig;
use super::validation::validate_config;
use crate::core::errors::RagError;

pub const CONFIG_PATH_ENV: &str = "RAG_CONFIG_PATH";

#[derive(Debug, Clone)]
pub struct ConfigService {
    default_path: PathBuf,
}

impl ConfigService {
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: default_path.into(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        self.default_path.clone()
    }

    /// Load the YAML file (if present) over the built-in defaults and validate.
    pub fn load_config(&self) -> Result<RagConfig, RagError> {
        load_config_from(&self.config_path())
    }
}

pub fn load_config_from(path: &Path) -> Result<RagConfig, RagError> {
    let defaults = serde_json::to_value(RagConfig::default())
        .map_err(|e| RagError::InvalidConfig(e.to_string()))?;
    let file_config = load_yaml_file(path)?;
    let merged = deep_merge(&defaults, &file_config);

    let config: RagConfig = serde_json::from_value(merged)
        .map_err(|e| RagError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
    validate_config(&config)?;

    tracing::debug!("Loaded retrieval config from {}", path.display());
    Ok(config)
}

fn load_yaml_file(path: &Path) -> Result<Value, RagError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| RagError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
    if contents.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(RagError::InvalidConfig(format!(
            "{}: root must be a mapping",
            path.display()
        ))),
        Err(e) => Err(RagError::InvalidConfig(format!("{}: {}", path.display(), e))),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}
