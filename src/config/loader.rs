//! File loaders shared by configuration and legal-hold files

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::AuditError;

/// Load a YAML file and deserialize it
pub fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AuditError> {
    if !path.exists() {
        return Err(AuditError::ConfigError(format!(
            "Configuration file not found: {:?}",
            path
        )));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| AuditError::ConfigError(format!("Failed to read {:?}: {}", path, e)))?;

    debug!("Parsing YAML file {:?}", path);
    serde_yaml::from_str(&contents)
        .map_err(|e| AuditError::ConfigError(format!("Failed to parse {:?}: {}", path, e)))
}
