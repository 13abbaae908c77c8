use crate::error::BridgeError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MODULE_DESCRIPTOR_EXTENSION: &str = "module.json";

/// Descriptor of a command module, read from
/// `<base-dir>/<name>.module.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Script file, relative to the descriptor.
    pub root_module: String,
    /// Commands to export. Empty exports every function the script defines.
    #[serde(default)]
    pub commands: Vec<String>,
}

impl ModuleDescriptor {
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let raw = fs::read_to_string(path).map_err(|err| BridgeError::ImportFailure {
            path: path.to_path_buf(),
            reason: format!("cannot read module descriptor: {err}"),
        })?;

        serde_json::from_str(&raw).map_err(|err| BridgeError::ImportFailure {
            path: path.to_path_buf(),
            reason: format!("invalid module descriptor: {err}"),
        })
    }

    pub fn root_module_path(&self, descriptor_path: &Path) -> PathBuf {
        descriptor_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.root_module)
    }

    pub fn exports(&self, command: &str) -> bool {
        self.commands.is_empty() || self.commands.iter().any(|name| name == command)
    }
}

pub fn descriptor_path(base_dir: &Path, module_name: &str) -> PathBuf {
    base_dir.join(format!("{module_name}.{MODULE_DESCRIPTOR_EXTENSION}"))
}
