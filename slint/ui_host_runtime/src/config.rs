use crate::module;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODULE_NAME: &str = "ScriptUi";
const DEFAULT_BRIDGE_QUEUE_CAP: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub module_name: String,
    /// Directory the command module is loaded from.
    pub base_dir: PathBuf,
    pub queue_capacity: usize,
}

impl RuntimeConfig {
    /// Reads `SCRIPTUI_MODULE`, `SCRIPTUI_BASE_DIR` and
    /// `SCRIPTUI_BRIDGE_QUEUE_CAP`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let module_name = lookup("SCRIPTUI_MODULE")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string());

        let base_dir = lookup("SCRIPTUI_BASE_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(application_base_dir);

        let queue_capacity = lookup("SCRIPTUI_BRIDGE_QUEUE_CAP")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BRIDGE_QUEUE_CAP);

        Self {
            module_name,
            base_dir,
            queue_capacity,
        }
    }

    pub fn module_descriptor_path(&self) -> PathBuf {
        module::descriptor_path(&self.base_dir, &self.module_name)
    }
}

fn application_base_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_resolve_module_next_to_executable() {
        let config = config_from(&[]);
        assert_eq!(config.module_name, "ScriptUi");
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.base_dir, application_base_dir());
        assert!(config.module_descriptor_path().ends_with("ScriptUi.module.json"));
    }

    #[test]
    fn overrides_are_honored() {
        let config = config_from(&[
            ("SCRIPTUI_MODULE", "Custom"),
            ("SCRIPTUI_BASE_DIR", "/srv/app"),
            ("SCRIPTUI_BRIDGE_QUEUE_CAP", "4"),
        ]);
        assert_eq!(
            config.module_descriptor_path(),
            PathBuf::from("/srv/app/Custom.module.json")
        );
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn invalid_queue_capacity_falls_back() {
        assert_eq!(config_from(&[("SCRIPTUI_BRIDGE_QUEUE_CAP", "0")]).queue_capacity, 64);
        assert_eq!(config_from(&[("SCRIPTUI_BRIDGE_QUEUE_CAP", "lots")]).queue_capacity, 64);
    }
}
