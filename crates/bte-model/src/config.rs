//! Editor configuration, loaded from YAML.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bte_runtime::ChildConstraint;
use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Oldest commands are evicted past this many.
    pub history_limit: Option<usize>,

    /// Panic instead of logging when the integrity check finds duplicates.
    pub strict_integrity: bool,

    /// Reset the runtime tree after every structural edit.
    #[serde(default = "default_reset_on_edit")]
    pub reset_on_edit: bool,

    /// Child-count overrides keyed by task type name.
    pub constraints: BTreeMap<String, ConstraintOverride>,
}

fn default_reset_on_edit() -> bool {
    true
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            strict_integrity: false,
            reset_on_edit: default_reset_on_edit(),
            constraints: BTreeMap::new(),
        }
    }
}

/// Child bounds for one task type. A missing `max` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintOverride {
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

impl ConstraintOverride {
    pub fn to_constraint(self) -> ChildConstraint {
        ChildConstraint::new(self.min, self.max.unwrap_or(ChildConstraint::UNBOUNDED))
    }
}

impl EditorConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Like [`load`](Self::load), falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        for (type_name, bounds) in &self.constraints {
            if let Some(max) = bounds.max {
                if bounds.min > max {
                    bail!("constraint for {type_name}: min {} exceeds max {max}", bounds.min);
                }
            }
        }
        Ok(())
    }

    /// Registers every override into `registry`.
    pub fn apply_constraints(&self, registry: &mut ConstraintRegistry) {
        for (type_name, bounds) in &self.constraints {
            registry.register(type_name.clone(), bounds.to_constraint());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_reset_on_edit() {
        let config = EditorConfig::from_yaml("strict_integrity: true\n").unwrap();
        assert!(config.reset_on_edit);
        assert!(config.strict_integrity);
        assert_eq!(config.history_limit, None);
    }

    #[test]
    fn loads_constraint_overrides_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "history_limit: 50\nconstraints:\n  Sequence:\n    min: 2\n  Repeat:\n    min: 1\n    max: 1\n"
        )
        .unwrap();

        let config = EditorConfig::load(file.path()).unwrap();
        assert_eq!(config.history_limit, Some(50));

        let mut registry = ConstraintRegistry::new();
        config.apply_constraints(&mut registry);
        assert_eq!(registry.get("Sequence"), Some(ChildConstraint::at_least(2)));
        assert_eq!(registry.get("Repeat"), Some(ChildConstraint::exactly(1)));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = EditorConfig::from_yaml("constraints:\n  Sequence:\n    min: 3\n    max: 1\n")
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, EditorConfig::default());
        assert!(EditorConfig::load(&dir.path().join("absent.yaml")).is_err());
    }
}
