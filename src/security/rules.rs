//! Security rule definitions and the optional per-skill rules config.

use super::types::{IssueType, Severity};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A single scanning rule: a regex pattern tied to a severity and category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRule {
    pub id: String,
    pub pattern: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    /// Languages this rule applies to; empty = all
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SecurityRule {
    pub fn new(
        id: &str,
        pattern: &str,
        issue_type: IssueType,
        severity: Severity,
        description: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            issue_type,
            severity,
            description: description.to_string(),
            languages: Vec::new(),
            enabled: true,
        }
    }

    pub fn for_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn compile(&self) -> Result<Regex> {
        Regex::new(&self.pattern)
            .with_context(|| format!("Failed to compile regex for rule '{}'", self.id))
    }
}

/// Optional per-skill rules configuration, loaded from
/// `.agentskill-rules.yaml` in the skill directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    #[serde(default = "default_use_defaults")]
    pub use_default_rules: bool,
}

fn default_use_defaults() -> bool {
    true
}

const CONFIG_FILE_NAMES: &[&str] = &[".agentskill-rules.yaml", ".agentskill-rules.yml"];

impl RulesConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules config: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse rules config: {}", path.display()))
    }

    pub fn load_or_default(skill_dir: Option<&Path>) -> Self {
        if let Some(dir) = skill_dir {
            for name in CONFIG_FILE_NAMES {
                let config_path = dir.join(name);
                if config_path.exists() {
                    if let Ok(config) = Self::load_from_file(&config_path) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }
}
