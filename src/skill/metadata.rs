//! SKILL.md front-matter reader.
//!
//! A skill is a directory bundle: `SKILL.md` with YAML front matter, an
//! entry script under `scripts/`, an optional `.skilllite.lock`, and
//! reference documents. This module derives everything the engine needs
//! from that bundle without executing anything.

use crate::error::EngineError;
use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Raw front-matter fields as they appear in SKILL.md
#[derive(Deserialize, Debug, Clone, Default)]
struct FrontMatter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    compatibility: Option<String>,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Option<String>,
    #[serde(default)]
    requires_elevated_permissions: bool,
}

/// Skill runtime language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Node,
    Bash,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Bash => "bash",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "python" | "py" => Self::Python,
            "node" | "javascript" | "typescript" | "js" | "ts" => Self::Node,
            "bash" | "shell" | "sh" => Self::Bash,
            _ => Self::Unknown,
        }
    }

    pub fn from_extension(path: &str) -> Self {
        if path.ends_with(".py") {
            Self::Python
        } else if path.ends_with(".js") || path.ends_with(".ts") {
            Self::Node
        } else if path.ends_with(".sh") {
            Self::Bash
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network access policy derived from the `compatibility` field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkPolicy {
    pub enabled: bool,
    /// Allowed outbound hosts; `["*"]` once network is enabled via keywords
    pub outbound: Vec<String>,
}

/// One `Bash(prefix:*)` entry from `allowed-tools`.
/// The `:`-suffix is a glob placeholder the validator does not interpret;
/// validation is prefix-only.
#[derive(Debug, Clone, PartialEq)]
pub struct BashToolPattern {
    pub command_prefix: String,
    pub raw_pattern: String,
}

/// Parsed skill metadata
#[derive(Debug, Clone)]
pub struct SkillMetadata {
    pub name: String,
    pub description: Option<String>,
    /// Entry script path relative to the skill dir; None for prompt-only
    /// and bash-tool skills
    pub entry_point: Option<String>,
    pub language: Language,
    pub compatibility: Option<String>,
    pub network: NetworkPolicy,
    pub allowed_bash_patterns: Vec<BashToolPattern>,
    pub requires_elevated_permissions: bool,
    /// Packages from a fresh `.skilllite.lock`, if one exists
    pub resolved_packages: Option<Vec<String>>,
}

impl SkillMetadata {
    /// A bash-tool skill exposes an allow-listed CLI instead of a script.
    pub fn is_bash_tool_skill(&self) -> bool {
        !self.allowed_bash_patterns.is_empty() && self.entry_point.is_none()
    }

    pub fn uses_playwright(&self) -> bool {
        if let Some(ref packages) = self.resolved_packages {
            if packages.iter().any(|p| p.trim().eq_ignore_ascii_case("playwright")) {
                return true;
            }
        }
        self.compatibility
            .as_deref()
            .map(|c| c.to_lowercase().contains("playwright"))
            .unwrap_or(false)
    }
}

/// Lockfile written by init/remote-add flows; read-only to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LockFile {
    pub compatibility_hash: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub resolved_packages: Vec<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub resolver: Option<String>,
}

pub const LOCK_FILE_NAME: &str = ".skilllite.lock";

/// SHA-256 of the compatibility string; the lockfile staleness key.
pub fn compatibility_hash(compatibility: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(compatibility.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Read `.skilllite.lock` and return its packages if the lock is fresh
/// (its hash matches the current compatibility string).
pub fn read_lock_packages(skill_dir: &Path, compatibility: Option<&str>) -> Option<Vec<String>> {
    let content = fs::read_to_string(skill_dir.join(LOCK_FILE_NAME)).ok()?;
    let lock: LockFile = serde_json::from_str(&content).ok()?;

    if lock.compatibility_hash != compatibility_hash(compatibility) {
        tracing::debug!("Lock file stale: compatibility hash mismatch");
        return None;
    }
    if lock.resolved_packages.is_empty() {
        return None;
    }
    Some(lock.resolved_packages)
}

/// Parse `SKILL.md` in `skill_dir` and derive the full metadata.
pub fn parse_skill_metadata(skill_dir: &Path) -> Result<SkillMetadata> {
    let skill_md = skill_dir.join("SKILL.md");
    if !skill_md.exists() {
        return Err(EngineError::MissingManifest(skill_dir.display().to_string()).into());
    }

    let content = fs::read_to_string(&skill_md)
        .map_err(|e| EngineError::InvalidManifest(format!("cannot read SKILL.md: {}", e)))?;

    let front_matter = extract_front_matter(&content)?;

    let dir_name = skill_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    // Declared names are validated strictly; a directory-derived fallback
    // only warns so undeclared bundles stay loadable.
    let name = if front_matter.name.is_empty() {
        if let Err(reason) = validate_skill_name(&dir_name) {
            tracing::warn!("Skill directory name '{}' is not a valid skill name: {}", dir_name, reason);
        }
        dir_name.clone()
    } else {
        if let Err(reason) = validate_skill_name(&front_matter.name) {
            return Err(EngineError::InvalidManifest(format!(
                "bad skill name '{}': {}",
                front_matter.name, reason
            ))
            .into());
        }
        front_matter.name.clone()
    };
    if name != dir_name {
        tracing::warn!(
            "Skill name '{}' does not match directory name '{}'",
            name,
            dir_name
        );
    }

    let entry_point = front_matter
        .entry_point
        .clone()
        .or_else(|| detect_entry_point(skill_dir));

    let language = front_matter
        .language
        .as_deref()
        .map(Language::from_name)
        .filter(|l| *l != Language::Unknown)
        .or_else(|| language_from_compatibility(front_matter.compatibility.as_deref()))
        .or_else(|| {
            entry_point
                .as_deref()
                .map(Language::from_extension)
                .filter(|l| *l != Language::Unknown)
        })
        .unwrap_or(Language::Unknown);

    let network = network_from_compatibility(front_matter.compatibility.as_deref());

    let allowed_bash_patterns = front_matter
        .allowed_tools
        .as_deref()
        .map(parse_allowed_tools)
        .unwrap_or_default();

    let resolved_packages = read_lock_packages(skill_dir, front_matter.compatibility.as_deref());

    Ok(SkillMetadata {
        name,
        description: front_matter.description,
        entry_point,
        language,
        compatibility: front_matter.compatibility,
        network,
        allowed_bash_patterns,
        requires_elevated_permissions: front_matter.requires_elevated_permissions,
        resolved_packages,
    })
}

/// Extract the leading YAML block delimited by `---` lines.
/// A missing block yields empty metadata; unparseable YAML is an error.
fn extract_front_matter(content: &str) -> Result<FrontMatter> {
    let re = Regex::new(r"(?s)^---\s*\n(.*?)\n---").expect("front matter regex is valid");
    let Some(captures) = re.captures(content) else {
        return Ok(FrontMatter::default());
    };
    let yaml = captures.get(1).map(|m| m.as_str()).unwrap_or("");
    serde_yaml::from_str(yaml)
        .map_err(|e| EngineError::InvalidManifest(format!("YAML front matter: {}", e)).into())
}

/// Skill names are lowercase kebab-case, at most 64 chars, with no
/// leading/trailing/consecutive hyphens.
pub fn validate_skill_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("empty".to_string());
    }
    if name.len() > 64 {
        return Err("longer than 64 characters".to_string());
    }
    let re = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("name regex is valid");
    if !re.is_match(name) {
        return Err("must be lowercase kebab-case".to_string());
    }
    Ok(())
}

/// Find all `Bash(<inner>)` occurrences; split `inner` at the first `:`.
pub fn parse_allowed_tools(raw: &str) -> Vec<BashToolPattern> {
    let re = Regex::new(r"Bash\(([^)]+)\)").expect("allowed-tools regex is valid");
    re.captures_iter(raw)
        .filter_map(|cap| {
            let inner = cap.get(1)?.as_str();
            let prefix = match inner.find(':') {
                Some(idx) => &inner[..idx],
                None => inner,
            };
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return None;
            }
            Some(BashToolPattern {
                command_prefix: prefix.to_string(),
                raw_pattern: inner.to_string(),
            })
        })
        .collect()
}

const NETWORK_KEYWORDS: &[&str] = &["network", "internet", "http", "api", "web"];

fn network_from_compatibility(compatibility: Option<&str>) -> NetworkPolicy {
    let Some(compat) = compatibility else {
        return NetworkPolicy::default();
    };
    let lower = compat.to_lowercase();
    if NETWORK_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        NetworkPolicy {
            enabled: true,
            outbound: vec!["*".to_string()],
        }
    } else {
        NetworkPolicy::default()
    }
}

fn language_from_compatibility(compatibility: Option<&str>) -> Option<Language> {
    let lower = compatibility?.to_lowercase();
    if lower.contains("python") {
        Some(Language::Python)
    } else if lower.contains("node") || lower.contains("javascript") || lower.contains("typescript") {
        Some(Language::Node)
    } else if lower.contains("bash") || lower.contains("shell") {
        Some(Language::Bash)
    } else {
        None
    }
}

const SCRIPT_EXTENSIONS: &[&str] = &["py", "js", "ts", "sh"];

fn is_test_script(name: &str) -> bool {
    name.starts_with("test_")
        || name.ends_with("_test.py")
        || name == "__init__.py"
        || name.starts_with('.')
}

/// Detect the entry point when the front matter does not declare one:
/// well-known stems first, then the unique non-test script.
fn detect_entry_point(skill_dir: &Path) -> Option<String> {
    let scripts_dir = skill_dir.join("scripts");
    if !scripts_dir.is_dir() {
        return None;
    }

    for stem in ["main", "index", "run", "entry"] {
        for ext in SCRIPT_EXTENSIONS {
            let candidate = format!("{}.{}", stem, ext);
            if scripts_dir.join(&candidate).exists() {
                return Some(format!("scripts/{}", candidate));
            }
        }
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(&scripts_dir).ok()?.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SCRIPT_EXTENSIONS.contains(&ext) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_test_script(&name) {
            scripts.push(format!("scripts/{}", name));
        }
    }

    if scripts.len() == 1 {
        scripts.pop()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_skill(dir: &Path, front_matter: &str) {
        fs::write(
            dir.join("SKILL.md"),
            format!("---\n{}\n---\n\n# Body\n", front_matter),
        )
        .unwrap();
    }

    #[test]
    fn test_parse_basic_skill() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("calculator");
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(dir.join("scripts/main.py"), "print('{}')").unwrap();
        write_skill(
            &dir,
            "name: calculator\ndescription: Does math\ncompatibility: Requires Python 3.x",
        );

        let meta = parse_skill_metadata(&dir).unwrap();
        assert_eq!(meta.name, "calculator");
        assert_eq!(meta.entry_point.as_deref(), Some("scripts/main.py"));
        assert_eq!(meta.language, Language::Python);
        assert!(!meta.network.enabled);
        assert!(!meta.is_bash_tool_skill());
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = parse_skill_metadata(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::MissingManifest(_))
        ));
    }

    #[test]
    fn test_invalid_yaml_is_invalid_manifest() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SKILL.md"), "---\nname: [unclosed\n---\n").unwrap();
        let err = parse_skill_metadata(&dir).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_no_front_matter_falls_back_to_dir_name() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("plain-skill");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SKILL.md"), "# Just a body\n").unwrap();
        let meta = parse_skill_metadata(&dir).unwrap();
        assert_eq!(meta.name, "plain-skill");
        assert_eq!(meta.entry_point, None);
    }

    #[test]
    fn test_network_keywords() {
        assert!(network_from_compatibility(Some("Requires network access")).enabled);
        assert!(network_from_compatibility(Some("Requires internet")).enabled);
        assert!(network_from_compatibility(Some("Calls a web API")).enabled);
        assert!(!network_from_compatibility(Some("Requires git, docker")).enabled);
        assert!(!network_from_compatibility(None).enabled);
        assert_eq!(
            network_from_compatibility(Some("http client")).outbound,
            vec!["*"]
        );
    }

    #[test]
    fn test_language_inference_order() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("lang-test");
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(dir.join("scripts/main.js"), "").unwrap();

        // Explicit field wins over compatibility and extension
        write_skill(
            &dir,
            "name: lang-test\nlanguage: python\ncompatibility: Requires Node.js",
        );
        assert_eq!(parse_skill_metadata(&dir).unwrap().language, Language::Python);

        // Compatibility wins over extension
        write_skill(&dir, "name: lang-test\ncompatibility: Requires Python 3.x");
        assert_eq!(parse_skill_metadata(&dir).unwrap().language, Language::Python);

        // Extension is the fallback
        write_skill(&dir, "name: lang-test");
        assert_eq!(parse_skill_metadata(&dir).unwrap().language, Language::Node);
    }

    #[test]
    fn test_entry_point_priority_and_unique_fallback() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("entry-test");
        fs::create_dir_all(dir.join("scripts")).unwrap();
        write_skill(&dir, "name: entry-test");

        fs::write(dir.join("scripts/tool.py"), "").unwrap();
        fs::write(dir.join("scripts/test_tool.py"), "").unwrap();
        fs::write(dir.join("scripts/__init__.py"), "").unwrap();
        assert_eq!(
            parse_skill_metadata(&dir).unwrap().entry_point.as_deref(),
            Some("scripts/tool.py")
        );

        // A main.* beats the unique-script fallback
        fs::write(dir.join("scripts/main.py"), "").unwrap();
        assert_eq!(
            parse_skill_metadata(&dir).unwrap().entry_point.as_deref(),
            Some("scripts/main.py")
        );
    }

    #[test]
    fn test_bash_tool_patterns() {
        let patterns = parse_allowed_tools("Bash(agent-browser:*), Bash(screenshot:capture)");
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].command_prefix, "agent-browser");
        assert_eq!(patterns[0].raw_pattern, "agent-browser:*");
        assert_eq!(patterns[1].command_prefix, "screenshot");

        // No colon: whole inner is the prefix
        let bare = parse_allowed_tools("Bash(mytool)");
        assert_eq!(bare[0].command_prefix, "mytool");

        assert!(parse_allowed_tools("Read, Write").is_empty());
    }

    #[test]
    fn test_bash_tool_skill_detection() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("browser-tool");
        fs::create_dir_all(&dir).unwrap();
        write_skill(
            &dir,
            "name: browser-tool\nallowed-tools: Bash(agent-browser:*)",
        );
        let meta = parse_skill_metadata(&dir).unwrap();
        assert!(meta.is_bash_tool_skill());
        assert_eq!(meta.allowed_bash_patterns.len(), 1);
    }

    #[test]
    fn test_skill_name_rules() {
        assert!(validate_skill_name("calculator").is_ok());
        assert!(validate_skill_name("pdf-to-text").is_ok());
        assert!(validate_skill_name("Has-Upper").is_err());
        assert!(validate_skill_name("-leading").is_err());
        assert!(validate_skill_name("trailing-").is_err());
        assert!(validate_skill_name("double--hyphen").is_err());
        assert!(validate_skill_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_lockfile_staleness() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let compat = "Requires Python 3.x with requests";
        let lock = serde_json::json!({
            "compatibility_hash": compatibility_hash(Some(compat)),
            "language": "python",
            "resolved_packages": ["requests"],
            "resolved_at": "2025-01-01T00:00:00Z",
            "resolver": "whitelist",
        });
        fs::write(dir.join(LOCK_FILE_NAME), lock.to_string()).unwrap();

        assert_eq!(
            read_lock_packages(&dir, Some(compat)),
            Some(vec!["requests".to_string()])
        );
        // Changed compatibility ⇒ stale ⇒ ignored
        assert_eq!(read_lock_packages(&dir, Some("Requires numpy")), None);
    }

    #[test]
    fn test_requires_elevated_permissions() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("elevated");
        fs::create_dir_all(&dir).unwrap();
        write_skill(&dir, "name: elevated\nrequires_elevated_permissions: true");
        assert!(parse_skill_metadata(&dir).unwrap().requires_elevated_permissions);
    }
}
