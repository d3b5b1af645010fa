//! Dependency resolution pipeline: Lock → LLM → Whitelist.
//!
//! Packages come from the `compatibility` free text in SKILL.md. The fast
//! path is a fresh `.skilllite.lock`; the cold path asks an LLM for
//! installable package names and keeps only those the registry confirms;
//! the offline fallback is word-boundary matching against the embedded
//! whitelist. The result is always sorted and deduplicated.

use crate::error::EngineError;
use crate::skill::metadata::{self, Language};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Which resolver layer produced the package list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Lock,
    Llm,
    Whitelist,
    None,
}

impl std::fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lock => write!(f, "lock"),
            Self::Llm => write!(f, "llm"),
            Self::Whitelist => write!(f, "whitelist"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPackages {
    /// Sorted, deduplicated, pip/npm-installable names
    pub packages: Vec<String>,
    pub resolver: ResolverKind,
}

/// Resolve the package list for a skill.
///
/// Lockfile-derived packages are validated against the whitelist unless
/// `allow_unknown` is set; an unknown package rejects the whole
/// resolution.
pub fn resolve_packages(
    skill_dir: &Path,
    compatibility: Option<&str>,
    language: Language,
    allow_unknown: bool,
) -> Result<ResolvedPackages> {
    // Layer 1: fresh lockfile
    if let Some(packages) = metadata::read_lock_packages(skill_dir, compatibility) {
        tracing::debug!("Resolved from lock: {:?}", packages);
        let packages = sort_dedup(packages);
        if !allow_unknown {
            reject_unknown(&packages, language)?;
        }
        return Ok(ResolvedPackages {
            packages,
            resolver: ResolverKind::Lock,
        });
    }

    let compat = compatibility.unwrap_or("").trim();
    if compat.is_empty() {
        return Ok(ResolvedPackages {
            packages: Vec::new(),
            resolver: ResolverKind::None,
        });
    }

    // Layer 2: LLM extraction, opt-in via credentials, offline-safe.
    // Registry verification is the gate here, not the whitelist.
    if let Some(packages) = resolve_from_llm(compat, language) {
        return Ok(ResolvedPackages {
            packages: sort_dedup(packages),
            resolver: ResolverKind::Llm,
        });
    }

    // Layer 3: whitelist matching
    let packages = sort_dedup(resolve_from_whitelist(compat, language));
    if packages.is_empty() {
        return Ok(ResolvedPackages {
            packages,
            resolver: ResolverKind::None,
        });
    }
    Ok(ResolvedPackages {
        packages,
        resolver: ResolverKind::Whitelist,
    })
}

fn sort_dedup(mut packages: Vec<String>) -> Vec<String> {
    packages.sort();
    packages.dedup();
    packages
}

fn reject_unknown(packages: &[String], language: Language) -> Result<()> {
    let unknown = validate_against_whitelist(packages, language);
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(EngineError::UnknownPackage(unknown.join(", ")).into())
    }
}

// ─── LLM extraction layer ────────────────────────────────────────────────────

fn llm_credentials() -> Option<(String, String, String)> {
    let key = std::env::var("SKILLBOX_LLM_API_KEY").ok().filter(|k| !k.is_empty())?;
    let base = std::env::var("SKILLBOX_LLM_API_BASE")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let model = std::env::var("SKILLBOX_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    Some((key, base, model))
}

/// Ask the LLM for installable package names, then keep only the candidates
/// the real registry confirms. Returns None when credentials are absent or
/// anything fails, so the pipeline falls through to the whitelist.
fn resolve_from_llm(compatibility: &str, language: Language) -> Option<Vec<String>> {
    let (key, base, model) = llm_credentials()?;

    let prompt = format!(
        "Extract the exact installable package names from this compatibility string.\n\
         Language: {}\n\
         Compatibility: \"{}\"\n\n\
         Rules:\n\
         - Only return names installable via pip (Python) or npm (Node.js).\n\
         - No standard library modules, language runtimes, or system tools.\n\
         - Reply with a JSON array of strings, nothing else.\n\
         - If there are no installable packages, reply [].",
        language, compatibility
    );

    let body = serde_json::json!({
        "model": model,
        "temperature": 0.0,
        "messages": [{"role": "user", "content": prompt}],
    });

    let resp: serde_json::Value = ureq::post(&format!("{}/chat/completions", base))
        .set("Authorization", &format!("Bearer {}", key))
        .timeout(Duration::from_secs(20))
        .send_json(body)
        .ok()?
        .into_json()
        .ok()?;

    let text = resp
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?;

    let candidates = parse_llm_reply(text)?;

    let verified: Vec<String> = candidates
        .into_iter()
        .filter(|pkg| {
            let ok = verify_package_exists(pkg, language);
            if !ok {
                tracing::debug!("LLM-suggested package '{}' failed registry verification", pkg);
            }
            ok
        })
        .collect();

    if verified.is_empty() {
        None
    } else {
        Some(verified)
    }
}

/// JSON-parse the LLM reply, tolerating a fenced code block around the array.
fn parse_llm_reply(text: &str) -> Option<Vec<String>> {
    let trimmed = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let arr = value.as_array()?;
    let names: Vec<String> = arr
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

/// HEAD-probe PyPI / npm for existence.
fn verify_package_exists(name: &str, language: Language) -> bool {
    let url = match language {
        Language::Python => format!("https://pypi.org/pypi/{}/json", name),
        Language::Node => format!("https://registry.npmjs.org/{}", name),
        _ => return false,
    };
    matches!(
        ureq::head(&url).timeout(Duration::from_secs(5)).call(),
        Ok(resp) if resp.status() < 400
    )
}

// ─── Whitelist layer ─────────────────────────────────────────────────────────

/// Match known package names in the compatibility string.
pub fn resolve_from_whitelist(compatibility: &str, language: Language) -> Vec<String> {
    let (packages, aliases) = match language {
        Language::Python => (PYTHON_PACKAGES, PYTHON_ALIASES),
        Language::Node => (NODE_PACKAGES, NODE_ALIASES),
        _ => return Vec::new(),
    };

    let compat_lower = compatibility.to_lowercase();
    let mut matched = Vec::new();

    for pkg in packages {
        if contains_whole_word(&compat_lower, &pkg.to_lowercase()) {
            matched.push(pkg.to_string());
        }
    }
    for (alias, canonical) in aliases {
        if contains_whole_word(&compat_lower, &alias.to_lowercase()) {
            let canonical = canonical.to_string();
            if !matched.contains(&canonical) {
                matched.push(canonical);
            }
        }
    }
    matched
}

/// Whole-word containment: an occurrence of `word` counts only when the
/// characters on both sides are absent or non-alphanumeric, so
/// "request handling" never pulls in "requests". Package names may carry
/// `-`, `.`, `@`, or `/`, which rules out `\b`-style regex anchors here.
fn contains_whole_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(at, hit)| {
        let edge_before = text[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let edge_after = text[at + hit.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        edge_before && edge_after
    })
}

/// Return the packages that are not in the language's whitelist.
/// Extras in `[brackets]` are stripped before lookup.
pub fn validate_against_whitelist(packages: &[String], language: Language) -> Vec<String> {
    let known: HashSet<String> = match language {
        Language::Python => PYTHON_PACKAGES.iter().map(|p| p.to_lowercase()).collect(),
        Language::Node => NODE_PACKAGES.iter().map(|p| p.to_lowercase()).collect(),
        _ => HashSet::new(),
    };
    let aliases: HashMap<String, String> = match language {
        Language::Python => PYTHON_ALIASES
            .iter()
            .map(|(a, c)| (a.to_lowercase(), c.to_lowercase()))
            .collect(),
        _ => HashMap::new(),
    };

    packages
        .iter()
        .filter(|p| {
            let normalized = p.to_lowercase().replace('_', "-");
            let base = normalized.split('[').next().unwrap_or(&normalized);
            !known.contains(base) && !aliases.contains_key(base)
        })
        .cloned()
        .collect()
}

/// Python package whitelist, shared with every language binding.
const PYTHON_PACKAGES: &[&str] = &[
    // HTTP / networking
    "requests", "httpx", "aiohttp", "urllib3", "httplib2",
    // Data science
    "numpy", "pandas", "scipy", "scikit-learn", "statsmodels",
    // ML / AI
    "tensorflow", "keras", "torch", "transformers",
    "xgboost", "lightgbm", "catboost", "onnx", "onnxruntime",
    // Visualization
    "matplotlib", "seaborn", "plotly", "bokeh", "altair",
    // Web frameworks
    "flask", "django", "fastapi", "starlette", "uvicorn", "gunicorn",
    "sanic", "tornado", "bottle",
    // Scraping / parsing
    "beautifulsoup4", "lxml", "scrapy", "selenium", "playwright",
    "html5lib", "cssselect",
    // Image / media
    "pillow", "opencv-python", "imageio", "scikit-image",
    // Config / serialization
    "pyyaml", "toml", "tomli", "python-dotenv",
    "pydantic", "attrs", "marshmallow",
    // Database
    "sqlalchemy", "psycopg2", "psycopg2-binary", "pymysql", "redis",
    "pymongo", "asyncpg", "aiosqlite", "peewee",
    // Cloud
    "boto3", "botocore", "google-cloud-storage", "google-auth",
    "azure-storage-blob", "azure-identity",
    // Testing
    "pytest", "mock", "responses",
    // CLI / output
    "click", "typer", "fire", "rich", "tqdm", "colorama",
    // Templates
    "jinja2", "mako",
    // Crypto / auth
    "cryptography", "pyjwt", "passlib", "bcrypt", "paramiko",
    // Logging
    "loguru", "structlog",
    // Time
    "arrow", "pendulum", "python-dateutil", "pytz",
    // Encoding
    "chardet", "charset-normalizer",
    // Docs / files
    "openpyxl", "python-docx", "pypdf", "reportlab",
];

/// Alias → canonical pip name
const PYTHON_ALIASES: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("pil", "pillow"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "pyyaml"),
    ("dotenv", "python-dotenv"),
    ("jwt", "pyjwt"),
    ("skimage", "scikit-image"),
    ("pytorch", "torch"),
];

/// Node.js package whitelist
const NODE_PACKAGES: &[&str] = &[
    // HTTP
    "axios", "node-fetch", "got", "superagent", "ky",
    // Web frameworks
    "express", "koa", "fastify", "next",
    // Utility
    "lodash", "underscore", "ramda",
    // Time
    "moment", "dayjs", "date-fns", "luxon",
    // Scraping
    "cheerio", "puppeteer", "playwright",
    // Database
    "mongoose", "sequelize", "knex", "prisma", "typeorm",
    "ioredis", "redis",
    // Cloud
    "aws-sdk", "@aws-sdk/client-s3", "googleapis",
    // Testing
    "jest", "mocha", "chai", "vitest", "sinon",
    // CLI / output
    "commander", "yargs", "inquirer", "meow",
    "chalk", "ora", "boxen", "cli-table3",
    // Config
    "dotenv", "convict",
    // Auth / ids
    "jsonwebtoken", "bcrypt", "crypto-js", "uuid", "nanoid",
    // Realtime
    "socket.io", "ws",
    // Image
    "sharp", "jimp",
    // TypeScript
    "typescript", "ts-node", "tsx",
    // Validation
    "zod", "yup", "joi", "ajv",
    // Files / misc
    "glob", "minimatch", "chokidar", "fs-extra",
    "debug", "winston", "pino",
    "execa", "cross-env",
    "agent-browser",
];

const NODE_ALIASES: &[(&str, &str)] = &[("socket.io-client", "socket.io")];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::metadata::{compatibility_hash, LOCK_FILE_NAME};
    use tempfile::TempDir;

    #[test]
    fn test_whitelist_matching_python() {
        let pkgs = resolve_from_whitelist("Requires Python 3.x with requests library", Language::Python);
        assert!(pkgs.contains(&"requests".to_string()));
    }

    #[test]
    fn test_whitelist_aliases() {
        let pkgs = resolve_from_whitelist("Requires Python with cv2 and PIL", Language::Python);
        assert!(pkgs.contains(&"opencv-python".to_string()));
        assert!(pkgs.contains(&"pillow".to_string()));
    }

    #[test]
    fn test_whitelist_no_partial_match() {
        let pkgs = resolve_from_whitelist("Requires request handling", Language::Python);
        assert!(!pkgs.contains(&"requests".to_string()));
    }

    #[test]
    fn test_whitelist_node() {
        let pkgs = resolve_from_whitelist("Requires Node.js with axios, lodash", Language::Node);
        assert!(pkgs.contains(&"axios".to_string()));
        assert!(pkgs.contains(&"lodash".to_string()));
    }

    #[test]
    fn test_validate_against_whitelist_strips_extras() {
        let unknown = validate_against_whitelist(
            &["requests[socks]".to_string(), "my-custom-pkg".to_string()],
            Language::Python,
        );
        assert_eq!(unknown, vec!["my-custom-pkg".to_string()]);
    }

    #[test]
    fn test_lock_layer_wins_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let compat = "Requires Python with numpy pandas";
        let lock = serde_json::json!({
            "compatibility_hash": compatibility_hash(Some(compat)),
            "language": "python",
            "resolved_packages": ["pandas", "numpy", "pandas"],
            "resolver": "lock",
        });
        std::fs::write(tmp.path().join(LOCK_FILE_NAME), lock.to_string()).unwrap();

        let resolved =
            resolve_packages(tmp.path(), Some(compat), Language::Python, false).unwrap();
        assert_eq!(resolved.resolver, ResolverKind::Lock);
        assert_eq!(resolved.packages, vec!["numpy", "pandas"]);
    }

    #[test]
    fn test_lock_unknown_package_rejected() {
        let tmp = TempDir::new().unwrap();
        let compat = "custom";
        let lock = serde_json::json!({
            "compatibility_hash": compatibility_hash(Some(compat)),
            "language": "python",
            "resolved_packages": ["totally-unknown-pkg"],
            "resolver": "lock",
        });
        std::fs::write(tmp.path().join(LOCK_FILE_NAME), lock.to_string()).unwrap();

        let err = resolve_packages(tmp.path(), Some(compat), Language::Python, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::EngineError>(),
            Some(crate::error::EngineError::UnknownPackage(_))
        ));

        // allow_unknown bypasses the check
        let ok = resolve_packages(tmp.path(), Some(compat), Language::Python, true).unwrap();
        assert_eq!(ok.packages, vec!["totally-unknown-pkg"]);
    }

    #[test]
    fn test_empty_compatibility_resolves_none() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_packages(tmp.path(), None, Language::Python, false).unwrap();
        assert_eq!(resolved.resolver, ResolverKind::None);
        assert!(resolved.packages.is_empty());
    }

    #[test]
    fn test_whitelist_fallback_tag() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_packages(
            tmp.path(),
            Some("Requires Python with numpy and pandas"),
            Language::Python,
            false,
        )
        .unwrap();
        assert_eq!(resolved.resolver, ResolverKind::Whitelist);
        assert_eq!(resolved.packages, vec!["numpy", "pandas"]);
    }

    #[test]
    fn test_parse_llm_reply_fenced() {
        assert_eq!(
            parse_llm_reply("```json\n[\"requests\", \"numpy\"]\n```"),
            Some(vec!["requests".to_string(), "numpy".to_string()])
        );
        assert_eq!(parse_llm_reply("[]"), None);
        assert_eq!(parse_llm_reply("no json here"), None);
    }

    #[test]
    fn test_whole_word_requires_clean_edges() {
        assert!(contains_whole_word("needs the requests package", "requests"));
        assert!(!contains_whole_word("uses requests2 internally", "requests"));
        assert!(!contains_whole_word("myrequests wrapper", "requests"));
        // A later clean occurrence still counts
        assert!(contains_whole_word("xrequests or plain requests", "requests"));
    }

    #[test]
    fn test_whole_word_punctuation_and_extremes() {
        assert!(contains_whole_word("numpy, pandas and friends", "numpy"));
        assert!(contains_whole_word("built on scikit-learn.", "scikit-learn"));
        assert!(contains_whole_word("torch", "torch"));
        assert!(!contains_whole_word("", "torch"));
        assert!(!contains_whole_word("anything", ""));
    }
}
