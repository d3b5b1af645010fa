//! Mandatory deny paths and macOS Seatbelt profile generation.
//!
//! The deny tables apply on every platform: Seatbelt deny-regex rules on
//! macOS, tmpfs shadowing under bubblewrap on Linux. They are always
//! enforced, even inside otherwise writable roots.

#[cfg(any(target_os = "macos", test))]
use crate::sandbox::common::LaunchSpec;

/// Shell configuration files (shell injection)
pub const DENY_SHELL_CONFIGS: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".bash_login",
    ".bash_logout",
    ".zshrc",
    ".zprofile",
    ".zshenv",
    ".profile",
    ".config/fish/config.fish",
];

/// Git configuration (hook injection)
pub const DENY_GIT_CONFIGS: &[&str] = &[".gitconfig", ".git/config", ".git/hooks"];

/// Package manager configuration (supply chain tampering)
pub const DENY_PACKAGE_CONFIGS: &[&str] = &[
    ".npmrc",
    ".yarnrc",
    ".pypirc",
    ".pip/pip.conf",
    ".cargo/config.toml",
    ".cargo/credentials",
    ".gemrc",
];

/// Credential stores
pub const DENY_SECURITY_FILES: &[&str] = &[
    ".netrc",
    ".aws/credentials",
    ".aws/config",
    ".kube/config",
    ".docker/config.json",
];

/// Directories blocked from writes entirely
pub const DENY_DIRECTORIES: &[&str] = &[".ssh", ".gnupg", ".aws", ".kube", ".docker", ".git/hooks"];

/// Escape Seatbelt profile regex metacharacters
#[cfg(any(target_os = "macos", test))]
fn seatbelt_regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for c in s.chars() {
        match c {
            '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Seatbelt `deny file-write*` rules for the mandatory deny tables.
#[cfg(any(target_os = "macos", test))]
pub fn seatbelt_deny_patterns() -> Vec<String> {
    let mut patterns = Vec::new();

    for file in DENY_SHELL_CONFIGS
        .iter()
        .chain(DENY_GIT_CONFIGS)
        .chain(DENY_PACKAGE_CONFIGS)
        .chain(DENY_SECURITY_FILES)
    {
        let escaped = seatbelt_regex_escape(file);
        if file.contains('/') {
            patterns.push(format!("(deny file-write* (regex #\"(^|/){}\"))", escaped));
        } else {
            patterns.push(format!("(deny file-write* (regex #\"(^|/){}$\"))", escaped));
        }
    }

    for dir in DENY_DIRECTORIES {
        let escaped = seatbelt_regex_escape(dir);
        patterns.push(format!("(deny file-write* (regex #\"(^|/){}\"))", escaped));
        patterns.push(format!("(deny file-write* (regex #\"(^|/){}/.+\"))", escaped));
    }

    patterns
}

/// Generate the Seatbelt profile for a launch spec.
///
/// Shape: mandatory deny rules, sensitive-read denials, and a deny-default
/// write policy with explicit write roots, over an allow-default base for
/// runtime compatibility. Network is denied outright, or opened for
/// TCP 80/443 (+DNS) when the spec allows it.
#[cfg(any(target_os = "macos", test))]
pub fn generate_profile(spec: &LaunchSpec) -> String {
    let mut profile = String::new();
    profile.push_str("(version 1)\n\n");

    profile.push_str("; Mandatory deny paths, enforced even inside writable roots\n");
    for pattern in seatbelt_deny_patterns() {
        profile.push_str(&pattern);
        profile.push('\n');
    }
    profile.push('\n');

    profile.push_str("; Sensitive reads\n");
    profile.push_str("(deny file-read* (subpath \"/etc\"))\n");
    profile.push_str("(deny file-read* (subpath \"/private/etc\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.ssh\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.aws\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.gnupg\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.kube\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.netrc\"))\n");
    profile.push_str("(deny file-read* (regex #\"/\\.env$\"))\n");
    profile.push('\n');

    if spec.allow_network {
        profile.push_str("; Network: outbound HTTP/HTTPS and DNS only\n");
        profile.push_str("(allow network-outbound (remote tcp \"*:80\"))\n");
        profile.push_str("(allow network-outbound (remote tcp \"*:443\"))\n");
        profile.push_str("(allow network-outbound (remote udp \"*:53\"))\n");
        profile.push_str("(allow system-socket)\n");
        profile.push_str("(deny network-inbound)\n");
    } else {
        profile.push_str("; Network: denied\n");
        profile.push_str("(deny network*)\n");
    }
    profile.push('\n');

    profile.push_str("; Process creation beyond the interpreter\n");
    for bin in [
        "/bin/bash",
        "/bin/zsh",
        "/usr/bin/env",
        "/usr/bin/curl",
        "/usr/bin/ssh",
        "/usr/bin/scp",
        "/bin/rm",
        "/bin/chmod",
        "/usr/bin/osascript",
    ] {
        profile.push_str(&format!("(deny process-exec (literal \"{}\"))\n", bin));
    }
    profile.push('\n');

    profile.push_str("; Writes: deny by default, allow the resolved roots only\n");
    profile.push_str("(deny file-write*)\n");
    for root in &spec.write_roots {
        profile.push_str(&format!(
            "(allow file-write* (subpath \"{}\"))\n",
            root.display()
        ));
    }
    profile.push_str("(allow file-write* (subpath \"/var/folders\"))\n");
    profile.push_str("(allow file-write* (subpath \"/private/var/folders\"))\n");
    profile.push('\n');

    profile.push_str("; Allow-default base for runtime compatibility\n");
    profile.push_str("(allow default)\n\n");

    profile.push_str("; Read roots\n");
    for root in &spec.read_roots {
        profile.push_str(&format!(
            "(allow file-read* (subpath \"{}\"))\n",
            root.display()
        ));
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(allow_network: bool) -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from("python3"),
            args: vec![],
            cwd: PathBuf::from("/tmp/skill"),
            env: vec![],
            stdin_data: None,
            read_roots: vec![PathBuf::from("/tmp/skill")],
            write_roots: vec![PathBuf::from("/tmp/work")],
            allow_network,
        }
    }

    #[test]
    fn test_deny_patterns_well_formed() {
        for pattern in seatbelt_deny_patterns() {
            assert!(pattern.starts_with("(deny file-write*"));
            assert!(pattern.ends_with("))"));
        }
    }

    #[test]
    fn test_profile_network_denied_by_default() {
        let profile = generate_profile(&spec(false));
        assert!(profile.contains("(deny network*)"));
        assert!(!profile.contains("remote tcp"));
    }

    #[test]
    fn test_profile_network_allows_http_ports() {
        let profile = generate_profile(&spec(true));
        assert!(profile.contains("remote tcp \"*:80\""));
        assert!(profile.contains("remote tcp \"*:443\""));
        assert!(!profile.contains("(deny network*)"));
    }

    #[test]
    fn test_profile_write_roots_and_deny_default() {
        let profile = generate_profile(&spec(false));
        assert!(profile.contains("(deny file-write*)\n"));
        assert!(profile.contains("(allow file-write* (subpath \"/tmp/work\"))"));
        assert!(profile.contains("(allow file-read* (subpath \"/tmp/skill\"))"));
    }

    #[test]
    fn test_ssh_always_denied() {
        let profile = generate_profile(&spec(false));
        assert!(profile.contains(".ssh"));
    }
}
