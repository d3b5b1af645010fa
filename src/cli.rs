use clap::{Parser, Subcommand};

/// agentskill - secure execution engine for AI-authored skill bundles
#[derive(Parser, Debug)]
#[command(name = "agentskill")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a skill through its declared entry point
    Run {
        /// Path to the skill directory
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,

        /// Input JSON string, or "-" to read it from stdin
        #[arg(value_name = "INPUT_JSON")]
        input_json: String,

        /// Allow network access (overrides the SKILL.md policy)
        #[arg(long)]
        allow_network: bool,

        /// Custom cache directory for environments
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,

        /// Maximum memory limit in MB (default: from env or 512)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Execution timeout in seconds (default: from env or 120)
        #[arg(long)]
        timeout: Option<u64>,

        /// Sandbox level: 1=no sandbox, 2=sandbox, 3=sandbox+scan (default: from env or 3)
        #[arg(long)]
        sandbox_level: Option<u8>,

        /// Accept resolved packages that are not in the whitelist
        #[arg(long)]
        allow_unknown_packages: bool,

        /// Approve a prior soft-risk scan (requires --scan-id)
        #[arg(long)]
        confirmed: bool,

        /// Scan id from the soft-risk report being approved
        #[arg(long, value_name = "ID")]
        scan_id: Option<String>,
    },

    /// Execute a specific script inside a skill directory
    Exec {
        /// Path to the skill directory (context and dependencies)
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,

        /// Script path relative to the skill directory
        #[arg(value_name = "SCRIPT_PATH")]
        script_path: String,

        /// Input JSON string, or "-" to read it from stdin
        #[arg(value_name = "INPUT_JSON")]
        input_json: String,

        /// Extra command-line arguments passed to the script
        #[arg(long, value_name = "ARGS")]
        args: Option<String>,

        /// Allow network access
        #[arg(long)]
        allow_network: bool,

        /// Custom cache directory for environments
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,

        /// Maximum memory limit in MB (default: from env or 512)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Execution timeout in seconds (default: from env or 120)
        #[arg(long)]
        timeout: Option<u64>,

        /// Sandbox level: 1=no sandbox, 2=sandbox, 3=sandbox+scan (default: from env or 3)
        #[arg(long)]
        sandbox_level: Option<u8>,

        /// Accept resolved packages that are not in the whitelist
        #[arg(long)]
        allow_unknown_packages: bool,

        /// Approve a prior soft-risk scan (requires --scan-id)
        #[arg(long)]
        confirmed: bool,

        /// Scan id from the soft-risk report being approved
        #[arg(long, value_name = "ID")]
        scan_id: Option<String>,
    },

    /// Execute an allow-listed command for a bash-tool skill
    ///
    /// Bash-tool skills declare `allowed-tools: Bash(prefix:*)` in SKILL.md
    /// and have no script entry point. The command's first token must match
    /// one of the declared prefixes exactly.
    Bash {
        /// Path to the skill directory (must declare allowed-tools)
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,

        /// The command to execute
        #[arg(value_name = "COMMAND")]
        command: String,

        /// Custom cache directory for environments
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,

        /// Execution timeout in seconds (default: 120)
        #[arg(long)]
        timeout: Option<u64>,

        /// Working directory for the command; output files are saved
        /// relative to this path
        #[arg(long, value_name = "DIR")]
        cwd: Option<String>,
    },

    /// Statically scan a script for dangerous constructs, without running it
    #[command(name = "security-scan")]
    SecurityScan {
        /// Path to the script file
        #[arg(value_name = "SCRIPT_PATH")]
        script_path: String,

        /// Emit the structured JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the skills in a directory
    #[command(name = "list", alias = "ls")]
    List {
        /// Skills directory path
        #[arg(value_name = "SKILLS_DIR", default_value = ".skills")]
        skills_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inventory a skill directory: scripts, previews, and I/O heuristics
    Scan {
        /// Path to the skill directory
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,

        /// Lines of preview per script
        #[arg(long, default_value = "10")]
        preview_lines: usize,
    },

    /// Run the IPC daemon: JSON-RPC requests on stdin, responses on stdout
    Serve {
        /// Use stdio transport (the only supported transport)
        #[arg(long, default_value = "true")]
        stdio: bool,
    },
}
