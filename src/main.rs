mod cli;
mod config;
mod daemon;
mod dispatch;
mod env;
mod error;
mod observability;
mod output;
mod sandbox;
mod security;
mod skill;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use dispatch::{RunOptions, RunOutcome, Services};
use std::io::Read;

fn main() {
    observability::init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(error::exit_code_for(&e));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            skill_dir,
            input_json,
            allow_network,
            cache_dir,
            max_memory,
            timeout,
            sandbox_level,
            allow_unknown_packages,
            confirmed,
            scan_id,
        } => {
            let input_json = read_input(input_json)?;
            let opts = RunOptions {
                allow_network,
                cache_dir,
                max_memory,
                timeout,
                sandbox_level,
                allow_unknown_packages,
                confirmed,
                scan_id,
            };
            let services = Services::new();
            let outcome = dispatch::run_skill(&services, &skill_dir, &input_json, &opts)?;
            Ok(emit_outcome(outcome))
        }

        Commands::Exec {
            skill_dir,
            script_path,
            input_json,
            args,
            allow_network,
            cache_dir,
            max_memory,
            timeout,
            sandbox_level,
            allow_unknown_packages,
            confirmed,
            scan_id,
        } => {
            let input_json = read_input(input_json)?;
            let opts = RunOptions {
                allow_network,
                cache_dir,
                max_memory,
                timeout,
                sandbox_level,
                allow_unknown_packages,
                confirmed,
                scan_id,
            };
            let services = Services::new();
            let outcome = dispatch::exec_script(
                &services,
                &skill_dir,
                &script_path,
                &input_json,
                args.as_deref(),
                &opts,
            )?;
            Ok(emit_outcome(outcome))
        }

        Commands::Bash {
            skill_dir,
            command,
            cache_dir,
            timeout,
            cwd,
        } => {
            let services = Services::new();
            let outcome = dispatch::bash_command(
                &services,
                &skill_dir,
                &command,
                cache_dir.as_deref(),
                timeout,
                cwd.as_deref(),
            )?;
            Ok(emit_outcome(outcome))
        }

        Commands::SecurityScan { script_path, json } => {
            let (text, report) = dispatch::security_scan(&script_path)?;
            if json {
                println!("{}", report);
            } else {
                println!("Security scan results for: {}\n", script_path);
                println!("{}", text);
            }
            Ok(0)
        }

        Commands::List { skills_dir, json } => {
            let skills = dispatch::list_skills(&skills_dir)?;
            if json {
                let (tools, tool_meta) = dispatch::tool_definitions(&skills);
                let body = serde_json::json!({ "tools": tools, "tool_meta": tool_meta });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else if skills.is_empty() {
                println!("No skills found in {}", skills_dir);
            } else {
                for skill in &skills {
                    let kind = if skill.bash_tool { "bash-tool" } else { skill.language.as_str() };
                    println!(
                        "{:<28} {:<10} {}",
                        skill.name,
                        kind,
                        skill.description.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(0)
        }

        Commands::Scan {
            skill_dir,
            preview_lines,
        } => {
            let inventory = dispatch::scan_skill_dir(&skill_dir, preview_lines)?;
            println!("{}", serde_json::to_string_pretty(&inventory)?);
            Ok(0)
        }

        Commands::Serve { stdio } => {
            if stdio {
                daemon::serve_stdio()?;
            }
            Ok(0)
        }
    }
}

/// "-" means the input JSON arrives on stdin.
fn read_input(input_json: String) -> Result<String> {
    if input_json == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(input_json)
    }
}

/// Print a handler outcome: stdout carries the result, stderr the
/// diagnostics, and the exit code tells collaborators what happened.
fn emit_outcome(outcome: RunOutcome) -> i32 {
    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
    if !outcome.stderr.is_empty() {
        eprintln!("{}", outcome.stderr);
    }
    outcome.exit_code
}
