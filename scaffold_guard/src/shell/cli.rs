use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

use crate::audit::{AuditConfig, AuditLogger};
use crate::config::GuardConfig;
use crate::scaffold::Scaffolder;
use crate::setup::SetupRuntime;
use crate::utils::logging::{init_logging, project_dirs};

const AUDIT_LOG_FILE: &str = "audit.jsonl";

/// Scaffold Guard: create projects from templates and run their setup
/// scripts inside a path boundary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with gate, audit and sandbox settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where to append audit entries (JSON lines).
    /// Defaults to the user data directory.
    #[arg(long, global = true, conflicts_with = "no_audit_log")]
    audit_log: Option<PathBuf>,

    /// Keep audit entries in memory only.
    #[arg(long, global = true)]
    no_audit_log: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log to stderr instead of the rolling log file.
    #[arg(long, global = true)]
    log_to_stderr: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project from a local template directory.
    New {
        /// Name of the directory to create under the current directory.
        project_directory: String,

        /// Template directory.
        #[arg(long)]
        template: String,

        /// IDE to configure (vscode, cursor, windsurf, kiro).
        #[arg(long)]
        ide: Option<String>,

        /// Comma-separated options, e.g. `styling=tailwind,auth`.
        #[arg(long, value_delimiter = ',')]
        options: Vec<String>,

        /// Placeholder value, repeatable.
        #[arg(long = "placeholder", value_name = "NAME=VALUE")]
        placeholders: Vec<String>,

        /// wysiwyg or composable.
        #[arg(long)]
        authoring_mode: Option<String>,
    },

    /// Run the sandbox checks on a setup script without executing it.
    Inspect {
        script: PathBuf,
    },
}

impl Command {
    /// Raw scaffold inputs, as the gate expects them.
    fn raw_inputs(&self) -> Result<Map<String, Value>> {
        let Command::New {
            project_directory,
            template,
            ide,
            options,
            placeholders,
            authoring_mode,
        } = self
        else {
            bail!("only `new` takes scaffold inputs");
        };

        let mut raw = Map::new();
        raw.insert("projectDirectory".into(), project_directory.clone().into());
        raw.insert("template".into(), template.clone().into());
        if let Some(ide) = ide {
            raw.insert("ide".into(), ide.clone().into());
        }
        if !options.is_empty() {
            raw.insert("options".into(), options.clone().into());
        }
        if !placeholders.is_empty() {
            let mut values = Map::new();
            for pair in placeholders {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--placeholder expects NAME=VALUE, got '{pair}'"))?;
                values.insert(name.to_string(), value.into());
            }
            raw.insert("placeholders".into(), Value::Object(values));
        }
        if let Some(mode) = authoring_mode {
            raw.insert("authoringMode".into(), mode.clone().into());
        }
        Ok(raw)
    }
}

fn audit_config(cli: &Cli, config: &GuardConfig) -> Result<AuditConfig> {
    let base = config.audit_config();
    if cli.no_audit_log {
        return Ok(AuditConfig {
            log_file: None,
            ..base
        });
    }
    let log_file = match (&cli.audit_log, &base.log_file) {
        (Some(path), _) | (None, Some(path)) => path.clone(),
        (None, None) => project_dirs()
            .map(|dirs| dirs.data_local_dir().join(AUDIT_LOG_FILE))
            .context("Cannot determine a default audit log location; pass --audit-log")?,
    };
    Ok(AuditConfig {
        log_file: Some(log_file),
        ..base
    })
}

async fn execute(command: &Command, config: &GuardConfig, audit: Arc<AuditLogger>) -> Result<()> {
    match command {
        Command::New { .. } => {
            let raw = command.raw_inputs()?;
            let cwd = std::env::current_dir().context("Cannot read the current directory")?;
            let report = Scaffolder::new(config, audit).scaffold(&raw, &cwd).await?;
            println!(
                "Created '{}' from template '{}' ({} files)",
                report.project_dir.display(),
                report.template_name,
                report.files_copied
            );
            if let Some(warning) = report.warning() {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
        Command::Inspect { script } => {
            let runtime = SetupRuntime::new(&config.sandbox_config(), audit);
            let loaded = runtime.load_setup_script(script).await?;
            println!("{}: accepted", loaded.path().display());
            println!("  binds: {}", loaded.signature().bindings.join(", "));
            for import in loaded.imports() {
                println!(
                    "  import {:?} '{}' (line {})",
                    import.form, import.specifier, import.line
                );
            }
            Ok(())
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    init_logging(log_level, !cli.log_to_stderr)?;

    let config = GuardConfig::load_optional(cli.config.as_deref())?;
    let audit = AuditLogger::new(audit_config(&cli, &config)?);

    let result = tokio::select! {
        result = execute(&cli.command, &config, audit.clone()) => result,
        _ = signal::ctrl_c() => {
            tracing::info!("Received SIGINT, closing audit log");
            Err(anyhow!("Interrupted"))
        }
    };

    if let Err(e) = audit.close().await {
        tracing::error!("Failed to close audit log: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_command_builds_gate_inputs() {
        let cli = Cli::try_parse_from([
            "scaffold_guard",
            "new",
            "demo",
            "--template",
            "templates/web",
            "--options",
            "styling=tailwind,auth",
            "--placeholder",
            "PROJECT_TITLE=Demo App",
        ])
        .unwrap();
        let raw = cli.command.raw_inputs().unwrap();
        assert_eq!(
            Value::Object(raw),
            json!({
                "projectDirectory": "demo",
                "template": "templates/web",
                "options": ["styling=tailwind", "auth"],
                "placeholders": {"PROJECT_TITLE": "Demo App"},
            })
        );
    }

    #[test]
    fn placeholder_without_value_is_refused() {
        let cli = Cli::try_parse_from([
            "scaffold_guard",
            "new",
            "demo",
            "--template",
            "t",
            "--placeholder",
            "PROJECT_TITLE",
        ])
        .unwrap();
        assert!(cli.command.raw_inputs().is_err());
    }

    #[test]
    fn audit_log_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "scaffold_guard",
            "--audit-log",
            "/tmp/a.jsonl",
            "inspect",
            "s.mjs",
        ])
        .unwrap();
        let config = GuardConfig::from_toml_str("[audit]\nlog_file = \"/var/b.jsonl\"\n").unwrap();
        assert_eq!(
            audit_config(&cli, &config).unwrap().log_file,
            Some(PathBuf::from("/tmp/a.jsonl"))
        );

        let cli = Cli::try_parse_from(["scaffold_guard", "--no-audit-log", "inspect", "s.mjs"])
            .unwrap();
        assert!(audit_config(&cli, &config).unwrap().log_file.is_none());
    }
}
