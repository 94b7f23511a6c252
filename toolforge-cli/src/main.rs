//! Toolforge CLI - validate, inspect and run synthesized tool specifications

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolforge_core::prelude::*;

#[derive(Parser)]
#[command(name = "toolforge")]
#[command(about = "Validate and run synthesized agent tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to toolforge.toml and TOOLFORGE_* variables)
    #[arg(long, global = true, env = "TOOLFORGE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more specification files
    Validate {
        /// JSON or YAML file holding a specification or an array of them
        files: Vec<PathBuf>,
    },
    /// List the template catalog
    Templates,
    /// List built-in tools
    Builtins,
    /// Register specifications and invoke one of them
    Run {
        /// JSON or YAML file holding a specification or an array of them
        file: PathBuf,

        /// Tool to invoke (defaults to the last specification in the file)
        #[arg(short, long)]
        tool: Option<String>,

        /// Invocation arguments as JSON
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Capabilities granted to the session, comma separated (`none` for no grants)
        #[arg(short, long, value_delimiter = ',')]
        grant: Option<Vec<String>>,

        /// Skip confirmation for moderate-risk tools
        #[arg(long)]
        yolo: bool,

        /// Approve every confirmation request instead of prompting
        #[arg(long)]
        approve: bool,

        /// Workspace root for file and process access
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

/// Asks on the terminal before gated invocations
struct PromptApproval;

#[async_trait]
impl ApprovalHandler for PromptApproval {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let question = format!(
            "{} ({} risk): {}\nargs: {}\nAllow? [y/N] ",
            request.tool_name, request.risk_level, request.reason, request.args
        );
        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr();
            stderr.write_all(question.as_bytes())?;
            stderr.flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if matches!(line.trim(), "y" | "Y" | "yes") => ApprovalDecision::Approve,
            Ok(Ok(_)) => ApprovalDecision::reject("declined at prompt"),
            _ => ApprovalDecision::reject("could not read an answer"),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ForgeConfig> {
    let config = match path {
        Some(path) => ForgeConfig::from_file(path)?,
        None => ForgeConfig::load()?,
    };
    Ok(config)
}

fn load_drafts(path: &Path) -> Result<Vec<ToolSpecificationDraft>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let value: Value = if yaml {
        serde_yaml::from_str(&text).with_context(|| format!("{} is not valid YAML", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?
    };

    let drafts = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<ToolSpecificationDraft>, _>>()?,
        single => vec![serde_json::from_value(single)?],
    };
    if drafts.is_empty() {
        bail!("{} contains no specifications", path.display());
    }
    Ok(drafts)
}

fn validate_files(files: &[PathBuf]) -> Result<()> {
    let mut failures = 0;
    for file in files {
        for (index, draft) in load_drafts(file)?.into_iter().enumerate() {
            let label = draft.name.clone().unwrap_or_else(|| format!("#{}", index));
            match draft.validate() {
                Ok(spec) => println!(
                    "ok    {}:{} ({}, {})",
                    file.display(),
                    spec.name,
                    spec.execution_type(),
                    spec.risk_level
                ),
                Err(e) => {
                    failures += 1;
                    println!("error {}:{}: {}", file.display(), label, e);
                }
            }
        }
    }
    if failures > 0 {
        bail!("{} specification(s) failed validation", failures);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &ForgeConfig,
    file: &Path,
    tool: Option<String>,
    args: &str,
    grant: Option<Vec<String>>,
    yolo: bool,
    approve: bool,
    workspace: PathBuf,
) -> Result<bool> {
    let args: Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    let approvals: Arc<dyn ApprovalHandler> = if approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(PromptApproval)
    };

    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("workspace {} does not exist", workspace.display()))?;
    let mut session = ToolSession::start_with(config, workspace, approvals)?;
    if let Some(tokens) = grant {
        session.set_capabilities(CapabilitySet::from_tokens(&tokens)?);
    }
    if yolo {
        session.set_yolo_mode(true);
    }

    let mut last = None;
    for draft in load_drafts(file)? {
        let spec = session.register(draft)?;
        tracing::info!(tool = %spec.name, version = spec.version, "registered");
        last = Some(spec.name.clone());
    }
    let name = match tool.or(last) {
        Some(name) => name,
        None => bail!("nothing to invoke"),
    };

    let result = session.invoke(&name, args).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(entry) = session.registry().get(&name) {
        tracing::info!(
            tool = %name,
            usage = entry.state.usage_count,
            errors = entry.state.error_count,
            "registry counters"
        );
    }
    session.end();
    Ok(result.success)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("toolforge {}", env!("CARGO_PKG_VERSION"));
            println!("toolforge-core {}", toolforge_core::VERSION);
        }
        Commands::Validate { files } => {
            if files.is_empty() {
                bail!("no files given");
            }
            validate_files(&files)?;
        }
        Commands::Templates => {
            for template in TemplateExecutor::new().catalog() {
                println!("{:<20} {}", template.id, template.description);
                for param in template.params {
                    let kind = param.kind.as_ref().map(|k| k.to_string()).unwrap_or_else(|| "any".to_string());
                    let required = if param.required { "required" } else { "optional" };
                    println!("    {:<12} {:<8} {:<9} {}", param.name, kind, required, param.description);
                }
            }
        }
        Commands::Builtins => {
            for summary in BuiltinRegistry::with_defaults().list() {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            file,
            tool,
            args,
            grant,
            yolo,
            approve,
            workspace,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let succeeded = run(&config, &file, tool, &args, grant, yolo, approve, workspace).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
