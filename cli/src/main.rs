use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tidy_client::BackendClient;
use tidy_core::{resolve_state_dir, ClientConfig, ConfigStore};
use tidy_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use tidy_wire::{normalize_provider, SUPPORTED_PROVIDERS};

mod commands;
mod prompt;
mod render;

#[derive(Parser, Debug)]
#[command(name = "tidy", version)]
#[command(about = "Organize files with the smart-tidy assistant")]
struct Cli {
    /// Backend address, e.g. http://127.0.0.1:8000
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// AI provider for chat and planning requests.
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Project config file layered over the global one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, env = "TIDY_STATE_DIR")]
    state_dir: Option<PathBuf>,
    /// Show debug logs on stderr.
    #[arg(short, long, global = true, env = "TIDY_VERBOSE")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the assistant. Without MESSAGE, starts an interactive session.
    Chat { message: Option<String> },
    /// Organize a directory, by agent (default) or by a reviewed plan.
    Organize(OrganizeArgs),
    /// Scan a directory and print the scan id to plan against.
    Scan {
        #[arg(long)]
        dir: String,
        /// Only look at the top level of DIR.
        #[arg(long)]
        no_recursive: bool,
        #[arg(long)]
        json: bool,
    },
    /// List recorded file operations.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        json: bool,
    },
    /// Undo the most recent operation.
    Undo {
        /// Skip the confirmation question.
        #[arg(short, long)]
        yes: bool,
    },
    /// Client settings and the backend's provider settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Check that the backend is reachable.
    Health,
}

#[derive(Args, Debug)]
struct OrganizeArgs {
    #[arg(long)]
    dir: String,
    /// What to do, in plain language.
    #[arg(long)]
    request: String,
    /// Generate a plan for review instead of letting the agent act.
    #[arg(long)]
    manual: bool,
    /// Plan against an existing scan instead of scanning again.
    #[arg(long, requires = "manual")]
    scan_id: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_backup: bool,
    /// Execute the plan without asking.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective client configuration.
    Show {
        /// Print every layer separately.
        #[arg(long)]
        layers: bool,
        /// Print the backend's provider configuration instead.
        #[arg(long, conflicts_with = "layers")]
        backend: bool,
    },
    /// Set a client setting, e.g. `stream.max_reconnects 3`.
    Set {
        key: String,
        value: String,
        /// Write to the --config file instead of the global one.
        #[arg(long)]
        project: bool,
    },
    /// Update the backend's settings for one AI provider.
    Provider {
        provider: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// Ask the backend whether a provider is usable.
    Validate { provider: Option<String> },
    /// Change the backend's default provider.
    Default { provider: String },
}

pub struct AppContext {
    pub store: ConfigStore,
    pub config: ClientConfig,
}

impl AppContext {
    pub fn backend(&self) -> anyhow::Result<Arc<BackendClient>> {
        let client = BackendClient::with_options(&self.config.base_url, self.config.client_options())?;
        Ok(Arc::new(client))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let provider = normalize_and_validate_provider(cli.provider.clone())?;
    let overrides = build_cli_overrides(cli.base_url.clone(), provider);
    let store = ConfigStore::new(cli.config.clone(), overrides).await?;
    let config = store.get().await?;

    let state_dir = resolve_state_dir(cli.state_dir.clone())?;
    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let (_log_guard, log_info) = init_process_logging(
        ProcessKind::Cli,
        &logs_dir,
        config.logging.retention_days,
        cli.verbose,
    )?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            status: Some("ok"),
            detail: Some("cli jsonl logging initialized"),
            ..ObservabilityEvent::new("cli.main", "logging.initialized")
        },
    );
    tracing::debug!("cli logging initialized: {:?}", log_info);

    let ctx = AppContext { store, config };
    let result = run(&ctx, cli.command).await;
    if let Err(err) = &result {
        let detail = err.to_string();
        emit_event(
            tracing::Level::ERROR,
            ProcessKind::Cli,
            ObservabilityEvent {
                status: Some("failed"),
                error_code: Some("CLI_COMMAND_FAILED"),
                detail: Some(&detail),
                ..ObservabilityEvent::new("cli.main", "command.failed")
            },
        );
    }
    result
}

async fn run(ctx: &AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Chat { message } => commands::run_chat(ctx, message).await,
        Command::Organize(args) => commands::run_organize(ctx, args).await,
        Command::Scan {
            dir,
            no_recursive,
            json,
        } => commands::run_scan(ctx, &dir, !no_recursive, json).await,
        Command::History { limit, page, json } => {
            commands::run_history(ctx, limit, page, json).await
        }
        Command::Undo { yes } => commands::run_undo(ctx, yes).await,
        Command::Config { command } => commands::run_config(ctx, command).await,
        Command::Health => commands::run_health(ctx).await,
    }
}

fn build_cli_overrides(
    base_url: Option<String>,
    provider: Option<String>,
) -> Option<serde_json::Value> {
    if base_url.is_none() && provider.is_none() {
        return None;
    }
    let mut root = serde_json::Map::new();
    if let Some(url) = base_url {
        root.insert("base_url".to_string(), serde_json::Value::String(url));
    }
    if let Some(p) = provider {
        root.insert("provider".to_string(), serde_json::Value::String(p));
    }
    Some(serde_json::Value::Object(root))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    match normalize_provider(&provider) {
        Some(normalized) => Ok(Some(normalized)),
        None => anyhow::bail!(
            "unsupported provider `{}`. supported providers: {}",
            provider,
            SUPPORTED_PROVIDERS.join(", ")
        ),
    }
}
