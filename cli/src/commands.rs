use std::io::Write;

use anyhow::Context;
use tidy_client::{ConfigApi, HistoryApi, OrganizeApi};
use tidy_core::{parse_override_value, ConfigScope};
use tidy_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use tidy_orchestrator::{ChatStreamSession, OrganizeWorkflow, TurnOutcome, UndoCoordinator};
use tidy_types::{
    ChatRole, ChatTurn, OrganizeMode, OrganizeRequest, TaskStatus, UndoOutcome, WorkflowPhase,
};
use tidy_wire::{normalize_provider, AiConfigRequest, ScanRequest, SUPPORTED_PROVIDERS};
use tracing::Level;

use crate::prompt::{is_yes, Prompt};
use crate::render::{
    format_history, format_plan, format_result, format_scan, format_scan_report, ProgressPrinter,
    ReplyPrinter,
};
use crate::{AppContext, ConfigCommand, OrganizeArgs};

pub async fn run_chat(ctx: &AppContext, message: Option<String>) -> anyhow::Result<()> {
    let session = ChatStreamSession::new(ctx.backend()?, ctx.config.provider.clone());
    emit_event(
        Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            provider: ctx.config.provider.as_deref(),
            ..ObservabilityEvent::new("cli.chat", "chat.session.started")
        },
    );

    if let Some(message) = message {
        chat_turn(&session, &message).await?;
        return Ok(());
    }

    println!(
        "Chatting via {}. /reset clears the conversation, /quit exits.",
        ctx.config.base_url
    );
    let mut prompt = Prompt::new();
    while let Some(line) = prompt.ask(">").await? {
        match line.as_str() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }
        if let Err(err) = chat_turn(&session, &line).await {
            eprintln!("{err}");
        }
    }
    Ok(())
}

/// Send one message and print the reply as it streams in. Ctrl-C abandons
/// the turn and clears the conversation.
async fn chat_turn(session: &ChatStreamSession, message: &str) -> anyhow::Result<TurnOutcome> {
    let mut transcript = session.subscribe();
    transcript.mark_unchanged();
    let mut printer = ReplyPrinter::default();

    let send = session.send(message);
    tokio::pin!(send);
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome?,
            changed = transcript.changed() => {
                if changed.is_err() {
                    break (&mut send).await?;
                }
                let reply = latest_reply(&transcript.borrow_and_update());
                emit_text(&printer.update(&reply))?;
            }
            _ = tokio::signal::ctrl_c() => session.reset(),
        }
    };

    if outcome == TurnOutcome::Abandoned {
        println!("\n(interrupted, conversation cleared)");
        return Ok(outcome);
    }
    emit_text(&printer.update(&latest_reply(&session.transcript())))?;
    println!();

    if outcome == TurnOutcome::Failed {
        let detail = redact_text(message);
        emit_event(
            Level::WARN,
            ProcessKind::Cli,
            ObservabilityEvent {
                status: Some("failed"),
                detail: Some(&detail),
                ..ObservabilityEvent::new("cli.chat", "chat.turn.failed")
            },
        );
    }
    tracing::debug!(?outcome, "chat turn finished");
    Ok(outcome)
}

fn latest_reply(turns: &[ChatTurn]) -> String {
    turns
        .last()
        .filter(|turn| turn.role == ChatRole::Assistant)
        .map(|turn| turn.content.clone())
        .unwrap_or_default()
}

fn emit_text(text: &str) -> anyhow::Result<()> {
    if !text.is_empty() {
        print!("{text}");
        std::io::stdout().flush()?;
    }
    Ok(())
}

pub async fn run_organize(ctx: &AppContext, args: OrganizeArgs) -> anyhow::Result<()> {
    let mut request = OrganizeRequest::new(args.dir, args.request);
    request.mode = if args.manual {
        OrganizeMode::Manual
    } else {
        OrganizeMode::Agent
    };
    request.dry_run = args.dry_run;
    request.create_backup = !args.no_backup;
    request.provider = ctx.config.provider.clone();
    let dry_run = request.dry_run;

    let mut workflow = OrganizeWorkflow::new(ctx.backend()?, ctx.config.reconciler_options());
    let mut prompt = Prompt::new();

    if let Some(scan_id) = &args.scan_id {
        let scan = workflow.use_scan(scan_id).await?;
        println!("Using scan {}", scan.scan_id);
    }
    workflow.submit(request).await?;

    if workflow.phase() == WorkflowPhase::Plan {
        if let Some(scan) = workflow.scan() {
            println!("{}", format_scan(scan));
        }
        loop {
            print!("{}", format_plan(workflow.plan()));
            if workflow.plan().is_empty() {
                return Ok(());
            }
            if dry_run {
                println!("Dry run: the plan was not executed.");
                return Ok(());
            }
            if args.yes {
                break;
            }
            let answer = prompt
                .ask("Execute this plan? [y]es, [n]o, or describe what to change:")
                .await?
                .unwrap_or_default();
            if is_yes(&answer) {
                break;
            }
            if answer.is_empty() || answer.eq_ignore_ascii_case("n") || answer.eq_ignore_ascii_case("no") {
                println!("Cancelled.");
                return Ok(());
            }
            workflow.refine_plan(&answer).await?;
        }
        workflow.execute_plan().await?;
    }

    let mut updates = workflow
        .watch_task()
        .context("the backend did not start a task")?;
    let task_id = workflow.task().map(|task| task.id).unwrap_or_default();
    emit_event(
        Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            task_id: Some(&task_id),
            phase: Some(WorkflowPhase::Execute.as_str()),
            provider: ctx.config.provider.as_deref(),
            ..ObservabilityEvent::new("cli.organize", "organize.task.started")
        },
    );
    println!("Task {task_id} started.");

    let mut progress = ProgressPrinter::default();
    let finished = {
        let wait = workflow.wait_for_result();
        tokio::pin!(wait);
        loop {
            tokio::select! {
                result = &mut wait => break Some(result),
                changed = updates.changed() => {
                    if changed.is_err() {
                        break Some((&mut wait).await);
                    }
                    let line = updates
                        .borrow_and_update()
                        .snapshot()
                        .and_then(|task| progress.line(task));
                    if let Some(line) = line {
                        println!("{line}");
                    }
                }
                _ = tokio::signal::ctrl_c() => break None,
            }
        }
    };

    let Some(result) = finished else {
        workflow.reset();
        println!("Stopped watching task {task_id}; it keeps running on the backend.");
        return Ok(());
    };
    let task = result?;
    println!("{}", format_result(&task));

    let failed = task.status == TaskStatus::Failed;
    emit_event(
        if failed { Level::WARN } else { Level::INFO },
        ProcessKind::Cli,
        ObservabilityEvent {
            task_id: Some(&task.id),
            phase: Some(WorkflowPhase::Result.as_str()),
            status: Some(task.status.as_str()),
            error_code: failed.then_some("ORGANIZE_TASK_FAILED"),
            ..ObservabilityEvent::new("cli.organize", "organize.task.finished")
        },
    );
    if failed {
        anyhow::bail!("task {} failed", task.id);
    }
    Ok(())
}

pub async fn run_scan(ctx: &AppContext, dir: &str, recursive: bool, json: bool) -> anyhow::Result<()> {
    let dir = dir.trim();
    if dir.is_empty() {
        anyhow::bail!("--dir must not be empty");
    }
    let api = ctx.backend()?;
    let scan = api.scan(&ScanRequest::new(dir, recursive)).await?;
    emit_event(
        Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            status: Some("ok"),
            ..ObservabilityEvent::new("cli.scan", "scan.completed")
        },
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else {
        print!("{}", format_scan_report(&scan));
    }
    Ok(())
}

pub async fn run_history(ctx: &AppContext, limit: u32, page: u32, json: bool) -> anyhow::Result<()> {
    let api = ctx.backend()?;
    let history = api.history(limit.max(1), page.max(1)).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else {
        print!("{}", format_history(&history));
    }
    Ok(())
}

pub async fn run_undo(ctx: &AppContext, yes: bool) -> anyhow::Result<()> {
    let undo = UndoCoordinator::new(ctx.backend()?);

    let (message, operation) = match undo.request_undo(false).await? {
        UndoOutcome::NothingToUndo => {
            println!("Nothing to undo.");
            return Ok(());
        }
        UndoOutcome::Undone { message } => {
            println!("{}", message.as_deref().unwrap_or("Undone."));
            return Ok(());
        }
        UndoOutcome::ConfirmationRequired { message, operation } => (message, operation),
    };

    println!(
        "{}",
        message.as_deref().unwrap_or("Undo the most recent operation?")
    );
    if let Some(operation) = &operation {
        println!("{}", serde_json::to_string_pretty(operation)?);
    }
    if !yes && !Prompt::new().confirm("Proceed?").await? {
        println!("Undo cancelled.");
        return Ok(());
    }

    match undo.request_undo(true).await? {
        UndoOutcome::Undone { message } => {
            println!("{}", message.as_deref().unwrap_or("Undone."));
            emit_event(
                Level::INFO,
                ProcessKind::Cli,
                ObservabilityEvent {
                    status: Some("ok"),
                    ..ObservabilityEvent::new("cli.undo", "undo.committed")
                },
            );
        }
        UndoOutcome::NothingToUndo => println!("Nothing left to undo."),
        other => anyhow::bail!("unexpected undo response: {other:?}"),
    }
    Ok(())
}

pub async fn run_config(ctx: &AppContext, command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show { layers, backend } => {
            if backend {
                let api = ctx.backend()?;
                let config = api.config().await?;
                println!("default provider: {}", config.default_provider);
                for provider in &config.providers {
                    println!(
                        "  {:<8} {:<28} {}{}",
                        provider.provider,
                        provider.model,
                        if provider.is_configured {
                            "configured"
                        } else {
                            "not configured"
                        },
                        if provider.is_default { " (default)" } else { "" }
                    );
                }
            } else if layers {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.store.get_layers_value().await)?
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&ctx.config)?);
                println!("global file: {}", ctx.store.global_path().display());
                if let Some(path) = ctx.store.project_path() {
                    println!("project file: {}", path.display());
                }
            }
        }
        ConfigCommand::Set {
            key,
            value,
            project,
        } => {
            let mut value = parse_override_value(&value);
            if key == "provider" {
                let raw = value.as_str().unwrap_or_default().to_string();
                value = serde_json::Value::String(require_provider(&raw)?);
            }
            let scope = if project {
                ConfigScope::Project
            } else {
                ConfigScope::Global
            };
            ctx.store.set_key(scope, &key, value).await?;
            let path = match scope {
                ConfigScope::Project => ctx.store.project_path().unwrap_or(ctx.store.global_path()),
                ConfigScope::Global => ctx.store.global_path(),
            };
            println!("Updated {key} in {}", path.display());
        }
        ConfigCommand::Provider {
            provider,
            api_key,
            model,
            base_url,
            max_tokens,
            temperature,
        } => {
            let api = ctx.backend()?;
            let request = AiConfigRequest {
                provider: require_provider(&provider)?,
                api_key,
                model,
                base_url,
                max_tokens,
                temperature,
            };
            let response = api.update_ai_config(&request).await?;
            println!("{}", response.message);
            if let Some(warning) = response.warning {
                eprintln!("warning: {warning}");
            }
        }
        ConfigCommand::Validate { provider } => {
            let api = ctx.backend()?;
            let provider = match provider.or_else(|| ctx.config.provider.clone()) {
                Some(raw) => require_provider(&raw)?,
                None => api.config().await?.default_provider,
            };
            let validation = api.validate_config(&provider).await?;
            if validation.valid {
                println!("{} is configured correctly.", validation.provider);
            } else {
                for issue in &validation.issues {
                    println!("  - {issue}");
                }
                anyhow::bail!("{} is not usable", validation.provider);
            }
        }
        ConfigCommand::Default { provider } => {
            let api = ctx.backend()?;
            let response = api
                .set_default_provider(&require_provider(&provider)?)
                .await?;
            println!("{}", response.message);
        }
    }
    Ok(())
}

pub async fn run_health(ctx: &AppContext) -> anyhow::Result<()> {
    let api = ctx.backend()?;
    let health = api.health().await?;
    if !health.is_healthy() {
        anyhow::bail!("{} reported `{}`", api.base_url(), health.status);
    }
    println!("{} is {}", api.base_url(), health.status);
    Ok(())
}

fn require_provider(raw: &str) -> anyhow::Result<String> {
    normalize_provider(raw).with_context(|| {
        format!(
            "unsupported provider `{raw}`. supported providers: {}",
            SUPPORTED_PROVIDERS.join(", ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_reply_reads_only_assistant_turns() {
        let mut turns = vec![ChatTurn::user("hi")];
        assert_eq!(latest_reply(&turns), "");

        let mut reply = ChatTurn::assistant_placeholder();
        reply.content = "hello".into();
        turns.push(reply);
        assert_eq!(latest_reply(&turns), "hello");
        assert_eq!(latest_reply(&[]), "");
    }

    #[test]
    fn unknown_providers_are_rejected() {
        assert_eq!(require_provider("Local").unwrap(), "local");
        let err = require_provider("gemini").unwrap_err();
        assert!(err.to_string().contains("supported providers"));
    }
}
