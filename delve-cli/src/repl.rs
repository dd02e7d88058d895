//! Single-topic and interactive drivers for the research engine.

use crate::slash::{self, SlashCommand};
use anyhow::Context;
use delve_core::research::JudgeDecision;
use delve_core::{
    DelveConfig, ResearchCallback, ResearchEngine, ResearchSession, ResearchState, TurnResult,
    TurnStatus,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prints research progress as it happens.
pub(crate) struct CliCallback {
    quiet: bool,
}

impl ResearchCallback for CliCallback {
    fn on_state_change(&self, from: ResearchState, to: ResearchState) {
        tracing::debug!(from = %from, to = %to, "State change");
    }

    fn on_keyword_complete(&self, keyword: &str, succeeded: bool) {
        if self.quiet {
            return;
        }
        if succeeded {
            println!("  \x1b[32m✓\x1b[0m \x1b[90m[[{}]]\x1b[0m", keyword);
        } else {
            println!("  \x1b[31m✗\x1b[0m \x1b[90m[[{}]] failed\x1b[0m", keyword);
        }
    }

    fn on_judgment(&self, round_loops: u32, cap: u32, decision: &JudgeDecision) {
        if self.quiet {
            return;
        }
        let verdict = match decision {
            JudgeDecision::LoopLimitReached => "depth limit reached".to_string(),
            JudgeDecision::EndSignal => "enough information".to_string(),
            JudgeDecision::Continue(keywords) => format!("{} more keywords", keywords.len()),
            JudgeDecision::Ambiguous => "no clear verdict".to_string(),
        };
        println!(
            "  \x1b[90m[judgment {}/{}] {}\x1b[0m",
            round_loops, cap, verdict
        );
    }

    fn on_judgment_failed(&self, round_loops: u32, cap: u32, error: &str) {
        if self.quiet {
            return;
        }
        println!(
            "  \x1b[31m[judgment {}/{}] failed: {}\x1b[0m",
            round_loops, cap, error
        );
    }
}

fn build_engine(config: DelveConfig, quiet: bool) -> anyhow::Result<ResearchEngine> {
    let engine = ResearchEngine::from_config(config).context("Gateway setup failed")?;
    Ok(engine.with_callback(Arc::new(CliCallback { quiet })))
}

fn print_turn(turn: &TurnResult) {
    println!("\n\x1b[32mDelve:\x1b[0m {}", turn.display_text);
}

/// Write a report, creating parent directories as needed.
pub(crate) fn save_report(path: &Path, report: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, report)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

/// Drive one research round for `topic` and exit.
pub async fn run_single_topic(
    topic: &str,
    config: DelveConfig,
    output: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    let engine = build_engine(config, quiet)?;
    let mut session = engine.start_session();

    let result = engine
        .run_to_rest(&mut session, Some(topic), |turn| {
            if !quiet {
                print_turn(turn);
            }
        })
        .await;
    print_turn(&result);

    match result.status {
        TurnStatus::ReportReady => {
            if let (Some(path), Some(report)) = (output, engine.latest_report(&session)) {
                save_report(path, report)?;
                println!("\nReport saved to {}", path.display());
            }
            Ok(())
        }
        TurnStatus::Conversing => {
            eprintln!(
                "\nThe planner needs more detail before research can start. Run `delve` without a topic to continue interactively."
            );
            Ok(())
        }
        status => anyhow::bail!("Research ended without a report ({:?})", status),
    }
}

/// Interactive loop: each line is user input unless it is a slash command.
pub async fn run_interactive(config: DelveConfig, workspace: PathBuf) -> anyhow::Result<()> {
    println!("\x1b[1;32m  Delve\x1b[0m deep research");
    println!(
        "  Planner: {} | Worker: {} | Loop cap: {} | Workspace: {}",
        config.models.planner.model,
        config.models.worker.model,
        config.research.loop_cap,
        workspace.display()
    );
    println!("  Describe a research topic. Type /help for commands, /quit to exit\n");

    let engine = build_engine(config, false)?;
    let mut session = engine.start_session();

    let stdin = io::stdin();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = slash::parse(input) {
            if !handle_slash(command, &engine, &mut session)? {
                break;
            }
            continue;
        }

        let result = engine
            .run_to_rest(&mut session, Some(input), print_turn)
            .await;
        print_turn(&result);
        if result.report_ready {
            println!("\n\x1b[90mReport ready. Use /report <path> to save it.\x1b[0m");
        }
    }

    println!("Goodbye!");
    Ok(())
}

/// Returns false when the loop should exit.
fn handle_slash(
    command: SlashCommand,
    engine: &ResearchEngine,
    session: &mut ResearchSession,
) -> anyhow::Result<bool> {
    match command {
        SlashCommand::Report(path) => match (engine.latest_report(session), path) {
            (None, _) => println!("No report available yet."),
            (Some(report), Some(path)) => {
                save_report(&path, report)?;
                println!("Report saved to {}", path.display());
            }
            (Some(report), None) => println!("{}", report),
        },
        SlashCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        }
        SlashCommand::Reset => {
            engine.reset(session);
            println!("Session reset. Describe a new research topic.");
        }
        SlashCommand::Help => {
            println!("Commands:");
            for (usage, description) in slash::HELP {
                println!("  {:<16} {}", usage, description);
            }
        }
        SlashCommand::Quit => return Ok(false),
        SlashCommand::Unknown(name) => {
            println!("Unknown command: /{}. Type /help for commands.", name);
        }
    }
    Ok(true)
}
