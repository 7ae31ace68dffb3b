//! Stomper CLI entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use stomper::assistant::CommandAssistant;
use stomper::cli::{Cli, Command, OutputFormat};
use stomper::config::Config;
use stomper::domain::SessionStatus;
use stomper::learning::{LearningOptions, LearningStore};
use stomper::sandbox::{SandboxConfig, SandboxManager};
use stomper::session::{Session, SessionConfig};
use stomper::tools::ToolRegistry;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            path,
            tools,
            max_attempts,
            parallel_files,
            no_tests,
            test_mode,
            no_isolation,
            fail_fast,
            max_errors,
            strategy,
            files,
        } => {
            let root = path.unwrap_or_else(|| PathBuf::from("."));

            let mut session_config = SessionConfig::new(root);
            session_config.tools = match tools {
                Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
                None => config.tools.enabled.clone(),
            };
            session_config.test_command = config.tools.test_command.clone();
            session_config.test_timeout_ms = config.tools.test_timeout_ms;
            session_config.max_attempts = max_attempts.unwrap_or(config.session.max_attempts_per_file);
            session_config.max_parallel_files =
                parallel_files.unwrap_or(config.session.max_parallel_files).clamp(1, 16);
            session_config.run_tests = !no_tests && config.session.run_tests;
            session_config.test_mode = test_mode.unwrap_or(config.session.test_mode);
            session_config.use_isolation = !no_isolation && config.session.use_isolation;
            session_config.continue_on_error = !fail_fast && config.session.continue_on_error;
            session_config.max_errors_per_prompt = max_errors.unwrap_or(config.session.max_errors_per_prompt);
            session_config.strategy = strategy.unwrap_or(config.session.processing_strategy);
            session_config.file_filters = files;
            session_config.learning = LearningOptions {
                auto_save: config.learning.auto_save,
                history_limit: config.learning.history_limit,
                top_n: config.learning.top_n,
            };

            let assistant = Arc::new(CommandAssistant::new(
                config.assistant.command.clone(),
                Duration::from_millis(config.assistant.timeout_ms),
            ));

            let session = Session::new(session_config, ToolRegistry::standard(), assistant);
            let state = session.run().await?;

            println!("Session {} {}", state.id, state.status);
            println!("  errors fixed: {}", state.total_errors_fixed);
            for path in &state.successful_fixes {
                println!("  fixed: {}", path.display());
            }
            for work in state.files.iter().filter(|w| w.last_error.is_some()) {
                println!(
                    "  failed: {} ({})",
                    work.path.display(),
                    work.last_error.as_deref().unwrap_or("unknown")
                );
            }

            if state.status != SessionStatus::Completed {
                std::process::exit(1);
            }
        }

        Command::Stats { path, format } => {
            let root = path.unwrap_or_else(|| PathBuf::from("."));
            let store = LearningStore::open_with(
                &root,
                LearningOptions {
                    auto_save: false,
                    history_limit: config.learning.history_limit,
                    top_n: config.learning.top_n,
                },
            )?;
            let stats = store.statistics();

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Text => {
                    println!("Patterns: {}", stats.pattern_count);
                    println!(
                        "Attempts: {} ({} succeeded, {:.0}%)",
                        stats.total_attempts,
                        stats.total_successes,
                        stats.overall_success_rate * 100.0
                    );
                    if !stats.most_difficult.is_empty() {
                        println!("Most difficult:");
                        for row in &stats.most_difficult {
                            println!("  {} ({} attempts, {:.0}%)", row.key, row.attempts, row.success_rate * 100.0);
                        }
                    }
                    if !stats.most_successful.is_empty() {
                        println!("Most successful:");
                        for row in &stats.most_successful {
                            println!("  {} ({} attempts, {:.0}%)", row.key, row.attempts, row.success_rate * 100.0);
                        }
                    }
                }
            }
        }

        Command::Clean { path } => {
            let root = path.unwrap_or_else(|| PathBuf::from("."));
            let manager = SandboxManager::new(SandboxConfig::with_repo(&root));
            let swept = manager.sweep_stale().await;
            info!(swept, "Sandbox cleanup finished");
            println!("Removed {} stale sandbox(es)", swept);
        }
    }

    Ok(())
}
