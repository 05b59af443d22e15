//! streamheal - scenario replay entry point
//!
//! Loads the engine configuration, replays a scenario (a file, or the
//! built-in demo) against a `PlaybackMonitor`, prints every `HealEvent`
//! and a final metrics summary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamheal_common::events::HealEvent;
use streamheal_engine::scenario::{Scenario, ScenarioRunner};
use streamheal_engine::{HealerConfig, PlaybackMonitor, SharedState};

/// Command-line arguments for streamheal
#[derive(Parser, Debug)]
#[command(name = "streamheal")]
#[command(about = "Replay playback scenarios through the stall recovery engine")]
#[command(version)]
struct Args {
    /// Config file (overrides STREAMHEAL_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario TOML file; the built-in demo runs when omitted
    #[arg(short, long, env = "STREAMHEAL_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = HealerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the config file's level
    let default_filter = format!("streamheal_engine={0},streamheal_common={0}", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)
            .with_context(|| format!("Failed to load scenario {}", path.display()))?,
        None => Scenario::demo().context("Built-in scenario is invalid")?,
    };
    info!(name = %scenario.name, "Scenario loaded");

    let shared = Arc::new(SharedState::default());
    let printer = tokio::spawn(print_events(shared.subscribe_events(), args.json));

    let mut monitor =
        PlaybackMonitor::new(config, Arc::clone(&shared)).context("Failed to create monitor")?;
    let runner = ScenarioRunner::new(scenario);

    let report = tokio::select! {
        result = runner.run(&mut monitor) => Some(result.context("Scenario failed")?),
        _ = shutdown_signal() => None,
    };

    let metrics = shared.metrics.snapshot();

    // Closing the last sender ends the printer
    drop(monitor);
    drop(shared);
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer task failed");
    }

    match report {
        Some(report) => {
            println!("--- summary ---");
            println!("ticks: {}", report.ticks);
            println!("recoveries dispatched: {}", report.recoveries);
            println!(
                "active source: {}",
                report.final_active.as_ref().map_or("none", |id| id.as_str())
            );
            for (id, state) in &report.final_states {
                println!("  {}: {}", id, state);
            }
        }
        None => println!("--- interrupted ---"),
    }
    println!("metrics: {}", serde_json::to_string(&metrics)?);

    Ok(())
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<HealEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) if json => println!("{}", event.to_json_line()),
            Ok(event) => println!("{}", describe(&event)),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// One-line human-readable form of an event
fn describe(event: &HealEvent) -> String {
    match event {
        HealEvent::SourceAttached { source_id, .. } => format!("attached      {}", source_id),
        HealEvent::SourceRemoved { source_id, reason, .. } => {
            format!("removed       {} ({})", source_id, reason)
        }
        HealEvent::StateChanged {
            source_id,
            old_state,
            new_state,
            cause,
            ..
        } => format!("state         {} {} -> {} [{}]", source_id, old_state, new_state, cause),
        HealEvent::RecoveryLockAcquired { source_id, forced, .. } => {
            format!("lock          {} acquired{}", source_id, if *forced { " (forced)" } else { "" })
        }
        HealEvent::RecoveryLockReleased { source_id, held_ms, .. } => {
            format!("lock          {} released after {} ms", source_id, held_ms)
        }
        HealEvent::RecoveryStarted { source_id, strategy, .. } => {
            format!("recovery      {} started ({})", source_id, strategy)
        }
        HealEvent::RecoveryFinished {
            source_id,
            strategy,
            success,
            detail,
            ..
        } => format!(
            "recovery      {} {} ({}): {}",
            source_id,
            if *success { "succeeded" } else { "failed" },
            strategy,
            detail
        ),
        HealEvent::BackoffApplied {
            source_id,
            no_heal_point_count,
            delay_ms,
            ..
        } => format!(
            "backoff       {} count={} delay={} ms",
            source_id, no_heal_point_count, delay_ms
        ),
        HealEvent::TrustEvaluated {
            source_id,
            trusted,
            reason,
            score,
            ..
        } => format!(
            "trust         {} trusted={} reason={} score={:.1}",
            source_id, trusted, reason, score
        ),
        HealEvent::CandidateSwitched { from_id, to_id, reason, .. } => format!(
            "switch        {} -> {} ({})",
            from_id.as_deref().unwrap_or("none"),
            to_id,
            reason
        ),
        HealEvent::SwitchSuppressed { from_id, to_id, reason, .. } => format!(
            "suppressed    {} -> {} ({})",
            from_id.as_deref().unwrap_or("none"),
            to_id,
            reason
        ),
        HealEvent::SignalReceived { kind, message, .. } => format!("signal        {} {}", kind, message),
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping replay");
        },
    }
}
