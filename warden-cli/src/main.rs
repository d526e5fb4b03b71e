//! Warden CLI - Command line tools for operating the warden trust engine

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use warden_core::{InteractionSignals, ProfileKey, TrustProfile, ViolationType};
use warden_runtime::TrustEngine;

mod config;

use config::{OutputFormat, WardenConfig};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - Community trust scoring and risk engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(long, global = true)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the database and show engine status
    Status,

    /// Feed synthetic interactions through the engine
    Simulate {
        /// Number of users
        #[arg(short, long, default_value = "20")]
        users: usize,

        /// Interactions per user
        #[arg(short = 'n', long, default_value = "25")]
        interactions: usize,

        /// Guild the users belong to
        #[arg(short, long, default_value = "sim-guild")]
        guild: String,

        /// RNG seed for reproducible runs
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },

    /// Show one trust profile
    Profile {
        user: String,
        guild: String,
    },

    /// Log a violation for a user
    Violation {
        user: String,
        guild: String,

        /// spam, toxicity, caps_abuse, mention_spam, repeated_content, emotional_distress
        #[arg(short, long)]
        kind: String,

        /// Severity multiplier (>= 0)
        #[arg(short, long, default_value = "1.0")]
        severity: f64,

        /// Evidence attached to the violation
        #[arg(short, long)]
        evidence: Option<String>,
    },

    /// Predict a user's trust score
    Predict {
        user: String,
        guild: String,

        /// Horizon in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Aggregate statistics over all profiles
    Analytics,

    /// Export all trust state as a JSON snapshot
    Export {
        /// Destination, defaults to the configured export path
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Run one pass of refresh, tuning, pattern cleanup and storage maintenance
    Maintain,

    /// Run background tasks and log quarantine events until Ctrl-C
    Serve,
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = WardenConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config = config.with_db(db);
    }
    if let Some(format) = cli.format {
        config = config.with_output(format);
    }

    let engine = open_engine(&config).await?;

    match cli.command {
        Commands::Status => cmd_status(&engine, &config).await,
        Commands::Simulate {
            users,
            interactions,
            guild,
            seed,
        } => cmd_simulate(&engine, users, interactions, &guild, seed).await,
        Commands::Profile { user, guild } => {
            cmd_profile(&engine, &ProfileKey::new(user, guild), config.output).await
        }
        Commands::Violation {
            user,
            guild,
            kind,
            severity,
            evidence,
        } => {
            cmd_violation(
                &engine,
                &ProfileKey::new(user, guild),
                ViolationType::from(kind.as_str()),
                severity,
                evidence,
            )
            .await
        }
        Commands::Predict { user, guild, hours } => {
            cmd_predict(&engine, &ProfileKey::new(user, guild), hours, config.output).await
        }
        Commands::Analytics => cmd_analytics(&engine, config.output).await,
        Commands::Export { path } => {
            let path = path.unwrap_or_else(|| config.export_path.clone());
            cmd_export(&engine, &path).await
        }
        Commands::Maintain => cmd_maintain(&engine).await,
        Commands::Serve => cmd_serve(engine).await,
    }
}

async fn open_engine(config: &WardenConfig) -> Result<TrustEngine> {
    let engine_config = config.engine.clone();
    let path = engine_config.store.path.clone();
    tokio::task::spawn_blocking(move || TrustEngine::open(engine_config))
        .await?
        .with_context(|| format!("opening database {}", path.display()))
}

fn banner(title: &str) {
    println!("warden :: {title}");
    println!("{}", "-".repeat(title.len() + 10));
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_profile(profile: &TrustProfile) {
    println!("Profile {}", profile.key);
    println!("  Trust score: {:.2}", profile.trust_score);
    println!(
        "  Risk: {} (confidence {:.2})",
        profile.risk_level, profile.confidence
    );
    println!("  Positive interactions: {}", profile.positive_interactions);
    println!("  Improvement streak: {}", profile.improvement_streak);
    println!("  Last updated: {}", profile.last_updated.to_rfc3339());
    println!("  Violations: {}", profile.violation_history.len());
    for violation in profile.violation_history.iter().rev().take(10) {
        println!(
            "    - {} x{:.1} at {}{}",
            violation.violation_type,
            violation.severity,
            violation.timestamp.to_rfc3339(),
            violation
                .evidence
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }
}

async fn cmd_status(engine: &TrustEngine, config: &WardenConfig) -> Result<()> {
    banner("Trust Engine Health");

    let store = Arc::clone(engine.store());
    let (schema, profiles, quarantines) = tokio::task::spawn_blocking(move || -> Result<_> {
        let conn = store.pool().acquire()?;
        let schema = warden_store::schema::version(&conn)?;
        drop(conn);
        Ok((schema, store.profile_count()?, store.quarantine_count()?))
    })
    .await??;

    let pool = engine.store().pool_state();
    let weights = engine.weights().await;

    println!("Scoring model  v{}", warden_core::VERSION);
    println!(
        "  weights      behavioral={:.3} violation={:.3} positive={:.3}",
        weights.behavioral, weights.violation, weights.positive
    );
    println!(
        "  quarantine   score >= {:.0}, base {}s",
        config.engine.quarantine.auto_quarantine_threshold, config.engine.quarantine.base_duration_secs
    );
    println!("Trust store    {}", config.engine.store.path.display());
    println!("  schema       v{}", schema.unwrap_or_default());
    println!("  connections  {}/{} open, {} idle", pool.connections, pool.max_connections, pool.idle);
    println!("  retention    {} days", config.engine.store.retention_days);
    println!("Watch list     {} profiles, {} quarantines on record", profiles, quarantines);
    println!("  io timeout   {:?}", engine.config().io_timeout());

    println!();
    println!("Database reachable. Interactions can be scored.");
    Ok(())
}

/// Random signals skewed by a per-user temperament in `[0, 1)`
fn synthetic_signals(rng: &mut StdRng, temperament: f64) -> InteractionSignals {
    let rate = if rng.gen_bool(0.15 * (1.0 - temperament)) {
        rng.gen_range(10.0..30.0)
    } else {
        rng.gen_range(0.5..6.0)
    };
    let quality = (temperament + rng.gen_range(-0.3..0.3)).clamp(0.0, 1.0);

    let mut signals = InteractionSignals::new(quality)
        .with_message_rate(rate)
        .with_mentions(rng.gen_range(0..4));
    if rng.gen_bool(0.5) {
        signals = signals.with_response_latency(rng.gen_range(0.5..600.0));
    }
    signals
}

async fn cmd_simulate(
    engine: &TrustEngine,
    users: usize,
    interactions: usize,
    guild: &str,
    seed: u64,
) -> Result<()> {
    banner("Warden Simulation");
    println!("Users: {}", users);
    println!("Interactions per user: {}", interactions);
    println!("Seed: {}", seed);
    println!();

    let mut rng = StdRng::seed_from_u64(seed);
    let keys: Vec<(ProfileKey, f64)> = (0..users)
        .map(|i| (ProfileKey::new(format!("sim-user-{}", i), guild), rng.gen::<f64>()))
        .collect();

    let start = std::time::Instant::now();
    let mut quarantines = 0usize;
    let mut violations = 0usize;

    for _ in 0..interactions {
        for (key, temperament) in &keys {
            if rng.gen_bool(0.1 * (1.0 - temperament)) {
                let kind = match rng.gen_range(0..4) {
                    0 => ViolationType::Spam,
                    1 => ViolationType::Toxicity,
                    2 => ViolationType::CapsAbuse,
                    _ => ViolationType::MentionSpam,
                };
                engine
                    .log_violation(key, kind, rng.gen_range(0.5..2.0), None)
                    .await?;
                violations += 1;
            }

            let signals = synthetic_signals(&mut rng, *temperament);
            let update = engine.calculate_trust_score(key, &signals).await?;
            if update.quarantine.is_some() {
                quarantines += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let total = users * interactions;
    let report = engine.analytics().await?;

    println!("Simulation complete:");
    println!("  Duration: {}ms", elapsed.as_millis());
    println!(
        "  Interactions/sec: {:.0}",
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Violations logged: {}", violations);
    println!("  Quarantines issued: {}", quarantines);
    println!("  Mean score: {:.2}", report.summary.mean_score);
    println!("  Risk distribution:");
    for (level, count) in &report.summary.risk_distribution {
        println!("    {:<8} {}", level.as_str(), count);
    }
    println!("  Cache hit rate: {:.1}%", report.cache.hit_rate());
    Ok(())
}

async fn cmd_profile(engine: &TrustEngine, key: &ProfileKey, output: OutputFormat) -> Result<()> {
    let Some(profile) = engine.get_trust_profile(key).await? else {
        println!("No profile for {}", key);
        return Ok(());
    };

    match output {
        OutputFormat::Json => print_json(&profile),
        OutputFormat::Text => {
            print_profile(&profile);
            Ok(())
        }
    }
}

async fn cmd_violation(
    engine: &TrustEngine,
    key: &ProfileKey,
    kind: ViolationType,
    severity: f64,
    evidence: Option<String>,
) -> Result<()> {
    if let ViolationType::Other(name) = &kind {
        warn!(kind = %name, "Unrecognized violation type, using default impact");
    }
    let violation = engine.log_violation(key, kind, severity, evidence).await?;
    println!(
        "✓ Logged {} (severity {:.1}) for {} as {}",
        violation.violation_type, violation.severity, key, violation.id
    );
    Ok(())
}

async fn cmd_predict(
    engine: &TrustEngine,
    key: &ProfileKey,
    hours: i64,
    output: OutputFormat,
) -> Result<()> {
    let prediction = engine
        .predict_future_trust(key, Duration::hours(hours.max(0)))
        .await?;

    if output == OutputFormat::Json {
        return print_json(&prediction);
    }

    println!("Prediction for {} in {}h", key, hours);
    println!("  Current: {:.2}", prediction.current_score);
    println!("  Predicted: {:.2}", prediction.predicted_score);
    println!("  Confidence: {:.2}", prediction.confidence);
    println!(
        "  Trends: trust {:+.3}/sample, behavior {:+.3}/sample",
        prediction.trust_trend, prediction.behavioral_trend
    );
    if !prediction.risk_factors.is_empty() {
        println!("  Risk factors:");
        for factor in &prediction.risk_factors {
            println!("    - {}", factor);
        }
    }
    if !prediction.recommendations.is_empty() {
        println!("  Recommendations:");
        for recommendation in &prediction.recommendations {
            println!("    - {}", recommendation);
        }
    }
    Ok(())
}

async fn cmd_analytics(engine: &TrustEngine, output: OutputFormat) -> Result<()> {
    let report = engine.analytics().await?;
    if output == OutputFormat::Json {
        return print_json(&report);
    }

    let summary = &report.summary;
    banner("Warden Analytics");
    println!("Profiles: {}", summary.total_profiles);
    println!(
        "Scores: mean {:.2}, min {:.2}, max {:.2}",
        summary.mean_score, summary.min_score, summary.max_score
    );
    println!("Violations: {}", summary.total_violations);
    println!("Quarantines issued: {}", summary.quarantines_issued);
    match summary.model_accuracy {
        Some(accuracy) => println!(
            "Model accuracy: {:.1}% over {} predictions",
            accuracy * 100.0,
            summary.predictions_evaluated
        ),
        None => println!("Model accuracy: no predictions evaluated yet"),
    }
    println!(
        "Weights: behavioral {:.3}, violation {:.3}, positive {:.3}",
        summary.weights.behavioral, summary.weights.violation, summary.weights.positive
    );
    println!();

    println!("Risk distribution:");
    for (level, count) in &summary.risk_distribution {
        println!("  {:<8} {}", level.as_str(), count);
    }
    println!("Score buckets:");
    for bucket in &summary.score_buckets {
        println!("  {:>5.0}-{:<5.0} {}", bucket.lower, bucket.upper, bucket.count);
    }
    if !summary.lowest.is_empty() {
        println!("Lowest scores:");
        for (key, score) in &summary.lowest {
            println!("  {:<30} {:.2}", key.to_string(), score);
        }
    }
    println!();

    println!(
        "Cache: {} entries, {:.1}% hit rate, {} evictions, {} expired",
        report.cache.entries,
        report.cache.hit_rate(),
        report.cache.evictions,
        report.cache.expired
    );
    println!(
        "Pool: {}/{} in use",
        report.pool.in_use, report.pool.max_connections
    );
    Ok(())
}

async fn cmd_export(engine: &TrustEngine, path: &Path) -> Result<()> {
    let summary = engine.export_snapshot(path).await?;
    println!(
        "✓ Exported {} profiles, {} patterns, {} predictions to {} ({} bytes)",
        summary.profiles,
        summary.patterns,
        summary.predictions,
        path.display(),
        summary.bytes
    );
    Ok(())
}

async fn cmd_maintain(engine: &TrustEngine) -> Result<()> {
    let now = chrono::Utc::now();

    let refreshed = engine.refresh_all(now).await?;
    println!("✓ Refreshed {} profiles", refreshed);

    let tuning = engine.tune_weights(now).await?;
    println!(
        "✓ Evaluated {} predictions ({:?})",
        tuning.evaluated, tuning.outcome
    );

    let cleanup = engine.cleanup_patterns(now).await?;
    println!(
        "✓ Pruned {} samples from {} patterns, {} emptied and deleted",
        cleanup.pruned_samples,
        cleanup.retained + cleanup.dropped,
        cleanup.deleted
    );

    let report = engine.run_maintenance(now).await?;
    println!(
        "✓ Purged {} violations and {} quarantine events older than {} in {}ms",
        report.violations_purged,
        report.quarantines_purged,
        report.cutoff.to_rfc3339(),
        report.elapsed_ms
    );
    Ok(())
}

async fn cmd_serve(mut engine: TrustEngine) -> Result<()> {
    let mut events = engine
        .take_quarantine_events()
        .context("quarantine events already taken")?;
    let engine = Arc::new(engine);
    let supervisor = engine.start_background();
    info!(tasks = ?supervisor.task_names(), "Warden serving, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                info!(
                    user = %event.key,
                    duration_secs = event.duration_secs,
                    reason = %event.reason,
                    "Quarantine"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    for (task, status) in supervisor.status().await {
        info!(
            task,
            runs = status.runs,
            failures = status.failures,
            panics = status.panics,
            "Task summary"
        );
    }
    supervisor.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "warden", "profile", "alice", "guild", "--db", "t.db", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("t.db")));
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Profile { .. }));
    }

    #[test]
    fn test_synthetic_signals_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..200 {
            let signals = synthetic_signals(&mut rng, (i % 10) as f64 / 10.0);
            signals.validate().unwrap();
        }
    }
}
