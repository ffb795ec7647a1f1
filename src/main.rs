//! Cadence operator CLI
//!
//! Inspection and maintenance commands against the engine database:
//! quota windows, usage stats, pending nudges, task health snapshots.
//! Generation flows need live task/calendar/AI collaborators and run in
//! the host service, not here.

use cadence::{
    pending_nudges, update_nudge_status, Database, NudgeError, QuotaLedger, UsagePeriod,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Proactive orchestration engine: quotas, nudges, task health")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PeriodArg {
    Day,
    Week,
    Month,
}

impl From<PeriodArg> for UsagePeriod {
    fn from(p: PeriodArg) -> Self {
        match p {
            PeriodArg::Day => UsagePeriod::Day,
            PeriodArg::Week => UsagePeriod::Week,
            PeriodArg::Month => UsagePeriod::Month,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show AI usage stats for a tenant
    Usage {
        /// Tenant to report on
        #[arg(long)]
        tenant: String,
        /// Aggregation period
        #[arg(long, value_enum, default_value = "day")]
        period: PeriodArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current rate-limit window standing for a tenant
    Windows {
        #[arg(long)]
        tenant: String,
    },
    /// List a user's pending nudges
    Nudges {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a nudge as acted on or dismissed
    Nudge {
        /// Nudge id
        id: i32,
        /// New status: acted or dismissed
        status: String,
        /// User the nudge belongs to
        #[arg(long)]
        user: String,
    },
    /// Show stored task health snapshots for a tenant, worst first
    Health {
        #[arg(long)]
        tenant: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Completion { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "cadence", &mut io::stdout());
        return Ok(());
    }

    let db = Database::open()?;
    let config = cadence::EngineConfig::load();

    match cli.command {
        Commands::Usage {
            tenant,
            period,
            json,
        } => {
            let ledger = QuotaLedger::new(&db, &config.quota);
            let stats = ledger.usage_stats(&tenant, period.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("{}", format!("Usage for {}", tenant).bold());
            println!(
                "  {} calls ({} failed), {} prompt + {} completion tokens",
                stats.totals.calls,
                stats.totals.failures,
                stats.totals.prompt_tokens,
                stats.totals.completion_tokens
            );
            if !stats.by_operation.is_empty() {
                println!();
                for op in &stats.by_operation {
                    println!(
                        "  {:<28} {:>5} calls  {:>3} failed  {:>8} tokens",
                        format!("{}/{}", op.service, op.operation).cyan(),
                        op.calls,
                        op.failures,
                        op.prompt_tokens + op.completion_tokens
                    );
                }
            }
            println!();
            print_windows(&stats.rate_limits);
        }
        Commands::Windows { tenant } => {
            let ledger = QuotaLedger::new(&db, &config.quota);
            let stats = ledger.usage_stats(&tenant, UsagePeriod::Day)?;
            println!("{}", format!("Rate-limit windows for {}", tenant).bold());
            print_windows(&stats.rate_limits);
        }
        Commands::Nudges { tenant, user, json } => {
            let rows = pending_nudges(&db, &tenant, &user)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No pending nudges for {}", user);
                return Ok(());
            }
            for row in rows {
                let priority = match row.priority.as_str() {
                    "high" => row.priority.red(),
                    "medium" => row.priority.yellow(),
                    _ => row.priority.normal(),
                };
                println!(
                    "{:>5}  [{:<8}] {}  {}",
                    row.id.to_string().bold(),
                    priority,
                    row.nudge_type.cyan(),
                    row.title
                );
                println!("       {}", row.message.dimmed());
            }
        }
        Commands::Nudge { id, status, user } => {
            match update_nudge_status(&db, id, &status, &user) {
                Ok(row) => {
                    println!("{} Nudge {} is now {}", "✓".green(), row.id, row.status.bold());
                }
                Err(NudgeError::NotFound(id)) => {
                    return Err(format!("nudge {} not found for that user", id).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Health { tenant, json } => {
            let rows = db.health_snapshots_for_tenant(&tenant)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No health snapshots stored for {}", tenant);
                return Ok(());
            }
            for row in rows {
                let risk = match row.risk_level.as_str() {
                    "high" => row.risk_level.red().bold(),
                    "medium" => row.risk_level.yellow(),
                    _ => row.risk_level.green(),
                };
                println!(
                    "{:>6.2}  [{:<6}] {}  (as of {})",
                    row.health_score,
                    risk,
                    row.task_id.cyan(),
                    row.computed_at.dimmed()
                );
            }
        }
        Commands::Completion { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn print_windows(windows: &[cadence::quota::WindowStatus]) {
    for status in windows {
        let used = if status.remaining == 0 {
            status.used.to_string().red().bold()
        } else {
            status.used.to_string().normal()
        };
        println!(
            "  {:<8} {}/{} calls, {} tokens",
            status.window.as_str(),
            used,
            status.limit,
            status.token_count
        );
    }
}
