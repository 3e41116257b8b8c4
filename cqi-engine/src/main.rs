//! cqi-engine - clinical quality indicator engine
//!
//! `run` hosts the recurring job scheduler until interrupted. Every other
//! subcommand performs one operation and prints its result as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cqi_common::config::ConfigResolver;
use cqi_common::time::{Period, PeriodType};
use serde::Serialize;
use tokio::signal;
use tracing::info;

use cqi_engine::db::status;
use cqi_engine::indicators::{ParamValue, ParameterSet};
use cqi_engine::Engine;

/// Command-line arguments for cqi-engine
#[derive(Parser, Debug)]
#[command(name = "cqi-engine")]
#[command(about = "Clinical quality indicator engine")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CQI_CONFIG and default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Reporting period selection shared by several subcommands
#[derive(clap::Args, Debug)]
struct PeriodArgs {
    /// Period start (YYYY-MM-DD); requires --end
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Period end (YYYY-MM-DD); requires --start
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Relative period used when --start/--end are absent
    #[arg(long, default_value = "current_quarter")]
    period_type: String,
}

impl PeriodArgs {
    fn resolve(&self) -> Result<Period> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => Ok(Period::parse(start, end)?),
            _ => {
                let period_type: PeriodType = self.period_type.parse()?;
                Ok(period_type.range_at(chrono::Utc::now().date_naive()))
            }
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the job scheduler until Ctrl+C
    Run,

    /// Execute one indicator at one site
    Execute {
        #[arg(long)]
        site: String,
        #[arg(long)]
        indicator: String,
        #[command(flatten)]
        period: PeriodArgs,
        /// Extra query parameter, NAME=VALUE (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
        /// Print driver rows without normalization
        #[arg(long)]
        raw: bool,
    },

    /// Execute every active indicator at one site
    ExecuteAll {
        #[arg(long)]
        site: String,
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
        /// Persist results to the aggregate store
        #[arg(long)]
        store: bool,
    },

    /// Run the validation rule catalog
    Validate {
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long)]
        site: Option<String>,
        /// Run only this rule
        #[arg(long)]
        rule: Option<String>,
    },

    /// Apply corrective updates for auto-fixable rules
    Autofix {
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long)]
        site: Option<String>,
        /// Rule id (repeatable)
        #[arg(long = "rule", required = true)]
        rules: Vec<String>,
    },

    /// Print the data quality score
    Score {
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long)]
        site: Option<String>,
    },

    /// Run a scheduled job now
    Trigger { job_name: String },

    /// List scheduled jobs
    Jobs,

    /// Activate or deactivate an indicator
    SetStatus {
        indicator: String,
        #[arg(long, conflicts_with = "inactive")]
        active: bool,
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        description: Option<String>,
    },

    /// Recent validation runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

fn parse_param(text: &str) -> std::result::Result<(String, ParamValue), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))?;
    if name.is_empty() {
        return Err("parameter name is empty".to_string());
    }
    let value = if let Ok(v) = value.parse::<i64>() {
        ParamValue::Int(v)
    } else if let Ok(v) = value.parse::<f64>() {
        ParamValue::Float(v)
    } else if let Ok(v) = value.parse::<bool>() {
        ParamValue::Bool(v)
    } else {
        ParamValue::Text(value.to_string())
    };
    Ok((name.to_string(), value))
}

fn invocation_params(period: &Period, extra: Vec<(String, ParamValue)>) -> ParameterSet {
    let mut params = ParameterSet::for_period(period);
    for (name, value) in extra {
        params.set(name, value);
    }
    params
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::new(args.config.clone())
        .resolve()
        .context("Failed to resolve configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "Starting cqi-engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config.source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let engine = Engine::from_config(&config)
        .await
        .context("Failed to initialize engine")?;

    match args.command {
        Command::Run => {
            let count = engine.scheduler.start().await?;
            info!("Scheduler running with {} job(s); press Ctrl+C to stop", count);
            signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Shutdown requested");
            engine.scheduler.stop_all().await?;
        }

        Command::Execute {
            site,
            indicator,
            period,
            params,
            raw,
        } => {
            let period = period.resolve()?;
            let params = engine.params_with(&invocation_params(&period, params));
            if raw {
                print_json(&engine.executor.execute_raw(&site, &indicator, &params).await?)?;
            } else {
                print_json(&engine.executor.execute(&site, &indicator, &params).await?)?;
            }
        }

        Command::ExecuteAll {
            site,
            period,
            params,
            store,
        } => {
            let period = period.resolve()?;
            let params = engine.params_with(&invocation_params(&period, params));
            let report = engine.batch.execute_all(&site, &params).await?;
            if store {
                let stored = cqi_engine::db::aggregates::replace_results(
                    &engine.db,
                    &site,
                    &period,
                    &report.results,
                )
                .await?;
                info!("Stored {} aggregate rows for site {}", stored, site);
            }
            print_json(&report)?;
        }

        Command::Validate { period, site, rule } => {
            let period = period.resolve()?;
            match rule {
                Some(rule_id) => print_json(
                    &engine
                        .validation
                        .run_single(&rule_id, &period, site.as_deref())
                        .await?,
                )?,
                None => print_json(&engine.validation.run_all(&period, site.as_deref()).await?)?,
            }
        }

        Command::Autofix {
            period,
            site,
            rules,
        } => {
            let period = period.resolve()?;
            print_json(
                &engine
                    .validation
                    .auto_fix(&rules, &period, site.as_deref())
                    .await?,
            )?;
        }

        Command::Score { period, site } => {
            let period = period.resolve()?;
            print_json(&engine.validation.get_score(&period, site.as_deref()).await?)?;
        }

        Command::Trigger { job_name } => {
            engine.scheduler.ensure_jobs().await?;
            print_json(&engine.scheduler.trigger(&job_name).await?)?;
        }

        Command::Jobs => {
            engine.scheduler.ensure_jobs().await?;
            print_json(&engine.scheduler.get_status().await?)?;
        }

        Command::SetStatus {
            indicator,
            active,
            inactive,
            description,
        } => {
            if !active && !inactive {
                anyhow::bail!("one of --active or --inactive is required");
            }
            status::set_status(&engine.db, &indicator, active, description.as_deref()).await?;
            print_json(&status::list_statuses(&engine.db).await?)?;
        }

        Command::Runs { limit } => {
            print_json(&engine.validation.recent_runs(limit).await?)?;
        }
    }

    Ok(())
}
