use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use ms11_fleet::types::{AgentStatus, Capability, CapabilitySet, NewTask, TaskPriority};
use ms11_fleet::{logging, Config, FleetContext, FleetPlan};

#[derive(Parser)]
#[command(name = "ms11-fleet")]
#[command(about = "Agent registry and task scheduler for game automation fleets")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator loop
    Run {
        #[arg(long, help = "Fleet plan to apply before starting")]
        plan: Option<PathBuf>,
        #[arg(long, help = "Run a single tick and exit")]
        once: bool,
    },
    /// Print registry and schedule summaries
    Status,
    /// Show the task an agent would run next
    Next { agent: String },
    /// Register an agent
    Register {
        name: String,
        #[arg(long)]
        machine: String,
        #[arg(long)]
        window: String,
        #[arg(long = "capability", value_delimiter = ',', help = "e.g. quest,combat")]
        capabilities: Vec<Capability>,
        #[arg(long)]
        config_path: Option<PathBuf>,
    },
    /// Record a heartbeat from an agent
    Heartbeat {
        name: String,
        #[arg(long, default_value = "online")]
        status: AgentStatus,
        #[arg(long)]
        mode: Option<String>,
    },
    /// Add a task to the schedule
    AddTask {
        name: String,
        #[arg(long)]
        mode: String,
        #[arg(long)]
        agent: String,
        #[arg(long, default_value = "medium")]
        priority: TaskPriority,
        #[arg(long, help = "RFC 3339 start time, defaults to now")]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        requires: Option<Capability>,
        #[arg(long)]
        daily_cap: Option<u32>,
        #[arg(long)]
        weekly_cap: Option<u32>,
    },
    /// Apply a fleet plan without running anything
    Plan { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    logging::init(&config.log_level);

    match cli.command {
        Commands::Run { plan, once } => run(config, plan, once).await?,
        Commands::Status => status(config)?,
        Commands::Next { agent } => next(config, &agent)?,
        Commands::Register {
            name,
            machine,
            window,
            capabilities,
            config_path,
        } => {
            let context = FleetContext::open(config)?;
            let caps: CapabilitySet = capabilities.into_iter().collect();
            let agent = context
                .registry
                .register(&name, &machine, &window, caps, config_path)?;
            print_json(&agent)?;
        }
        Commands::Heartbeat { name, status, mode } => {
            let context = FleetContext::open(config)?;
            if !context.registry.update_heartbeat(&name, status, mode, None)? {
                bail!("Agent '{}' is not registered", name);
            }
            println!("Heartbeat recorded for {}", name);
        }
        Commands::AddTask {
            name,
            mode,
            agent,
            priority,
            at,
            requires,
            daily_cap,
            weekly_cap,
        } => {
            let context = FleetContext::open(config)?;
            let mut task = NewTask::new(name, mode, agent)
                .priority(priority)
                .scheduled_for(at.unwrap_or_else(Utc::now));
            if let Some(capability) = requires {
                task = task.requires(capability);
            }
            if let Some(cap) = daily_cap {
                task = task.daily_cap(cap);
            }
            if let Some(cap) = weekly_cap {
                task = task.weekly_cap(cap);
            }
            print_json(&context.scheduler.create_task(task)?)?;
        }
        Commands::Plan { path } => {
            let context = FleetContext::open(config)?;
            let report = FleetPlan::load(&path)?.apply(&context.registry, &context.scheduler)?;
            print_json(&report)?;
        }
    }

    Ok(())
}

async fn run(mut config: Config, plan: Option<PathBuf>, once: bool) -> Result<()> {
    if plan.is_some() {
        config.plan_path = plan;
    }
    let context = FleetContext::open(config)?;

    if let Some(path) = &context.config.plan_path {
        FleetPlan::load(path)
            .and_then(|plan| plan.apply(&context.registry, &context.scheduler))
            .with_context(|| format!("Failed to apply plan {}", path.display()))?;
    }

    let orchestrator = context.orchestrator();
    if once {
        let mut report = orchestrator.tick().await?;
        report.finished.extend(orchestrator.drain().await);
        print_json(&report)?;
        return Ok(());
    }

    orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn status(config: Config) -> Result<()> {
    #[derive(Serialize)]
    struct Status {
        registry: ms11_fleet::registry::RegistrySummary,
        schedule: ms11_fleet::scheduler::ScheduleSummary,
        health: HashMap<String, String>,
    }

    let context = FleetContext::open(config)?;
    let health = context
        .registry
        .check_all_health()?
        .into_iter()
        .map(|(name, health)| (name, health.to_string()))
        .collect();

    print_json(&Status {
        registry: context.registry.get_registry_summary(),
        schedule: context.scheduler.get_schedule_summary(),
        health,
    })
}

fn next(config: Config, agent: &str) -> Result<()> {
    let context = FleetContext::open(config)?;
    if !context.registry.contains(agent) {
        bail!("Agent '{}' is not registered", agent);
    }

    match context
        .scheduler
        .get_next_task(agent, context.registry.as_ref())?
    {
        Some(task) => print_json(&task),
        None => {
            println!("No eligible task for {}", agent);
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
