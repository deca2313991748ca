use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::Stdout;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use site_sim::simulation::{
    spawn_json_lines, AutoScheduler, Command, SimConfig, SimEngine, SimMetrics, SimRunner,
    TaskKind, TaskPriority, ZoneCategory, ZoneId,
};

/// Publications buffered for the JSON writer before they are dropped
const JSON_BUFFER: usize = 4096;

#[derive(Parser)]
#[command(name = "site_sim")]
#[command(about = "Construction site robot simulation")]
struct Cli {
    /// TOML configuration file; the built-in construction site otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of ticks to run
    #[arg(long, default_value = "3000")]
    ticks: u64,

    /// Simulated seconds per tick (overrides the configuration)
    #[arg(long)]
    delta: Option<f32>,

    /// Time multiplier in [0.1, 5.0]
    #[arg(long)]
    speed: Option<f32>,

    /// Seed for reproducible object placement
    #[arg(long)]
    seed: Option<u64>,

    /// Number of demo pick-and-place tasks to create at start
    #[arg(long, default_value = "6")]
    tasks: usize,

    /// Stream events and snapshots as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Run the engine on its own thread in wall-clock time, with the planner
    /// attached
    #[arg(long)]
    realtime: bool,

    /// Print a summary every N ticks (0 = only at start and end)
    #[arg(long, default_value = "0")]
    print_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn,site_sim=info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let mut engine = SimEngine::new(config).context("Invalid simulation configuration")?;
    let json_output = if cli.json { attach_json_output(&mut engine) } else { None };

    let mut engine = if cli.realtime {
        run_realtime(engine, &cli)?
    } else {
        run_headless(engine, &cli)?
    };

    if let Some((id, writer)) = json_output {
        // Dropping the observer lets the writer drain and exit
        engine.unsubscribe(id);
        if writer.join().is_err() {
            warn!("JSON output thread panicked");
        }
    }

    if !cli.json {
        println!("=== Final State ===");
        engine.print_summary();
        engine.world().draw_map();
    }
    log_summary(&engine);
    Ok(())
}

/// Stream events and snapshots to stdout from a writer thread
fn attach_json_output(engine: &mut SimEngine) -> Option<(usize, JoinHandle<Stdout>)> {
    let (observer, writer) = spawn_json_lines(std::io::stdout(), JSON_BUFFER);
    match engine.subscribe(Box::new(observer)) {
        Some(id) => Some((id, writer)),
        None => {
            warn!("JSON output could not be attached");
            None
        }
    }
}

fn load_config(cli: &Cli) -> Result<SimConfig> {
    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(delta) = cli.delta {
        config.engine.tick_duration_secs = delta;
    }
    if let Some(speed) = cli.speed {
        config.engine.speed = speed;
    }
    if cli.seed.is_some() {
        config.engine.seed = cli.seed;
    }
    Ok(config)
}

/// Commands that set up the demo run: one task per available object, up to
/// `count`, spread over the delivery zones
fn demo_commands(engine: &SimEngine, count: usize) -> Vec<Command> {
    let targets: Vec<ZoneId> = engine
        .world()
        .zones
        .values()
        .filter(|zone| {
            matches!(
                zone.category,
                ZoneCategory::Staging | ZoneCategory::Assembly | ZoneCategory::Work
            )
        })
        .map(|zone| zone.id)
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }

    engine
        .available_objects()
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(i, object)| Command::CreateTask {
            object,
            zone: targets[i % targets.len()],
            robot: None,
            kind: if i % 4 == 3 { TaskKind::Transport } else { TaskKind::PickAndPlace },
            priority: if i == 0 { TaskPriority::High } else { TaskPriority::Normal },
        })
        .collect()
}

fn all_tasks_settled(metrics: &SimMetrics) -> bool {
    metrics.tasks_created > 0 && metrics.tasks_pending == 0 && metrics.tasks_active == 0
}

/// Run the simulation synchronously, as fast as possible
fn run_headless(mut engine: SimEngine, cli: &Cli) -> Result<SimEngine> {
    info!("Running construction site simulation in headless mode...");
    info!(
        "Ticks: {}, Delta: {}s, Speed: {:.1}x",
        cli.ticks,
        engine.config().engine.tick_duration_secs,
        engine.speed()
    );

    if !cli.json {
        println!("Initial state:");
        engine.print_summary();
        engine.world().draw_map();
    }

    for command in demo_commands(&engine, cli.tasks) {
        if let Err(err) = engine.submit(command) {
            warn!("Demo task rejected: {}", err);
        }
    }
    engine.submit(Command::Start).context("Failed to start the engine")?;

    let scheduler = AutoScheduler::new();
    let ticks_per_second = (1.0 / engine.config().engine.tick_duration_secs).ceil().max(1.0) as u64;

    for tick in 1..=cli.ticks {
        engine.tick();

        // The planner works from snapshots and only re-enters through commands
        if tick % ticks_per_second == 0 && engine.metrics().tasks_pending > 0 {
            if let Some(snapshot) = engine.last_snapshot() {
                for command in scheduler.plan(&snapshot) {
                    if let Err(err) = engine.submit(command) {
                        warn!("Planner assignment rejected: {}", err);
                    }
                }
            }
        }

        if !cli.json && cli.print_every > 0 && tick % cli.print_every == 0 {
            println!("--- After tick {} ({:.1}s simulated time) ---", tick, engine.world().time);
            engine.print_summary();
        }

        if all_tasks_settled(engine.metrics()) {
            info!("All tasks settled after {} ticks", tick);
            break;
        }
    }

    Ok(engine)
}

/// Run the engine thread in wall-clock time with the planner attached
fn run_realtime(engine: SimEngine, cli: &Cli) -> Result<SimEngine> {
    let tick_interval = Duration::from_secs_f32(engine.config().engine.tick_duration_secs);
    let capacity = engine.config().engine.command_queue_capacity;
    let setup = demo_commands(&engine, cli.tasks);
    let max_ticks = cli.ticks;

    info!("Running construction site simulation in realtime mode...");
    let mut runner = SimRunner::spawn(engine, tick_interval, capacity);
    let handle = runner.handle();
    runner.attach_planner(AutoScheduler::new());

    for command in setup {
        if let Err(err) = handle.submit(command) {
            warn!("Demo task rejected: {}", err);
        }
    }
    handle.submit(Command::Start).context("Failed to start the engine")?;

    loop {
        std::thread::sleep(Duration::from_secs(1));
        let Some(snapshot) = handle.snapshot() else {
            break;
        };
        if snapshot.tick >= max_ticks || all_tasks_settled(&snapshot.metrics) {
            break;
        }
        if snapshot.metrics.tasks_pending > 0 {
            if let Err(err) = handle.submit(Command::RequestAutoSchedule) {
                warn!("Auto-schedule request rejected: {}", err);
            }
        }
    }

    match runner.shutdown() {
        Some(engine) => Ok(engine),
        None => bail!("Engine thread terminated unexpectedly"),
    }
}

fn log_summary(engine: &SimEngine) {
    let metrics = engine.metrics();
    info!("=== SIMULATION COMPLETE ===");
    info!("Ticks run: {}", engine.tick_count());
    info!("Simulated time: {:.2}s", engine.world().time);
    info!("Tasks created: {}", metrics.tasks_created);
    info!("Tasks completed: {}", metrics.tasks_completed);
    info!("Tasks failed: {}", metrics.tasks_failed);
    info!("Tasks cancelled: {}", metrics.tasks_cancelled);
    info!("Completion rate: {:.1}%", metrics.completion_rate * 100.0);
    info!("Average task duration: {:.2}s", metrics.average_task_duration);
    info!("Fleet utilization: {:.1}%", metrics.cumulative_utilization * 100.0);
    info!("Total distance: {:.1}", metrics.total_distance);
}
