//! Simulation engine: run status, command routing and the tick loop
//!
//! The engine is the single owner of the world. External code submits
//! commands and receives snapshots; nothing else mutates state. Each tick
//! runs these phases in order:
//!
//! 1. apply every command queued since the last tick, in arrival order
//! 2. advance robots and their tasks (only while RUNNING)
//! 3. recompute zone occupancy from object containment
//! 4. refresh metrics
//! 5. publish events, then the snapshot

use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::command::{Accepted, Command, CommandQueue, QueuedCommand};
use super::config::SimConfig;
use super::error::{AdmissionError, ConfigError};
use super::event::{EventLog, ObserverSet, SimEvent, SimObserver};
use super::metrics::SimMetrics;
use super::snapshot::WorldSnapshot;
use super::types::{ObjectId, ObjectStatus, ObstacleId, RobotId, RunStatus, TaskId};
use super::world::SimWorld;

/// Number of applied commands kept for inspection
const COMMAND_HISTORY: usize = 128;

pub struct SimEngine {
    config: SimConfig,
    world: SimWorld,
    status: RunStatus,
    speed: f32,
    tick: u64,
    queue: CommandQueue,
    observers: ObserverSet,
    metrics: SimMetrics,
    event_log: EventLog,
    last_snapshot: Option<Arc<WorldSnapshot>>,
}

impl SimEngine {
    /// Validate `config` and build a STOPPED engine around it
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let world = SimWorld::new(config.clone());
        let mut engine = Self {
            status: RunStatus::Stopped,
            speed: config.engine.speed,
            tick: 0,
            queue: CommandQueue::with_max_history(config.engine.command_queue_capacity, COMMAND_HISTORY),
            observers: ObserverSet::new(),
            metrics: SimMetrics::new(),
            event_log: EventLog::new(config.engine.event_history),
            last_snapshot: None,
            world,
            config,
        };
        engine.metrics.record(&engine.world.tally(), false);
        Ok(engine)
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Ticks advanced since the run started
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn recent_events(&self) -> &EventLog {
        &self.event_log
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.pending_count()
    }

    /// Applied commands with the tick they were applied at
    pub fn command_history(&self) -> &[(u64, Command)] {
        self.queue.history()
    }

    /// Snapshot published by the most recent tick
    pub fn last_snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.last_snapshot.clone()
    }

    /// Project the current state
    pub fn snapshot(&self) -> WorldSnapshot {
        self.world
            .snapshot(self.tick, self.status, self.speed, &self.metrics)
    }

    /// Register an observer. It immediately receives the current snapshot;
    /// an observer that fails on it is not registered.
    pub fn subscribe(&mut self, mut observer: Box<dyn SimObserver>) -> Option<usize> {
        let snapshot = self
            .last_snapshot
            .clone()
            .unwrap_or_else(|| Arc::new(self.snapshot()));
        match observer.on_snapshot(&snapshot) {
            Ok(()) => {
                let id = self.observers.add(observer);
                info!("Observer {} subscribed", id);
                Some(id)
            }
            Err(err) => {
                info!("Observer rejected on subscribe: {}", err);
                None
            }
        }
    }

    pub fn unsubscribe(&mut self, id: usize) -> bool {
        self.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Objects claimed by create-task commands that are still queued
    fn queued_reservations(&self) -> HashMap<ObjectId, TaskId> {
        let mut reserved = HashMap::new();
        for queued in self.queue.iter_pending() {
            match &queued.command {
                Command::CreateTask { object, .. } => {
                    if let Some(task) = queued.receipt.task() {
                        reserved.insert(*object, task);
                    }
                }
                Command::CreateTaskBulk { objects, .. } => {
                    reserved.extend(objects.iter().copied().zip(queued.receipt.tasks.iter().copied()));
                }
                _ => {}
            }
        }
        reserved
    }

    /// Validate a command against the current state and queue it for the
    /// next tick. On rejection nothing changes.
    pub fn submit(&mut self, command: Command) -> Result<Accepted, AdmissionError> {
        let result = self.admit(command);
        if let Err(err) = &result {
            debug!("Rejected command: {}", err);
        }
        result
    }

    fn admit(&mut self, mut command: Command) -> Result<Accepted, AdmissionError> {
        if self.queue.pending_count() >= self.queue.capacity() {
            return Err(AdmissionError::QueueFull {
                capacity: self.queue.capacity(),
            });
        }

        let reserved = self.queued_reservations();
        self.world.admit(&command, &reserved)?;

        let mut receipt = Accepted::default();
        match &mut command {
            Command::CreateTask { .. } => {
                receipt.tasks.push(TaskId(self.world.reserve_id()));
            }
            Command::CreateTaskBulk { objects, .. } => {
                let eligible = self.world.eligible_objects(objects, &reserved);
                if eligible.is_empty() {
                    return Err(AdmissionError::EmptyRequest);
                }
                receipt.tasks = eligible
                    .iter()
                    .map(|_| TaskId(self.world.reserve_id()))
                    .collect();
                *objects = eligible;
            }
            Command::SpawnObject { .. } => {
                receipt.object = Some(ObjectId(self.world.reserve_id()));
            }
            Command::SpawnRobot { .. } => {
                receipt.robot = Some(RobotId(self.world.reserve_id()));
            }
            Command::PlaceObstacle { .. } => {
                receipt.obstacle = Some(ObstacleId(self.world.reserve_id()));
            }
            _ => {}
        }

        self.queue.push(QueuedCommand {
            command,
            receipt: receipt.clone(),
        })?;
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick. Returns the snapshot when one was published.
    pub fn tick(&mut self) -> Option<Arc<WorldSnapshot>> {
        let mut events = Vec::new();

        // Phase 1: commands
        let applied = self.apply_commands(&mut events);

        // Phase 2: robots and tasks
        let advanced = self.status == RunStatus::Running;
        if advanced {
            let dt = self.config.engine.tick_duration_secs * self.speed;
            self.world.advance(dt, self.tick + 1);
        }

        // Phase 3: occupancy
        self.world.update_zone_contents();

        // Phase 4: metrics
        self.metrics.record(&self.world.tally(), advanced);
        if advanced {
            self.tick += 1;
        }

        events.extend(self.world.take_events());
        if !advanced && applied == 0 && events.is_empty() {
            return None;
        }

        // Phase 5: publication
        let snapshot = Arc::new(self.snapshot());
        for event in &events {
            self.event_log.push(event.clone());
        }
        let removed = self.observers.publish(&events, &snapshot);
        if removed > 0 {
            info!("{} observer(s) removed after publication errors", removed);
        }
        trace!(
            "Tick {} published: {} events, {} observers",
            self.tick,
            events.len(),
            self.observers.len()
        );
        self.last_snapshot = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Run `n` ticks
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    fn apply_commands(&mut self, events: &mut Vec<SimEvent>) -> usize {
        let drained = self.queue.drain(self.tick);
        let count = drained.len();
        let mut reset_seen = false;

        for QueuedCommand { command, receipt } in drained {
            if reset_seen {
                self.reject(&command, "world was reset", events);
                continue;
            }
            match &command {
                Command::Start => self.transition(RunStatus::Running, events),
                Command::Pause => {
                    if self.status == RunStatus::Running {
                        self.transition(RunStatus::Paused, events);
                    }
                }
                Command::Stop => {
                    if self.status != RunStatus::Stopped {
                        self.transition(RunStatus::Stopped, events);
                        self.tick = 0;
                        self.world.restart_clock();
                        self.metrics = SimMetrics::new();
                    }
                }
                Command::Reset => {
                    self.reset(events);
                    reset_seen = true;
                }
                Command::SetSpeed { multiplier } => {
                    if let Err(err) = self.world.admit(&command, &HashMap::new()) {
                        self.reject(&command, &err.to_string(), events);
                        continue;
                    }
                    self.speed = *multiplier;
                    info!("Speed set to {:.2}x", self.speed);
                    events.push(SimEvent::SpeedChanged {
                        tick: self.tick,
                        speed: self.speed,
                    });
                }
                Command::RequestAutoSchedule => {
                    debug!("Auto-schedule requested");
                    events.push(SimEvent::AutoScheduleRequested { tick: self.tick });
                }
                _ => {
                    if let Err(err) = self.world.apply(&command, &receipt, self.tick) {
                        self.reject(&command, &err.to_string(), events);
                    }
                }
            }
        }
        count
    }

    fn transition(&mut self, to: RunStatus, events: &mut Vec<SimEvent>) {
        let from = self.status;
        if from == to {
            return;
        }
        self.status = to;
        info!("Run status {:?} -> {:?}", from, to);
        events.push(SimEvent::RunStatusChanged {
            tick: self.tick,
            from,
            to,
        });
    }

    fn reset(&mut self, events: &mut Vec<SimEvent>) {
        self.transition(RunStatus::Stopped, events);
        self.world = SimWorld::new(self.config.clone());
        self.tick = 0;
        self.speed = self.config.engine.speed;
        self.metrics = SimMetrics::new();
        self.metrics.record(&self.world.tally(), false);
        // Logged events name entities of the discarded world
        self.event_log.clear();
        info!("World reset to configured defaults");
        events.push(SimEvent::WorldReset { tick: 0 });
    }

    fn reject(&mut self, command: &Command, reason: &str, events: &mut Vec<SimEvent>) {
        warn!("Dropped queued {} command: {}", command.name(), reason);
        events.push(SimEvent::CommandRejected {
            tick: self.tick,
            command: command.name().to_string(),
            reason: reason.to_string(),
        });
    }

    /// Print the world summary followed by headline metrics
    pub fn print_summary(&self) {
        self.world.print_summary();
        let m = &self.metrics;
        println!("--- Metrics ---");
        println!(
            "  tick={} status={:?} speed={:.1}x created={} completed={} failed={} cancelled={} pending={} active={}",
            self.tick,
            self.status,
            self.speed,
            m.tasks_created,
            m.tasks_completed,
            m.tasks_failed,
            m.tasks_cancelled,
            m.tasks_pending,
            m.tasks_active
        );
        println!(
            "  completion={:.0}% avg_duration={:.1}s utilization={:.0}% distance={:.1} picks={:.0}%",
            m.completion_rate * 100.0,
            m.average_task_duration,
            m.cumulative_utilization * 100.0,
            m.total_distance,
            m.pick_success_ratio * 100.0
        );
    }

    /// Objects that can currently get a task
    pub fn available_objects(&self) -> Vec<ObjectId> {
        self.world
            .objects
            .values()
            .filter(|object| object.status == ObjectStatus::Available)
            .filter(|object| self.world.task_for_object(object.id).is_none())
            .map(|object| object.id)
            .collect()
    }
}
