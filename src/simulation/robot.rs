//! Robot behavior for the construction site simulation
//!
//! Each tick a robot either works on the active step of its bound task,
//! drives to a charger, charges, or idles. Movement follows a cached A*
//! path that is only replanned when the step target changes or the obstacle
//! layout is rebuilt.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

use super::config::{GridConfig, RobotConfig, TaskConfig};
use super::error::StepFailure;
use super::event::SimEvent;
use super::grid::OccupancyGrid;
use super::pathfinder::{self, Path};
use super::site::{SimObject, SimZone};
use super::task::{RetryDecision, StepAdvance, StepKind, Task, TaskStep};
use super::types::{
    ObjectId, ObjectStatus, Pose, Position, RobotCategory, RobotId, RobotState, TaskId,
    ZoneCategory, ZoneId,
};

/// Everything a robot may read or touch during its update
pub struct RobotContext<'a> {
    /// Simulated seconds elapsed this tick (already scaled by the multiplier)
    pub dt: f32,
    /// Simulated time at the end of this tick
    pub now: f64,
    pub tick: u64,
    pub grid: &'a OccupancyGrid,
    pub grid_config: &'a GridConfig,
    pub robot_config: &'a RobotConfig,
    pub task_config: &'a TaskConfig,
    pub zones: &'a BTreeMap<ZoneId, SimZone>,
    pub tasks: &'a mut BTreeMap<TaskId, Task>,
    pub objects: &'a mut BTreeMap<ObjectId, SimObject>,
    pub events: &'a mut Vec<SimEvent>,
}

/// Result of running the active step for one tick
#[derive(Debug, Clone, PartialEq)]
enum StepOutcome {
    Running,
    Done,
    Failed(StepFailure),
}

/// A robot in the simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimRobot {
    pub id: RobotId,
    pub category: RobotCategory,
    pub pose: Pose,
    /// Percent in [0, 100]
    pub battery: f32,
    pub state: RobotState,
    pub held_object: Option<ObjectId>,
    pub task: Option<TaskId>,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub distance_traveled: f32,
    pub pick_attempts: u32,
    pub pick_successes: u32,
    /// Set by move-robot; the robot then ignores automatic behavior
    pub manual_control: bool,
    /// Charging zone the robot is heading to or docked at
    pub charging_zone: Option<ZoneId>,
    pub fault: Option<String>,
    #[serde(skip)]
    path: Option<Path>,
    #[serde(skip)]
    goal: Option<Position>,
    #[serde(skip)]
    reroutes: u32,
    #[serde(skip)]
    action_started: bool,
    #[serde(skip)]
    action_elapsed: f32,
    #[serde(skip)]
    low_battery_reported: bool,
    /// Set once the missing-charger warning has been logged
    #[serde(skip)]
    no_charger_reported: bool,
    /// Battery spent during the current update
    #[serde(skip)]
    consumed: f32,
}

impl SimRobot {
    pub fn new(id: RobotId, category: RobotCategory, pose: Pose, battery: f32) -> Self {
        Self {
            id,
            category,
            pose,
            battery: battery.clamp(0.0, 100.0),
            state: RobotState::Idle,
            held_object: None,
            task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            distance_traveled: 0.0,
            pick_attempts: 0,
            pick_successes: 0,
            manual_control: false,
            charging_zone: None,
            fault: None,
            path: None,
            goal: None,
            reroutes: 0,
            action_started: false,
            action_elapsed: 0.0,
            low_battery_reported: false,
            no_charger_reported: false,
            consumed: 0.0,
        }
    }

    pub fn position(&self) -> Position {
        self.pose.position
    }

    /// Share of pick attempts that ended with the object gripped
    pub fn pick_success_ratio(&self) -> f32 {
        if self.pick_attempts == 0 {
            1.0
        } else {
            self.pick_successes as f32 / self.pick_attempts as f32
        }
    }

    /// Waypoints still ahead of the robot
    pub fn remaining_waypoints(&self) -> &[Position] {
        self.path
            .as_ref()
            .map(|path| path.waypoints.as_slice())
            .unwrap_or(&[])
    }

    /// Busy robots count towards fleet utilization
    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the robot can be bound to a new task
    pub fn is_available(&self) -> bool {
        self.state == RobotState::Idle
            && self.task.is_none()
            && !self.manual_control
            && self.charging_zone.is_none()
    }

    /// Bind a task; the step driver picks it up on the next update
    pub fn bind_task(&mut self, task: TaskId) {
        self.task = Some(task);
        self.clear_motion();
    }

    /// Drop the current task without completing it. A held object is let go
    /// where the robot stands.
    pub fn abandon_task(&mut self, objects: &mut BTreeMap<ObjectId, SimObject>) {
        self.task = None;
        self.release_object(objects);
        self.clear_motion();
        if matches!(
            self.state,
            RobotState::Moving | RobotState::Picking | RobotState::Carrying | RobotState::Placing
        ) && self.charging_zone.is_none()
        {
            self.state = RobotState::Idle;
        }
    }

    /// Override the pose directly (manual control)
    pub fn teleport(&mut self, position: Position) {
        self.pose.position = position;
        self.manual_control = true;
        self.charging_zone = None;
        self.state = RobotState::Idle;
        self.clear_motion();
    }

    pub fn release_manual_control(&mut self) {
        self.manual_control = false;
        self.state = RobotState::Idle;
        self.clear_motion();
    }

    /// Put a faulted robot on a charger
    pub fn recover(&mut self, zone: ZoneId, dock: Position) {
        self.pose.position = dock;
        self.fault = None;
        self.manual_control = false;
        self.charging_zone = Some(zone);
        self.state = RobotState::Charging;
        self.clear_motion();
    }

    fn clear_motion(&mut self) {
        self.path = None;
        self.goal = None;
        self.reroutes = 0;
        self.action_started = false;
        self.action_elapsed = 0.0;
    }

    fn release_object(&mut self, objects: &mut BTreeMap<ObjectId, SimObject>) {
        if let Some(object_id) = self.held_object.take() {
            if let Some(object) = objects.get_mut(&object_id) {
                object.release(self.pose.position);
            }
        }
    }

    fn drain(&mut self, amount: f32) {
        if amount <= 0.0 {
            return;
        }
        let spent = amount.min(self.battery);
        self.battery -= spent;
        self.consumed += amount;
    }

    /// Drain multiplier for the object being carried
    fn load_factor(&self, objects: &BTreeMap<ObjectId, SimObject>) -> f32 {
        self.held_object
            .and_then(|id| objects.get(&id))
            .map(|object| 1.0 + 0.5 * object.weight_kg() / self.category.profile().payload_kg)
            .unwrap_or(1.0)
    }

    /// Advance the robot by one tick
    pub fn update(&mut self, ctx: &mut RobotContext<'_>) {
        self.consumed = 0.0;

        if self.state == RobotState::Error || self.manual_control {
            return;
        }

        if ctx.grid.is_occupied(&self.pose.position) {
            self.enter_fault(StepFailure::Obstructed, ctx);
            return;
        }

        if self.state == RobotState::Charging {
            self.charge(ctx);
            return;
        }

        if let Some(task_id) = self.task {
            self.work_on_task(task_id, ctx);
        } else if self.charging_zone.is_some() {
            self.drive_to_charger(ctx);
        } else if self.battery < ctx.robot_config.charge_threshold
            || self.battery <= ctx.robot_config.assignment_floor
        {
            // Too weak to be assigned work; recharge instead of waiting
            self.head_to_charger(ctx);
        }

        self.report_low_battery(ctx);

        if self.consumed > 0.0 && self.battery <= 0.0 {
            self.battery = 0.0;
            self.enter_fault(StepFailure::BatteryDepleted, ctx);
        }
    }

    fn report_low_battery(&mut self, ctx: &mut RobotContext<'_>) {
        if self.battery < ctx.robot_config.charge_threshold && !self.low_battery_reported {
            self.low_battery_reported = true;
            info!("{} battery low ({:.1}%)", self.id, self.battery);
            ctx.events.push(SimEvent::RobotLowBattery {
                tick: ctx.tick,
                robot: self.id,
                battery: self.battery,
            });
        }
    }

    /// Fatal condition: the bound task fails and the robot stops until recovered
    fn enter_fault(&mut self, failure: StepFailure, ctx: &mut RobotContext<'_>) {
        let reason = failure.to_string();
        warn!("{} fault: {}", self.id, reason);

        if let Some(task_id) = self.task.take() {
            if let Some(task) = ctx.tasks.get_mut(&task_id) {
                task.fail(&reason, ctx.now);
                ctx.events.push(SimEvent::TaskFailed {
                    tick: ctx.tick,
                    task: task_id,
                    robot: Some(self.id),
                    reason: reason.clone(),
                    retry_count: task.retry_count,
                });
            }
            self.tasks_failed += 1;
        }

        self.release_object(ctx.objects);
        self.clear_motion();
        self.charging_zone = None;
        self.state = RobotState::Error;
        self.fault = Some(reason.clone());
        ctx.events.push(SimEvent::RobotFault {
            tick: ctx.tick,
            robot: self.id,
            reason,
        });
    }

    fn work_on_task(&mut self, task_id: TaskId, ctx: &mut RobotContext<'_>) {
        let (step, object_id) = {
            let Some(task) = ctx.tasks.get_mut(&task_id) else {
                self.abandon_task(ctx.objects);
                return;
            };
            if task.status.is_terminal() {
                self.abandon_task(ctx.objects);
                return;
            }
            task.start(ctx.now);

            if task.backoff_remaining > 0.0 {
                task.backoff_remaining = (task.backoff_remaining - ctx.dt).max(0.0);
                return;
            }

            match task.current() {
                Some(step) => (*step, task.object),
                None => {
                    self.abandon_task(ctx.objects);
                    return;
                }
            }
        };

        let outcome = match step.kind {
            StepKind::MoveToPickup | StepKind::MoveToDrop => self.step_move(&step, ctx),
            StepKind::Picking => self.step_pick(object_id, &step, ctx),
            StepKind::Placing => self.step_place(object_id, &step, ctx),
        };

        match outcome {
            StepOutcome::Running => {}
            StepOutcome::Done => self.finish_step(task_id, ctx),
            StepOutcome::Failed(failure) => self.fail_step(task_id, failure, ctx),
        }
    }

    fn step_move(&mut self, step: &TaskStep, ctx: &mut RobotContext<'_>) -> StepOutcome {
        self.state = RobotState::Moving;
        match self.drive_to(step.target, ctx) {
            Ok(true) => StepOutcome::Done,
            Ok(false) => StepOutcome::Running,
            Err(failure) => StepOutcome::Failed(failure),
        }
    }

    fn step_pick(&mut self, object_id: ObjectId, step: &TaskStep, ctx: &mut RobotContext<'_>) -> StepOutcome {
        if !self.action_started {
            self.pick_attempts += 1;
            let Some(object) = ctx.objects.get(&object_id) else {
                return StepOutcome::Failed(StepFailure::ObjectUnavailable {
                    object: object_id,
                    status: ObjectStatus::Placed,
                });
            };
            if object.status != ObjectStatus::Available || object.holder.is_some() {
                return StepOutcome::Failed(StepFailure::ObjectUnavailable {
                    object: object_id,
                    status: object.status,
                });
            }
            let distance = object.position.distance(&self.pose.position);
            if distance > ctx.robot_config.pick_reach {
                return StepOutcome::Failed(StepFailure::ObjectOutOfReach {
                    object: object_id,
                    distance,
                });
            }
            self.action_started = true;
            self.action_elapsed = 0.0;
        }

        self.state = RobotState::Picking;
        if !self.run_action(step.duration_secs, ctx) {
            return StepOutcome::Running;
        }

        if let Some(object) = ctx.objects.get_mut(&object_id) {
            object.pick(self.id);
        }
        self.held_object = Some(object_id);
        self.pick_successes += 1;
        self.state = RobotState::Carrying;
        StepOutcome::Done
    }

    fn step_place(&mut self, object_id: ObjectId, step: &TaskStep, ctx: &mut RobotContext<'_>) -> StepOutcome {
        if !self.action_started {
            if self.held_object != Some(object_id) {
                let status = ctx
                    .objects
                    .get(&object_id)
                    .map(|object| object.status)
                    .unwrap_or(ObjectStatus::Placed);
                return StepOutcome::Failed(StepFailure::ObjectUnavailable {
                    object: object_id,
                    status,
                });
            }
            self.action_started = true;
            self.action_elapsed = 0.0;
        }

        self.state = RobotState::Placing;
        if !self.run_action(step.duration_secs, ctx) {
            return StepOutcome::Running;
        }

        if let Some(object) = ctx.objects.get_mut(&object_id) {
            object.place(self.pose.position);
        }
        self.held_object = None;
        StepOutcome::Done
    }

    /// Run a timed gripper action; true once the duration has elapsed
    fn run_action(&mut self, duration_secs: f32, ctx: &mut RobotContext<'_>) -> bool {
        let remaining = (duration_secs - self.action_elapsed).max(0.0);
        let spent = ctx.dt.min(remaining);
        self.action_elapsed += ctx.dt;
        self.drain(spent * self.category.profile().action_drain_per_sec);
        self.action_elapsed + f32::EPSILON >= duration_secs
    }

    fn finish_step(&mut self, task_id: TaskId, ctx: &mut RobotContext<'_>) {
        self.clear_motion();

        let Some(task) = ctx.tasks.get_mut(&task_id) else {
            return;
        };
        match task.advance(ctx.now) {
            StepAdvance::Finished => {
                let duration_secs = task.duration().unwrap_or(0.0);
                info!("{} completed {} in {:.1}s", self.id, task_id, duration_secs);
                ctx.events.push(SimEvent::TaskCompleted {
                    tick: ctx.tick,
                    task: task_id,
                    robot: self.id,
                    duration_secs,
                });
                self.task = None;
                self.tasks_completed += 1;
                self.state = RobotState::Idle;
            }
            StepAdvance::Next => self.interrupt_if_low(task_id, ctx),
        }
    }

    fn fail_step(&mut self, task_id: TaskId, failure: StepFailure, ctx: &mut RobotContext<'_>) {
        self.clear_motion();
        let reason = failure.to_string();

        let Some(task) = ctx.tasks.get_mut(&task_id) else {
            return;
        };
        match task.record_failure(&reason, ctx.task_config.retry_backoff_secs, ctx.now) {
            RetryDecision::Retry { backoff_secs } => {
                debug!(
                    "{} step {:?} of {} failed ({}), retry {}/{} in {:.2}s",
                    self.id,
                    task.current().map(|step| step.kind),
                    task_id,
                    reason,
                    task.retry_count,
                    task.max_retries,
                    backoff_secs
                );
                self.interrupt_if_low(task_id, ctx);
            }
            RetryDecision::Exhausted => {
                warn!("{} failed after {} attempts: {}", task_id, task.retry_count, reason);
                ctx.events.push(SimEvent::TaskFailed {
                    tick: ctx.tick,
                    task: task_id,
                    robot: Some(self.id),
                    reason,
                    retry_count: task.retry_count,
                });
                self.task = None;
                self.tasks_failed += 1;
                self.release_object(ctx.objects);
                self.state = RobotState::Idle;
            }
        }
    }

    /// At a step boundary, a robot below the charging threshold that is not
    /// holding anything gives up its task and goes charging
    fn interrupt_if_low(&mut self, task_id: TaskId, ctx: &mut RobotContext<'_>) {
        if self.battery >= ctx.robot_config.charge_threshold || self.held_object.is_some() {
            return;
        }
        let Some(task) = ctx.tasks.get_mut(&task_id) else {
            return;
        };

        self.task = None;
        if task.requeue(ctx.task_config.charging_policy, ctx.now) {
            info!(
                "{} requeued at step {} while {} recharges",
                task_id, task.current_step, self.id
            );
            ctx.events.push(SimEvent::TaskRequeued {
                tick: ctx.tick,
                task: task_id,
                robot: self.id,
                resume_step: task.current_step,
            });
        } else {
            warn!("{} failed: robot {} needs charging", task_id, self.id);
            ctx.events.push(SimEvent::TaskFailed {
                tick: ctx.tick,
                task: task_id,
                robot: Some(self.id),
                reason: task
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| StepFailure::LowBattery.to_string()),
                retry_count: task.retry_count,
            });
            self.tasks_failed += 1;
        }
        self.state = RobotState::Idle;
        self.head_to_charger(ctx);
    }

    /// Pick the nearest charging zone and start driving there
    fn head_to_charger(&mut self, ctx: &mut RobotContext<'_>) {
        let here = self.pose.position;
        let zones = ctx.zones;
        let nearest = zones
            .values()
            .filter(|zone| zone.category == ZoneCategory::Charging)
            .min_by(|a, b| {
                a.bounds
                    .distance_to(&here)
                    .total_cmp(&b.bounds.distance_to(&here))
            });

        match nearest {
            Some(zone) => {
                debug!("{} heading to charger {}", self.id, zone.id);
                self.charging_zone = Some(zone.id);
                self.no_charger_reported = false;
                self.clear_motion();
            }
            None => {
                if !self.no_charger_reported {
                    self.no_charger_reported = true;
                    warn!("{} needs charging but no charging zone exists", self.id);
                }
            }
        }
    }

    fn drive_to_charger(&mut self, ctx: &mut RobotContext<'_>) {
        let zones = ctx.zones;
        let Some(zone) = self.charging_zone.and_then(|id| zones.get(&id)) else {
            self.charging_zone = None;
            return;
        };
        let dock = dock_position(zone, self.id, ctx.grid);

        self.state = RobotState::Moving;
        match self.drive_to(dock, ctx) {
            Ok(true) => {
                debug!("{} docked at {}", self.id, zone.id);
                self.clear_motion();
                self.state = RobotState::Charging;
            }
            Ok(false) => {}
            Err(failure) => self.enter_fault(failure, ctx),
        }
    }

    fn charge(&mut self, ctx: &mut RobotContext<'_>) {
        self.battery = (self.battery + ctx.robot_config.charge_rate * ctx.dt).min(100.0);
        if self.battery >= 100.0 {
            info!("{} fully charged", self.id);
            self.state = RobotState::Idle;
            self.charging_zone = None;
            self.low_battery_reported = false;
            ctx.events.push(SimEvent::RobotCharged {
                tick: ctx.tick,
                robot: self.id,
            });
        }
    }

    /// Follow (and if needed plan) a path to `target`. Returns Ok(true) on
    /// arrival.
    fn drive_to(&mut self, target: Position, ctx: &mut RobotContext<'_>) -> Result<bool, StepFailure> {
        let stale = match (&self.path, self.goal) {
            (Some(path), Some(goal)) if goal == target => path.grid_version != ctx.grid.version(),
            _ => {
                self.path = None;
                false
            }
        };

        if stale {
            self.reroutes += 1;
            debug!("{} rerouting (attempt {})", self.id, self.reroutes);
            ctx.events.push(SimEvent::RobotRerouted {
                tick: ctx.tick,
                robot: self.id,
                attempt: self.reroutes,
            });
            if self.reroutes > ctx.robot_config.max_reroutes {
                return Err(StepFailure::RerouteLimit(ctx.robot_config.max_reroutes));
            }
            self.path = None;
        }

        if self.path.is_none() {
            let path = pathfinder::find_path(
                self.pose.position,
                target,
                ctx.grid,
                ctx.grid_config.max_expansions,
            )?;
            self.path = Some(path);
            self.goal = Some(target);
        }

        let budget = self.category.profile().speed * ctx.dt;
        let (moved, arrived) = self.follow_path(budget, ctx.grid_config.waypoint_epsilon);

        self.distance_traveled += moved;
        let drain = moved * self.category.profile().drain_per_unit * self.load_factor(ctx.objects);
        self.drain(drain);

        if let Some(object_id) = self.held_object {
            if let Some(object) = ctx.objects.get_mut(&object_id) {
                object.carry(self.pose.position);
            }
        }

        if arrived {
            self.path = None;
            self.goal = None;
        }
        Ok(arrived)
    }

    /// Move at most `budget` units along the cached path, snapping onto
    /// waypoints within `epsilon`. Returns (distance moved, arrived).
    fn follow_path(&mut self, budget: f32, epsilon: f32) -> (f32, bool) {
        let Some(path) = self.path.as_mut() else {
            return (0.0, true);
        };

        let mut remaining = budget;
        let mut moved = 0.0;
        while let Some(&next) = path.waypoints.first() {
            let here = self.pose.position;
            let distance = here.distance(&next);
            if distance > 0.0 {
                self.pose.heading = here.angle_to(&next);
            }
            if distance <= remaining + epsilon {
                self.pose.position = next;
                moved += distance;
                remaining = (remaining - distance).max(0.0);
                path.waypoints.remove(0);
                if remaining <= 0.0 {
                    break;
                }
            } else {
                self.pose.position = here.offset(self.pose.heading, remaining);
                moved += remaining;
                break;
            }
        }

        (moved, path.waypoints.is_empty())
    }
}

/// Spread robots over the slots of a charging zone
pub fn dock_position(zone: &SimZone, robot: RobotId, grid: &OccupancyGrid) -> Position {
    let slots = zone.slots(grid);
    if slots.is_empty() {
        zone.bounds.center()
    } else {
        slots[(robot.0).0 % slots.len()]
    }
}
