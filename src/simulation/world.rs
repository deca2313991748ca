//! The site world: every robot, object, zone, obstacle and task
//!
//! `SimWorld` is owned by the engine and never shared. It validates and
//! applies entity commands, advances robots by one tick, and projects
//! itself into snapshots.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::command::{Accepted, Command};
use super::config::SimConfig;
use super::error::AdmissionError;
use super::event::SimEvent;
use super::grid::OccupancyGrid;
use super::metrics::{SimMetrics, TickTally};
use super::robot::{dock_position, RobotContext, SimRobot};
use super::sensors;
use super::site::{SimObject, SimObstacle, SimZone};
use super::snapshot::{RobotView, WorldSnapshot, ZoneView};
use super::task::{plan_steps, StepPlan, Task, TaskKind, TaskPriority, TaskStatus};
use super::types::{
    MaterialType, ObjectId, ObjectStatus, ObstacleId, Pose, Position, Rect, RobotId,
    RobotState, RunStatus, SimId, TaskId, ZoneCategory, ZoneId, MAX_SPEED, MIN_SPEED,
};

/// Two points closer than this occupy the same drop slot
const SLOT_RADIUS: f32 = 0.5;

/// The site simulation world
pub struct SimWorld {
    pub config: SimConfig,

    /// Occupancy grid rebuilt whenever the obstacle set changes
    pub grid: OccupancyGrid,

    pub robots: BTreeMap<RobotId, SimRobot>,
    pub objects: BTreeMap<ObjectId, SimObject>,
    pub zones: BTreeMap<ZoneId, SimZone>,
    pub tasks: BTreeMap<TaskId, Task>,
    /// Kept in id order; sensors take them as a slice
    pub obstacles: Vec<SimObstacle>,

    /// Next ID to assign
    next_id: usize,

    /// Simulated seconds since the run started
    pub time: f64,

    /// Optional seeded RNG for reproducible object placement
    rng: Option<StdRng>,

    /// Events raised since the engine last collected them
    events: Vec<SimEvent>,
}

impl SimWorld {
    /// Build the world described by `config`. The configuration is assumed
    /// to be validated.
    pub fn new(config: SimConfig) -> Self {
        let rng = config.engine.seed.map(StdRng::seed_from_u64);
        let grid = OccupancyGrid::build(
            config.layout.width,
            config.layout.height,
            config.grid.cell_size,
            config.layout.obstacles.iter().map(|spec| &spec.bounds),
            0,
        );

        let mut world = Self {
            grid,
            robots: BTreeMap::new(),
            objects: BTreeMap::new(),
            zones: BTreeMap::new(),
            tasks: BTreeMap::new(),
            obstacles: Vec::new(),
            next_id: 0,
            time: 0.0,
            rng,
            events: Vec::new(),
            config,
        };

        let layout = world.config.layout.clone();
        for spec in layout.zones {
            let id = ZoneId(world.next_sim_id());
            let zone = SimZone::new(id, spec.name, spec.category, spec.bounds, spec.capacity, spec.color);
            world.zones.insert(id, zone);
        }
        for spec in layout.obstacles {
            let id = ObstacleId(world.next_sim_id());
            world.obstacles.push(SimObstacle {
                id,
                label: spec.label,
                bounds: spec.bounds,
            });
        }
        for spec in layout.robots {
            let id = RobotId(world.next_sim_id());
            let robot = SimRobot::new(id, spec.category, Pose::new(spec.x, spec.y, spec.heading), spec.battery);
            world.robots.insert(id, robot);
        }
        for spec in layout.objects {
            let id = ObjectId(world.next_sim_id());
            world
                .objects
                .insert(id, SimObject::new(id, spec.material, Position::new(spec.x, spec.y)));
        }

        world.update_zone_contents();
        world
    }

    /// Default construction site with a fixed seed
    pub fn create_test_world() -> Self {
        Self::create_test_world_with_seed(42)
    }

    pub fn create_test_world_with_seed(seed: u64) -> Self {
        let mut config = SimConfig::default();
        config.engine.seed = Some(seed);
        Self::new(config)
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Reserve an id for an entity that a queued command will create
    pub fn reserve_id(&mut self) -> SimId {
        self.next_sim_id()
    }

    /// Choose a random element from a slice, using seeded RNG if available
    fn choose_random<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        match &mut self.rng {
            Some(rng) => slice.choose(rng),
            None => slice.choose(&mut rand::rng()),
        }
    }

    fn random_range(&mut self, range: std::ops::Range<f32>) -> f32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// Events raised since the last call
    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn bounds(&self) -> Rect {
        self.config.layout.bounds()
    }

    /// Set the clock back to zero. Open tasks keep their elapsed time so
    /// their durations stay on one clock.
    pub fn restart_clock(&mut self) {
        let elapsed = self.time;
        for task in self.tasks.values_mut().filter(|task| task.is_active()) {
            task.shift_clock(elapsed);
        }
        self.time = 0.0;
    }

    pub fn layout_version(&self) -> u64 {
        self.grid.version()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Active task currently targeting `object`
    pub fn task_for_object(&self, object: ObjectId) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|task| task.object == object && task.is_active())
            .map(|task| task.id)
    }

    pub fn charging_zones(&self) -> impl Iterator<Item = &SimZone> {
        self.zones
            .values()
            .filter(|zone| zone.category == ZoneCategory::Charging)
    }

    fn nearest_charger(&self, point: &Position) -> Option<&SimZone> {
        self.charging_zones().min_by(|a, b| {
            a.bounds
                .distance_to(point)
                .total_cmp(&b.bounds.distance_to(point))
        })
    }

    /// Whether `robot` may take a task for `object`
    pub fn check_robot_for(&self, robot: RobotId, object: ObjectId) -> Result<(), AdmissionError> {
        let sim_robot = self
            .robots
            .get(&robot)
            .ok_or(AdmissionError::UnknownRobot(robot))?;
        if sim_robot.manual_control {
            return Err(AdmissionError::RobotManual { robot });
        }
        if !sim_robot.is_available() {
            return Err(AdmissionError::RobotBusy {
                robot,
                state: sim_robot.state,
            });
        }
        let floor = self.config.robots.assignment_floor;
        if sim_robot.battery <= floor {
            return Err(AdmissionError::BatteryTooLow {
                robot,
                battery: sim_robot.battery,
                floor,
            });
        }
        let sim_object = self
            .objects
            .get(&object)
            .ok_or(AdmissionError::UnknownObject(object))?;
        let capacity_kg = sim_robot.category.profile().payload_kg;
        if sim_object.weight_kg() > capacity_kg {
            return Err(AdmissionError::PayloadExceeded {
                robot,
                object,
                weight_kg: sim_object.weight_kg(),
                capacity_kg,
            });
        }
        Ok(())
    }

    /// Nearest robot that could take a task for `object`
    pub fn nearest_eligible_robot(&self, object: ObjectId) -> Option<RobotId> {
        let target = self.objects.get(&object)?.position;
        self.robots
            .values()
            .filter(|robot| self.check_robot_for(robot.id, object).is_ok())
            .min_by(|a, b| {
                a.position()
                    .distance(&target)
                    .total_cmp(&b.position().distance(&target))
            })
            .map(|robot| robot.id)
    }

    fn check_object_for_task(
        &self,
        object: ObjectId,
        reserved: &HashMap<ObjectId, TaskId>,
    ) -> Result<(), AdmissionError> {
        let sim_object = self
            .objects
            .get(&object)
            .ok_or(AdmissionError::UnknownObject(object))?;
        if sim_object.status != ObjectStatus::Available {
            return Err(AdmissionError::ObjectUnavailable {
                object,
                status: sim_object.status,
            });
        }
        if let Some(task) = self.task_for_object(object) {
            return Err(AdmissionError::ObjectReserved { object, task });
        }
        if let Some(task) = reserved.get(&object) {
            return Err(AdmissionError::ObjectReserved { object, task: *task });
        }
        Ok(())
    }

    fn check_free_position(&self, x: f32, y: f32) -> Result<Position, AdmissionError> {
        let position = Position::new(x, y);
        if !self.bounds().contains(&position) {
            return Err(AdmissionError::OutOfBounds { x, y });
        }
        if self.grid.is_occupied(&position) {
            return Err(AdmissionError::PositionBlocked { x, y });
        }
        Ok(position)
    }

    fn check_manual_control(&self, robot: RobotId) -> Result<&SimRobot, AdmissionError> {
        let sim_robot = self
            .robots
            .get(&robot)
            .ok_or(AdmissionError::UnknownRobot(robot))?;
        if !sim_robot.manual_control && !sim_robot.is_available() {
            return Err(AdmissionError::RobotBusy {
                robot,
                state: sim_robot.state,
            });
        }
        Ok(sim_robot)
    }

    /// Objects of a bulk request that can get a task
    pub fn eligible_objects(&self, objects: &[ObjectId], reserved: &HashMap<ObjectId, TaskId>) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        objects
            .iter()
            .copied()
            .filter(|object| seen.insert(*object))
            .filter(|object| self.check_object_for_task(*object, reserved).is_ok())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Check an entity command against the current state without changing
    /// anything. `reserved` maps objects claimed by commands still queued to
    /// the task ids reserved for them.
    pub fn admit(&self, command: &Command, reserved: &HashMap<ObjectId, TaskId>) -> Result<(), AdmissionError> {
        match command {
            Command::Start | Command::Pause | Command::Stop | Command::Reset => Ok(()),
            Command::RequestAutoSchedule => Ok(()),
            Command::SetSpeed { multiplier } => {
                if (MIN_SPEED..=MAX_SPEED).contains(multiplier) {
                    Ok(())
                } else {
                    Err(AdmissionError::InvalidSpeed(*multiplier))
                }
            }
            Command::CreateTask {
                object, zone, robot, ..
            } => {
                if !self.zones.contains_key(zone) {
                    return Err(AdmissionError::UnknownZone(*zone));
                }
                self.check_object_for_task(*object, reserved)?;
                if let Some(robot) = robot {
                    self.check_robot_for(*robot, *object)?;
                }
                Ok(())
            }
            Command::CreateTaskBulk { objects, zone, .. } => {
                if !self.zones.contains_key(zone) {
                    return Err(AdmissionError::UnknownZone(*zone));
                }
                if objects.is_empty() {
                    return Err(AdmissionError::EmptyRequest);
                }
                Ok(())
            }
            Command::CancelTask { task } => {
                let sim_task = self
                    .tasks
                    .get(task)
                    .ok_or(AdmissionError::UnknownTask(*task))?;
                if sim_task.status.is_terminal() {
                    return Err(AdmissionError::TaskTerminal {
                        task: *task,
                        status: sim_task.status,
                    });
                }
                Ok(())
            }
            Command::AssignTask { task, robot } => {
                let sim_task = self
                    .tasks
                    .get(task)
                    .ok_or(AdmissionError::UnknownTask(*task))?;
                if sim_task.status != TaskStatus::Pending {
                    return Err(AdmissionError::TaskNotPending {
                        task: *task,
                        status: sim_task.status,
                    });
                }
                self.check_robot_for(*robot, sim_task.object)
            }
            Command::MoveRobot { robot, x, y } => {
                self.check_manual_control(*robot)?;
                self.check_free_position(*x, *y).map(|_| ())
            }
            Command::StopRobot { robot } => self.check_manual_control(*robot).map(|_| ()),
            Command::SpawnObject { zone, .. } => {
                if self.zones.contains_key(zone) {
                    Ok(())
                } else {
                    Err(AdmissionError::UnknownZone(*zone))
                }
            }
            Command::SpawnRobot { x, y, .. } => self.check_free_position(*x, *y).map(|_| ()),
            Command::RecoverRobot { robot } => {
                let sim_robot = self
                    .robots
                    .get(robot)
                    .ok_or(AdmissionError::UnknownRobot(*robot))?;
                if sim_robot.state != RobotState::Error {
                    return Err(AdmissionError::RobotNotFaulted { robot: *robot });
                }
                if self.charging_zones().next().is_none() {
                    return Err(AdmissionError::NoChargingZone);
                }
                Ok(())
            }
            Command::PlaceObstacle { bounds, .. } => {
                let workspace = self.bounds();
                for corner in [
                    Position::new(bounds.min_x, bounds.min_y),
                    Position::new(bounds.max_x, bounds.max_y),
                ] {
                    if !workspace.contains(&corner) {
                        return Err(AdmissionError::OutOfBounds {
                            x: corner.x,
                            y: corner.y,
                        });
                    }
                }
                Ok(())
            }
            Command::ClearObstacle { obstacle } => {
                if self.obstacles.iter().any(|o| o.id == *obstacle) {
                    Ok(())
                } else {
                    Err(AdmissionError::UnknownObstacle(*obstacle))
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command application
    // -----------------------------------------------------------------------

    /// Re-validate and apply an entity command at the tick boundary
    pub fn apply(&mut self, command: &Command, receipt: &Accepted, tick: u64) -> Result<(), AdmissionError> {
        self.admit(command, &HashMap::new())?;

        match command {
            Command::CreateTask {
                object,
                zone,
                robot,
                kind,
                priority,
            } => {
                let id = receipt.task().unwrap_or_else(|| TaskId(self.next_sim_id()));
                let robot = robot.or_else(|| self.nearest_eligible_robot(*object));
                self.create_task(id, *object, *zone, robot, *kind, *priority, tick);
            }
            Command::CreateTaskBulk {
                objects,
                zone,
                auto_assign,
                kind,
                priority,
            } => {
                let mut created = 0;
                for (index, object) in objects.iter().enumerate() {
                    if let Err(err) = self.check_object_for_task(*object, &HashMap::new()) {
                        debug!("Skipping {} in bulk request: {}", object, err);
                        continue;
                    }
                    let id = receipt
                        .tasks
                        .get(index)
                        .copied()
                        .unwrap_or_else(|| TaskId(self.next_sim_id()));
                    let robot = if *auto_assign {
                        self.nearest_eligible_robot(*object)
                    } else {
                        None
                    };
                    self.create_task(id, *object, *zone, robot, *kind, *priority, tick);
                    created += 1;
                }
                info!("Bulk request created {} of {} tasks", created, objects.len());
            }
            Command::CancelTask { task } => self.cancel_task(*task, tick),
            Command::AssignTask { task, robot } => self.assign_task(*task, *robot, tick),
            Command::MoveRobot { robot, x, y } => {
                if let Some(sim_robot) = self.robots.get_mut(robot) {
                    sim_robot.teleport(Position::new(*x, *y));
                    info!("{} moved manually to ({:.2}, {:.2})", robot, x, y);
                }
            }
            Command::StopRobot { robot } => {
                if let Some(sim_robot) = self.robots.get_mut(robot) {
                    sim_robot.release_manual_control();
                    info!("{} released from manual control", robot);
                }
            }
            Command::SpawnObject { material, zone } => {
                let id = receipt.object.unwrap_or_else(|| ObjectId(self.next_sim_id()));
                self.spawn_object(id, *material, *zone, tick);
            }
            Command::SpawnRobot { category, x, y } => {
                let id = receipt.robot.unwrap_or_else(|| RobotId(self.next_sim_id()));
                self.robots
                    .insert(id, SimRobot::new(id, *category, Pose::new(*x, *y, 0.0), 100.0));
                info!("Spawned {:?} robot {} at ({:.2}, {:.2})", category, id, x, y);
                self.events.push(SimEvent::RobotSpawned {
                    tick,
                    robot: id,
                    category: *category,
                });
            }
            Command::RecoverRobot { robot } => self.recover_robot(*robot, tick),
            Command::PlaceObstacle { label, bounds } => {
                let id = receipt.obstacle.unwrap_or_else(|| ObstacleId(self.next_sim_id()));
                self.obstacles.push(SimObstacle {
                    id,
                    label: label.clone(),
                    bounds: *bounds,
                });
                self.obstacles.sort_by_key(|obstacle| obstacle.id);
                info!("Placed obstacle {} '{}'", id, label);
                self.rebuild_grid(tick);
            }
            Command::ClearObstacle { obstacle } => {
                self.obstacles.retain(|o| o.id != *obstacle);
                info!("Cleared obstacle {}", obstacle);
                self.rebuild_grid(tick);
            }
            Command::Start
            | Command::Pause
            | Command::Stop
            | Command::Reset
            | Command::SetSpeed { .. }
            | Command::RequestAutoSchedule => {}
        }
        Ok(())
    }

    /// Drop point for a new task in `zone`
    fn drop_target(&self, kind: TaskKind, zone: &SimZone) -> Position {
        match kind {
            TaskKind::Transport | TaskKind::Inspect => zone.bounds.center(),
            TaskKind::PickAndPlace | TaskKind::Sort | TaskKind::Assemble => {
                let reserved: Vec<Position> = self
                    .tasks
                    .values()
                    .filter(|task| task.zone == zone.id && task.is_active())
                    .filter_map(Task::drop_target)
                    .collect();
                let resting: Vec<Position> = zone
                    .contents
                    .iter()
                    .filter_map(|id| self.objects.get(id))
                    .map(|object| object.position)
                    .collect();
                zone.slots(&self.grid)
                    .into_iter()
                    .find(|slot| {
                        reserved
                            .iter()
                            .chain(resting.iter())
                            .all(|p| p.distance(slot) >= SLOT_RADIUS)
                    })
                    .unwrap_or_else(|| zone.bounds.center())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_task(
        &mut self,
        id: TaskId,
        object: ObjectId,
        zone: ZoneId,
        robot: Option<RobotId>,
        kind: TaskKind,
        priority: TaskPriority,
        tick: u64,
    ) {
        let (Some(sim_object), Some(sim_zone)) = (self.objects.get(&object), self.zones.get(&zone)) else {
            return;
        };
        let plan = StepPlan {
            pickup: sim_object.position,
            drop: self.drop_target(kind, sim_zone),
            pick_duration_secs: self.config.robots.pick_duration_secs,
            place_duration_secs: self.config.robots.place_duration_secs,
        };
        let steps = plan_steps(kind, &plan);
        let task = Task::new(id, kind, priority, object, zone, steps, self.config.tasks.max_retries, self.time);
        self.tasks.insert(id, task);

        info!("Created {:?} task {} for {} -> {}", kind, id, object, sim_zone.name);
        self.events.push(SimEvent::TaskCreated {
            tick,
            task: id,
            kind,
            object,
            zone,
            robot,
        });

        if let Some(robot) = robot {
            self.assign_task(id, robot, tick);
        }
    }

    fn assign_task(&mut self, task: TaskId, robot: RobotId, tick: u64) {
        let (Some(sim_task), Some(sim_robot)) = (self.tasks.get_mut(&task), self.robots.get_mut(&robot)) else {
            return;
        };
        sim_task.assign(robot);
        sim_robot.bind_task(task);
        info!("Assigned {} to {}", task, robot);
        self.events.push(SimEvent::TaskAssigned { tick, task, robot });
    }

    fn cancel_task(&mut self, task: TaskId, tick: u64) {
        let Some(sim_task) = self.tasks.get_mut(&task) else {
            return;
        };
        let robot = sim_task.robot;
        sim_task.cancel(self.time);
        if let Some(sim_robot) = robot.and_then(|id| self.robots.get_mut(&id)) {
            sim_robot.abandon_task(&mut self.objects);
        }
        warn!("Cancelled {}", task);
        self.events.push(SimEvent::TaskCancelled { tick, task });
    }

    fn spawn_object(&mut self, id: ObjectId, material: MaterialType, zone: ZoneId, tick: u64) {
        let Some(sim_zone) = self.zones.get(&zone) else {
            return;
        };
        let free: Vec<Position> = sim_zone
            .slots(&self.grid)
            .into_iter()
            .filter(|slot| {
                !self
                    .objects
                    .values()
                    .any(|object| object.position.distance(slot) < SLOT_RADIUS)
            })
            .collect();
        let center = sim_zone.bounds.center();
        let position = match self.choose_random(&free) {
            Some(slot) => *slot,
            None => {
                // Full zone: scatter around the centre
                let jitter = SLOT_RADIUS * 0.5;
                Position::new(
                    center.x + self.random_range(-jitter..jitter),
                    center.y + self.random_range(-jitter..jitter),
                )
            }
        };

        self.objects.insert(id, SimObject::new(id, material, position));
        info!("Spawned {:?} {} in zone {}", material, id, zone);
        self.events.push(SimEvent::ObjectSpawned {
            tick,
            object: id,
            material,
            zone,
        });
    }

    fn recover_robot(&mut self, robot: RobotId, tick: u64) {
        let Some(position) = self.robots.get(&robot).map(SimRobot::position) else {
            return;
        };
        let Some(zone) = self.nearest_charger(&position) else {
            return;
        };
        let (zone_id, dock) = (zone.id, dock_position(zone, robot, &self.grid));
        if let Some(sim_robot) = self.robots.get_mut(&robot) {
            sim_robot.recover(zone_id, dock);
            info!("{} recovered and docked at {}", robot, zone_id);
            self.events.push(SimEvent::RobotRecovered { tick, robot });
        }
    }

    fn rebuild_grid(&mut self, tick: u64) {
        let version = self.grid.version() + 1;
        self.grid = OccupancyGrid::build(
            self.config.layout.width,
            self.config.layout.height,
            self.config.grid.cell_size,
            self.obstacles.iter().map(|obstacle| &obstacle.bounds),
            version,
        );
        info!("Layout changed (version {}, {} blocked cells)", version, self.grid.blocked_count());
        self.events.push(SimEvent::LayoutChanged { tick, version });
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance every robot and its task by `dt` simulated seconds
    pub fn advance(&mut self, dt: f32, tick: u64) {
        self.time += dt as f64;

        let SimWorld {
            config,
            grid,
            robots,
            objects,
            zones,
            tasks,
            events,
            time,
            ..
        } = self;

        for robot in robots.values_mut() {
            let mut ctx = RobotContext {
                dt,
                now: *time,
                tick,
                grid: &*grid,
                grid_config: &config.grid,
                robot_config: &config.robots,
                task_config: &config.tasks,
                zones: &*zones,
                tasks: &mut *tasks,
                objects: &mut *objects,
                events: &mut *events,
            };
            robot.update(&mut ctx);
        }
    }

    /// Recompute zone contents from object containment. Objects that are
    /// held never count towards a zone.
    pub fn update_zone_contents(&mut self) {
        for zone in self.zones.values_mut() {
            zone.contents.clear();
        }
        for object in self.objects.values_mut() {
            object.zone = None;
            if object.holder.is_some() || object.status.is_held() {
                continue;
            }
            if let Some(zone) = self
                .zones
                .values_mut()
                .find(|zone| zone.bounds.contains(&object.position))
            {
                zone.contents.push(object.id);
                object.zone = Some(zone.id);
            }
        }
    }

    /// Count the figures metrics are derived from
    pub fn tally(&self) -> TickTally {
        let mut tally = TickTally {
            tasks_created: self.tasks.len() as u32,
            robots: self.robots.len() as u32,
            ..TickTally::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => tally.tasks_pending += 1,
                TaskStatus::Assigned | TaskStatus::InProgress => tally.tasks_active += 1,
                TaskStatus::Completed => {
                    tally.tasks_completed += 1;
                    tally.duration_sum += task.duration().unwrap_or(0.0);
                }
                TaskStatus::Failed => tally.tasks_failed += 1,
                TaskStatus::Cancelled => tally.tasks_cancelled += 1,
            }
        }
        for robot in self.robots.values() {
            if robot.is_busy() {
                tally.busy_robots += 1;
            }
            tally.total_distance += robot.distance_traveled;
            tally.pick_attempts += robot.pick_attempts;
            tally.pick_successes += robot.pick_successes;
        }
        tally
    }

    /// Project the world into a read-only snapshot
    pub fn snapshot(&self, tick: u64, status: RunStatus, speed: f32, metrics: &SimMetrics) -> WorldSnapshot {
        let sensor_config = &self.config.sensors;
        let robots = self
            .robots
            .values()
            .map(|robot| {
                let frame = sensor_config
                    .enabled
                    .then(|| sensors::sense(&robot.pose, &self.grid, &self.obstacles, sensor_config));
                RobotView::new(robot, frame)
            })
            .collect();

        WorldSnapshot {
            tick,
            sim_time: self.time,
            status,
            speed,
            layout_version: self.grid.version(),
            width: self.config.layout.width,
            height: self.config.layout.height,
            assignment_floor: self.config.robots.assignment_floor,
            robots,
            objects: self.objects.values().cloned().collect(),
            zones: self.zones.values().map(ZoneView::from).collect(),
            obstacles: self.obstacles.clone(),
            tasks: self.tasks.values().cloned().collect(),
            metrics: metrics.clone(),
        }
    }

    /// Verify the holding invariants: an object is PICKED or CARRIED iff
    /// exactly one robot holds it, and held objects sit in no zone
    pub fn check_invariants(&self) -> Result<(), String> {
        for object in self.objects.values() {
            let holders: Vec<RobotId> = self
                .robots
                .values()
                .filter(|robot| robot.held_object == Some(object.id))
                .map(|robot| robot.id)
                .collect();
            let held = object.status.is_held();
            if held != (holders.len() == 1) || holders.len() > 1 {
                return Err(format!(
                    "{} is {:?} with holders {:?}",
                    object.id, object.status, holders
                ));
            }
            if held != object.holder.is_some() || (held && object.holder != holders.first().copied()) {
                return Err(format!(
                    "{} is {:?} but records holder {:?}",
                    object.id, object.status, object.holder
                ));
            }
            if held && self.zones.values().any(|zone| zone.contents.contains(&object.id)) {
                return Err(format!("{} is held but listed in a zone", object.id));
            }
        }
        for robot in self.robots.values() {
            if !(0.0..=100.0).contains(&robot.battery) {
                return Err(format!("{} battery {} out of range", robot.id, robot.battery));
            }
        }
        Ok(())
    }

    /// Print a summary of the world state
    pub fn print_summary(&self) {
        println!("=== Construction Site Summary ===");
        println!("Time: {:.2}s", self.time);
        println!(
            "Workspace: {:.0}x{:.0}, cells: {}x{}, blocked: {}, layout v{}",
            self.config.layout.width,
            self.config.layout.height,
            self.grid.cols(),
            self.grid.rows(),
            self.grid.blocked_count(),
            self.grid.version()
        );
        println!(
            "Robots: {}, Objects: {}, Zones: {}, Tasks: {}",
            self.robots.len(),
            self.objects.len(),
            self.zones.len(),
            self.tasks.len()
        );
        println!();

        println!("--- Zones ---");
        for zone in self.zones.values() {
            println!(
                "  {} {:<18} {:?}: {}/{}{}",
                zone.id,
                zone.name,
                zone.category,
                zone.occupancy(),
                zone.capacity,
                if zone.is_over_capacity() { " (over capacity)" } else { "" }
            );
        }

        println!("--- Robots ---");
        for robot in self.robots.values() {
            println!(
                "  {} {:?}: state={:?}, battery={:.1}%, position=({:.1}, {:.1}), done={}, failed={}, distance={:.1}",
                robot.id,
                robot.category,
                robot.state,
                robot.battery,
                robot.pose.position.x,
                robot.pose.position.y,
                robot.tasks_completed,
                robot.tasks_failed,
                robot.distance_traveled
            );
        }

        let unfinished: Vec<&Task> = self.tasks.values().filter(|task| task.is_active()).collect();
        if !unfinished.is_empty() {
            println!("--- Open Tasks ---");
            for task in unfinished {
                println!(
                    "  {} {:?} {:?}: step {}/{}, retries={}, robot={}",
                    task.id,
                    task.kind,
                    task.status,
                    task.current_step,
                    task.steps.len(),
                    task.retry_count,
                    task.robot.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }

    /// Draw a visual map of the site in the terminal
    pub fn draw_map(&self) {
        let width = self.config.layout.width.ceil().max(1.0) as usize;
        let height = self.config.layout.height.ceil().max(1.0) as usize;
        let mut grid = vec![vec!['.'; width]; height];

        // Row 0 is the top of the site
        let to_grid = |p: &Position| -> (usize, usize) {
            let col = (p.x.max(0.0) as usize).min(width - 1);
            let row = ((height as f32 - p.y).max(0.0) as usize).min(height - 1);
            (row, col)
        };

        for zone in self.zones.values() {
            let symbol = match zone.category {
                ZoneCategory::Storage => 's',
                ZoneCategory::Assembly => 'a',
                ZoneCategory::Staging => 'g',
                ZoneCategory::Charging => 'c',
                ZoneCategory::Work => 'w',
                ZoneCategory::Inspection => 'i',
                ZoneCategory::Home => 'h',
            };
            for (row, line) in grid.iter_mut().enumerate() {
                for (col, cell) in line.iter_mut().enumerate() {
                    let center = Position::new(col as f32 + 0.5, height as f32 - row as f32 - 0.5);
                    if zone.bounds.contains(&center) {
                        *cell = symbol;
                    }
                }
            }
        }

        for (row, line) in grid.iter_mut().enumerate() {
            for (col, cell) in line.iter_mut().enumerate() {
                let center = Position::new(col as f32 + 0.5, height as f32 - row as f32 - 0.5);
                if self.grid.is_occupied(&center) {
                    *cell = '#';
                }
            }
        }

        for object in self.objects.values().filter(|o| !o.status.is_held()) {
            let (row, col) = to_grid(&object.position);
            grid[row][col] = if object.status == ObjectStatus::Placed { 'P' } else { 'o' };
        }

        for robot in self.robots.values() {
            let (row, col) = to_grid(&robot.pose.position);
            grid[row][col] = match robot.state {
                RobotState::Error => 'X',
                _ if robot.held_object.is_some() => 'L',
                _ => 'R',
            };
        }

        println!("\n=== Site Map ===");
        println!("Legend: R=Robot, L=Loaded robot, X=Faulted robot, o=Object, P=Placed, #=Obstacle");
        println!("        s=Storage, g=Staging, a=Assembly, w=Work, i=Inspection, c=Charging, h=Home");
        println!();
        for row in &grid {
            let line: String = row.iter().collect();
            println!("{}", line);
        }
        println!();
    }
}
