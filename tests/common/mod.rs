//! Small layouts shared by the integration tests
#![allow(dead_code)]

use site_sim::simulation::{
    Command, LayoutConfig, MaterialType, ObjectId, ObjectSpec, ObstacleSpec, Rect, RobotCategory,
    RobotId, RobotSpec, SimConfig, SimEngine, SimId, TaskId, TaskKind, TaskPriority, ZoneCategory,
    ZoneId, ZoneSpec,
};

pub const STORAGE: ZoneId = ZoneId(SimId(0));
pub const STAGING: ZoneId = ZoneId(SimId(1));
pub const CHARGER: ZoneId = ZoneId(SimId(2));

fn zone(name: &str, category: ZoneCategory, bounds: Rect, capacity: u32) -> ZoneSpec {
    ZoneSpec {
        name: name.to_string(),
        category,
        bounds,
        capacity,
        color: "#888888".to_string(),
    }
}

fn robot(category: RobotCategory, x: f32, y: f32, battery: f32) -> RobotSpec {
    RobotSpec {
        category,
        x,
        y,
        heading: 0.0,
        battery,
    }
}

fn object(material: MaterialType, x: f32, y: f32) -> ObjectSpec {
    ObjectSpec { material, x, y }
}

/// 20x10 yard: storage on the left, staging on the right, a charger at the
/// top in the middle. Zones get ids 0..=2.
fn yard() -> LayoutConfig {
    let mut layout = LayoutConfig::empty(20.0, 10.0);
    layout.zones = vec![
        zone("Storage", ZoneCategory::Storage, Rect::new(0.0, 0.0, 6.0, 6.0), 20),
        zone("Staging", ZoneCategory::Staging, Rect::new(14.0, 0.0, 20.0, 6.0), 20),
        zone("Charger", ZoneCategory::Charging, Rect::new(8.0, 7.0, 12.0, 10.0), 4),
    ];
    layout
}

fn quiet_config(layout: LayoutConfig) -> SimConfig {
    let mut config = SimConfig::default();
    config.engine.seed = Some(7);
    config.sensors.enabled = false;
    config.layout = layout;
    config
}

/// One pick-and-place robot (id 3) in the middle of the yard and three
/// objects in storage: a cement bag (4), a brick pallet (5) and a tool
/// crate (6)
pub fn yard_config() -> SimConfig {
    let mut layout = yard();
    layout.robots = vec![robot(RobotCategory::PickPlace, 10.0, 3.0, 100.0)];
    layout.objects = vec![
        object(MaterialType::CementBag, 2.0, 3.0),
        object(MaterialType::BrickPallet, 3.0, 5.0),
        object(MaterialType::ToolCrate, 4.0, 2.0),
    ];
    quiet_config(layout)
}

pub const YARD_ROBOT: RobotId = RobotId(SimId(3));
pub const CEMENT: ObjectId = ObjectId(SimId(4));
pub const PALLET: ObjectId = ObjectId(SimId(5));
pub const CRATE: ObjectId = ObjectId(SimId(6));

/// The yard with a wall from top to bottom between the robot and storage.
/// The wall takes id 3, the robot 4 and the cement bag 5.
pub fn walled_config() -> SimConfig {
    let mut layout = yard();
    layout.obstacles = vec![ObstacleSpec {
        label: "wall".to_string(),
        bounds: Rect::new(9.0, 0.0, 11.0, 10.0),
    }];
    layout.robots = vec![robot(RobotCategory::PickPlace, 15.0, 3.0, 100.0)];
    layout.objects = vec![object(MaterialType::CementBag, 2.0, 3.0)];
    quiet_config(layout)
}

pub const WALLED_ROBOT: RobotId = RobotId(SimId(4));
pub const WALLED_CEMENT: ObjectId = ObjectId(SimId(5));

/// The yard with a robot that starts just above the charging threshold.
/// Reaching the cement bag costs 2% and takes it below.
pub fn low_battery_config() -> SimConfig {
    let mut config = yard_config();
    config.robots.assignment_floor = 20.0;
    config.robots.charge_threshold = 20.0;
    config.layout.robots = vec![robot(RobotCategory::PickPlace, 10.0, 3.0, 21.0)];
    config
}

pub fn engine(config: SimConfig) -> SimEngine {
    SimEngine::new(config).expect("test configuration is valid")
}

pub fn place(object: ObjectId, zone: ZoneId, robot: Option<RobotId>) -> Command {
    Command::CreateTask {
        object,
        zone,
        robot,
        kind: TaskKind::PickAndPlace,
        priority: TaskPriority::Normal,
    }
}

/// Start the engine and create a pick-and-place task; returns the task id
pub fn start_with_task(engine: &mut SimEngine, object: ObjectId, robot: RobotId) -> TaskId {
    engine.submit(Command::Start).expect("start is accepted");
    engine
        .submit(place(object, STAGING, Some(robot)))
        .expect("task is accepted")
        .task()
        .expect("receipt carries the task id")
}

/// Tick until `done` holds or `max_ticks` have run. Returns whether it held.
pub fn run_until(engine: &mut SimEngine, max_ticks: u64, mut done: impl FnMut(&SimEngine) -> bool) -> bool {
    for _ in 0..max_ticks {
        engine.tick();
        if let Err(violation) = engine.world().check_invariants() {
            panic!("invariant violated at tick {}: {}", engine.tick_count(), violation);
        }
        if done(engine) {
            return true;
        }
    }
    false
}
