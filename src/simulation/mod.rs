//! Standalone construction site simulation
//!
//! Robots pick construction material up in one zone and set it down in
//! another, planning routes over an occupancy grid. The engine owns all
//! state; callers submit commands and receive snapshots.

mod command;
mod config;
mod engine;
mod error;
mod event;
mod grid;
mod metrics;
mod pathfinder;
mod planner;
mod robot;
mod runner;
mod sensors;
mod site;
mod snapshot;
mod task;
mod types;
mod world;

pub use command::{Accepted, Command, CommandQueue, QueuedCommand};
pub use config::{
    ChargingPolicy, EngineConfig, GridConfig, LayoutConfig, ObjectSpec, ObstacleSpec, RobotConfig,
    RobotSpec, SensorConfig, SimConfig, TaskConfig, ZoneSpec,
};
pub use engine::SimEngine;
pub use error::{AdmissionError, ConfigError, ObserverError, PathError, StepFailure};
pub use event::{
    spawn_json_lines, ChannelObserver, EventKind, EventLog, JsonLinesObserver, ObserverSet,
    Publication, SimEvent, SimObserver,
};
pub use grid::{Cell, OccupancyGrid};
pub use metrics::{SimMetrics, TickTally};
pub use pathfinder::{find_path, octile, Path};
pub use planner::{AutoScheduler, PlannerObserver};
pub use robot::SimRobot;
pub use runner::{EngineHandle, EngineRequest, SimRunner};
pub use sensors::{
    detect, lidar_scan, proximity, sense, Detection, LidarRay, LidarScan, ProximityReadings,
    SensorFrame,
};
pub use site::{SimObject, SimObstacle, SimZone};
pub use snapshot::{RobotView, WorldSnapshot, ZoneView};
pub use task::{
    plan_steps, RetryDecision, StepAdvance, StepKind, StepPlan, Task, TaskKind, TaskPriority,
    TaskStatus, TaskStep,
};
pub use types::{
    MaterialType, ObjectId, ObjectStatus, ObstacleId, Pose, Position, Rect, RobotCategory,
    RobotId, RobotProfile, RobotState, RunStatus, SimId, TaskId, ZoneCategory, ZoneId,
    MAX_GRID_CELLS, MAX_SPEED, MIN_SPEED, ZONE_SLOT_SPACING,
};
pub use world::SimWorld;
