//! Error types for the simulation engine

use std::path::PathBuf;

use super::task::TaskStatus;
use super::types::{ObjectId, ObjectStatus, ObstacleId, RobotId, RobotState, TaskId, ZoneId};

/// Synchronous rejection of a command. Returned to the caller before any
/// state is mutated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("{0} does not exist")]
    UnknownRobot(RobotId),

    #[error("{0} does not exist")]
    UnknownObject(ObjectId),

    #[error("{0} does not exist")]
    UnknownZone(ZoneId),

    #[error("{0} does not exist")]
    UnknownTask(TaskId),

    #[error("{0} does not exist")]
    UnknownObstacle(ObstacleId),

    #[error("{object} is {status:?}, not AVAILABLE")]
    ObjectUnavailable { object: ObjectId, status: ObjectStatus },

    #[error("{object} is already the target of active {task}")]
    ObjectReserved { object: ObjectId, task: TaskId },

    #[error("{robot} is {state:?} and cannot take a task")]
    RobotBusy { robot: RobotId, state: RobotState },

    #[error("{robot} is under manual control")]
    RobotManual { robot: RobotId },

    #[error("{robot} is not in ERROR")]
    RobotNotFaulted { robot: RobotId },

    #[error("{robot} battery {battery:.1}% is below the {floor:.1}% assignment floor")]
    BatteryTooLow {
        robot: RobotId,
        battery: f32,
        floor: f32,
    },

    #[error("{object} weighs {weight_kg}kg, over the {capacity_kg}kg payload of {robot}")]
    PayloadExceeded {
        robot: RobotId,
        object: ObjectId,
        weight_kg: f32,
        capacity_kg: f32,
    },

    #[error("{task} is already {status:?}")]
    TaskTerminal { task: TaskId, status: TaskStatus },

    #[error("{task} is {status:?}, not PENDING")]
    TaskNotPending { task: TaskId, status: TaskStatus },

    #[error("speed multiplier {0} is outside [0.1, 5.0]")]
    InvalidSpeed(f32),

    #[error("position ({x:.2}, {y:.2}) is outside the workspace")]
    OutOfBounds { x: f32, y: f32 },

    #[error("position ({x:.2}, {y:.2}) is blocked by an obstacle")]
    PositionBlocked { x: f32, y: f32 },

    #[error("no charging zone is configured")]
    NoChargingZone,

    #[error("request contains no objects")]
    EmptyRequest,

    #[error("command queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("engine is not running")]
    EngineStopped,
}

/// Why a path could not be found
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("start ({x:.2}, {y:.2}) is outside the grid")]
    StartOutOfBounds { x: f32, y: f32 },

    #[error("goal ({x:.2}, {y:.2}) is blocked or outside the grid")]
    GoalBlocked { x: f32, y: f32 },

    #[error("goal is not reachable from start")]
    Unreachable,

    #[error("search gave up after {0} expansions")]
    ExpansionLimit(usize),
}

/// A failure detected while executing a task step
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepFailure {
    #[error("no path: {0}")]
    NoPath(#[from] PathError),

    #[error("{object} is {status:?} when pick was attempted")]
    ObjectUnavailable { object: ObjectId, status: ObjectStatus },

    #[error("{object} is {distance:.2} units away, out of reach")]
    ObjectOutOfReach { object: ObjectId, distance: f32 },

    #[error("gave up after {0} reroutes")]
    RerouteLimit(u32),

    #[error("interrupted by low battery")]
    LowBattery,

    #[error("battery depleted")]
    BatteryDepleted,

    #[error("persistent obstruction at robot position")]
    Obstructed,
}

/// Configuration load and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A publication failure for a single observer
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("observer disconnected")]
    Disconnected,

    #[error("observer I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("observer serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
