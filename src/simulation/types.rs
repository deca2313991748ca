//! Core types for the construction site simulation
//!
//! Identifiers, geometry helpers and the small enums shared by every part of
//! the engine. Nothing in here owns world state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimId(pub usize);

/// A wrapper type for robot IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RobotId(pub SimId);

/// A wrapper type for zone IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub SimId);

/// A wrapper type for construction object IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub SimId);

/// A wrapper type for task IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub SimId);

/// A wrapper type for obstacle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObstacleId(pub SimId);

macro_rules! display_id {
    ($ty:ty, $prefix:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), (self.0).0)
            }
        }
    };
}

display_id!(RobotId, "robot");
display_id!(ZoneId, "zone");
display_id!(ObjectId, "object");
display_id!(TaskId, "task");
display_id!(ObstacleId, "obstacle");

/// A 2D position in world units. The origin is the bottom-left corner of the
/// workspace.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Heading in radians from this position to another, measured
    /// counter-clockwise from the +x axis
    pub fn angle_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        if dx == 0.0 && dy == 0.0 {
            0.0
        } else {
            dy.atan2(dx)
        }
    }

    /// Point reached after travelling `distance` along `heading`
    pub fn offset(&self, heading: f32, distance: f32) -> Position {
        Position {
            x: self.x + heading.cos() * distance,
            y: self.y + heading.sin() * distance,
        }
    }
}

/// Robot pose: position plus heading in radians
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    pub heading: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, heading: f32) -> Self {
        Self {
            position: Position::new(x, y),
            heading,
        }
    }
}

/// Axis-aligned rectangle in world units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Position {
        Position::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    pub fn contains(&self, point: &Position) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    /// Closest point of the rectangle to `point` (the point itself when inside)
    pub fn closest_point(&self, point: &Position) -> Position {
        Position::new(
            point.x.clamp(self.min_x, self.max_x),
            point.y.clamp(self.min_y, self.max_y),
        )
    }

    pub fn distance_to(&self, point: &Position) -> f32 {
        self.closest_point(point).distance(point)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Robot category; decides payload, speed and battery drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotCategory {
    PickPlace,
    HeavyLift,
    Transport,
}

/// Capability profile for a robot category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotProfile {
    /// Maximum object weight in kg
    pub payload_kg: f32,
    /// Cruise speed in world units per second
    pub speed: f32,
    /// Battery percent consumed per world unit travelled (unloaded)
    pub drain_per_unit: f32,
    /// Battery percent consumed per second of gripper action
    pub action_drain_per_sec: f32,
}

impl RobotCategory {
    pub fn profile(self) -> RobotProfile {
        match self {
            RobotCategory::PickPlace => RobotProfile {
                payload_kg: 50.0,
                speed: 1.5,
                drain_per_unit: 0.25,
                action_drain_per_sec: 0.4,
            },
            RobotCategory::HeavyLift => RobotProfile {
                payload_kg: 500.0,
                speed: 1.0,
                drain_per_unit: 0.4,
                action_drain_per_sec: 0.8,
            },
            RobotCategory::Transport => RobotProfile {
                payload_kg: 150.0,
                speed: 2.0,
                drain_per_unit: 0.2,
                action_drain_per_sec: 0.3,
            },
        }
    }
}

/// Zone category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneCategory {
    Storage,
    Assembly,
    Staging,
    Charging,
    Work,
    Inspection,
    Home,
}

/// The catalog of construction materials a robot can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialType {
    SteelBeam,
    RebarBundle,
    ConcreteBlock,
    BrickPallet,
    CementBag,
    SandBag,
    GravelBag,
    Lumber,
    PlywoodSheet,
    DrywallPanel,
    PipeSection,
    CableReel,
    GlassPanel,
    InsulationRoll,
    RoofTiles,
    Scaffolding,
    ToolCrate,
}

impl MaterialType {
    pub const ALL: [MaterialType; 17] = [
        MaterialType::SteelBeam,
        MaterialType::RebarBundle,
        MaterialType::ConcreteBlock,
        MaterialType::BrickPallet,
        MaterialType::CementBag,
        MaterialType::SandBag,
        MaterialType::GravelBag,
        MaterialType::Lumber,
        MaterialType::PlywoodSheet,
        MaterialType::DrywallPanel,
        MaterialType::PipeSection,
        MaterialType::CableReel,
        MaterialType::GlassPanel,
        MaterialType::InsulationRoll,
        MaterialType::RoofTiles,
        MaterialType::Scaffolding,
        MaterialType::ToolCrate,
    ];

    /// Nominal weight in kg
    pub fn weight_kg(self) -> f32 {
        match self {
            MaterialType::SteelBeam => 120.0,
            MaterialType::RebarBundle => 80.0,
            MaterialType::ConcreteBlock => 30.0,
            MaterialType::BrickPallet => 400.0,
            MaterialType::CementBag => 25.0,
            MaterialType::SandBag => 20.0,
            MaterialType::GravelBag => 25.0,
            MaterialType::Lumber => 35.0,
            MaterialType::PlywoodSheet => 18.0,
            MaterialType::DrywallPanel => 25.0,
            MaterialType::PipeSection => 40.0,
            MaterialType::CableReel => 15.0,
            MaterialType::GlassPanel => 45.0,
            MaterialType::InsulationRoll => 8.0,
            MaterialType::RoofTiles => 12.0,
            MaterialType::Scaffolding => 60.0,
            MaterialType::ToolCrate => 10.0,
        }
    }
}

/// Lifecycle of a construction object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    Available,
    Picked,
    Carried,
    Placed,
}

impl ObjectStatus {
    /// Whether the status implies a holder robot
    pub fn is_held(self) -> bool {
        matches!(self, ObjectStatus::Picked | ObjectStatus::Carried)
    }
}

/// Behavioral state of a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Idle,
    Moving,
    Picking,
    Carrying,
    Placing,
    Charging,
    Error,
}

/// Engine run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Stopped,
    Running,
    Paused,
}

/// Lower and upper bound of the time multiplier
pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 5.0;

/// Spacing between drop slots inside a zone
pub const ZONE_SLOT_SPACING: f32 = 1.0;

/// Largest occupancy grid a layout may rasterize to
pub const MAX_GRID_CELLS: usize = 4_000_000;
