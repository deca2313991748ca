//! Simulation configuration
//!
//! Every knob has a default so a partial TOML file is enough. The default
//! layout is a small construction site with storage, staging, assembly and
//! charging zones separated by a couple of walls.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ConfigError;
use super::types::{MaterialType, Position, Rect, RobotCategory, ZoneCategory, MAX_GRID_CELLS, MAX_SPEED, MIN_SPEED};

/// What happens to a task whose robot has to leave for charging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingPolicy {
    /// The task fails with a low-battery reason
    Fail,
    /// The task goes back to PENDING and resumes from its last movement step
    #[default]
    Resume,
    /// The task goes back to PENDING and starts over from the first step
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulated seconds per tick at speed 1.0
    pub tick_duration_secs: f32,
    /// Initial time multiplier
    pub speed: f32,
    /// Maximum number of queued commands between two ticks
    pub command_queue_capacity: usize,
    /// Number of recent events kept for inspection
    pub event_history: usize,
    /// Seed for object placement jitter; unseeded when absent
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_duration_secs: 0.1,
            speed: 1.0,
            command_queue_capacity: 256,
            event_history: 256,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_size: f32,
    /// Upper bound on A* node expansions per search
    pub max_expansions: usize,
    /// Distance under which a robot snaps onto its waypoint
    pub waypoint_epsilon: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.5,
            max_expansions: 20_000,
            waypoint_epsilon: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Minimum battery percent for a robot to accept a task
    pub assignment_floor: f32,
    /// Battery percent below which a robot heads for a charger
    pub charge_threshold: f32,
    /// Battery percent gained per simulated second while docked
    pub charge_rate: f32,
    pub pick_duration_secs: f32,
    pub place_duration_secs: f32,
    /// Maximum distance between robot and object for a pick
    pub pick_reach: f32,
    /// Replans allowed within one movement step before it fails
    pub max_reroutes: u32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            assignment_floor: 30.0,
            charge_threshold: 20.0,
            charge_rate: 5.0,
            pick_duration_secs: 1.0,
            place_duration_secs: 1.0,
            pick_reach: 0.75,
            max_reroutes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub max_retries: u32,
    /// Base backoff in simulated seconds; doubles with each retry
    pub retry_backoff_secs: f32,
    pub charging_policy: ChargingPolicy,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_secs: 0.5,
            charging_policy: ChargingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub enabled: bool,
    pub lidar_rays: usize,
    pub lidar_range: f32,
    /// Marching step for LiDAR rays
    pub lidar_step: f32,
    pub proximity_range: f32,
    /// Half-angle of each proximity cone, in degrees
    pub proximity_cone_deg: f32,
    pub detection_radius: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lidar_rays: 36,
            lidar_range: 8.0,
            lidar_step: 0.1,
            proximity_range: 5.0,
            proximity_cone_deg: 45.0,
            detection_radius: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub category: ZoneCategory,
    pub bounds: Rect,
    pub capacity: u32,
    #[serde(default = "default_zone_color")]
    pub color: String,
}

fn default_zone_color() -> String {
    "#888888".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSpec {
    #[serde(default = "default_obstacle_label")]
    pub label: String,
    pub bounds: Rect,
}

fn default_obstacle_label() -> String {
    "obstacle".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSpec {
    pub category: RobotCategory,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub heading: f32,
    #[serde(default = "full_battery")]
    pub battery: f32,
}

fn full_battery() -> f32 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub material: MaterialType,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub width: f32,
    pub height: f32,
    pub zones: Vec<ZoneSpec>,
    pub obstacles: Vec<ObstacleSpec>,
    pub robots: Vec<RobotSpec>,
    pub objects: Vec<ObjectSpec>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::construction_site()
    }
}

impl LayoutConfig {
    /// An empty workspace of the given size
    pub fn empty(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            zones: Vec::new(),
            obstacles: Vec::new(),
            robots: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Default 40x30 site used by the CLI and tests
    pub fn construction_site() -> Self {
        let zone = |name: &str, category, bounds, capacity, color: &str| ZoneSpec {
            name: name.to_string(),
            category,
            bounds,
            capacity,
            color: color.to_string(),
        };

        let zones = vec![
            zone("Material Storage", ZoneCategory::Storage, Rect::new(2.0, 2.0, 10.0, 10.0), 20, "#3b82f6"),
            zone("Staging Area", ZoneCategory::Staging, Rect::new(2.0, 20.0, 10.0, 28.0), 12, "#f59e0b"),
            zone("Assembly Bay", ZoneCategory::Assembly, Rect::new(28.0, 18.0, 38.0, 28.0), 16, "#10b981"),
            zone("Work Face", ZoneCategory::Work, Rect::new(28.0, 2.0, 38.0, 10.0), 10, "#ef4444"),
            zone("Inspection Point", ZoneCategory::Inspection, Rect::new(17.0, 24.0, 23.0, 28.0), 4, "#8b5cf6"),
            zone("Charging Dock", ZoneCategory::Charging, Rect::new(16.0, 2.0, 24.0, 6.0), 4, "#22c55e"),
            zone("Robot Home", ZoneCategory::Home, Rect::new(16.0, 12.0, 24.0, 16.0), 6, "#64748b"),
        ];

        let obstacles = vec![
            ObstacleSpec {
                label: "site office".to_string(),
                bounds: Rect::new(12.0, 8.0, 14.0, 22.0),
            },
            ObstacleSpec {
                label: "crane base".to_string(),
                bounds: Rect::new(25.0, 12.0, 27.0, 16.0),
            },
        ];

        let robots = vec![
            RobotSpec { category: RobotCategory::PickPlace, x: 17.0, y: 13.0, heading: 0.0, battery: 100.0 },
            RobotSpec { category: RobotCategory::PickPlace, x: 19.0, y: 13.0, heading: 0.0, battery: 100.0 },
            RobotSpec { category: RobotCategory::Transport, x: 21.0, y: 13.0, heading: 0.0, battery: 100.0 },
            RobotSpec { category: RobotCategory::HeavyLift, x: 23.0, y: 13.0, heading: 0.0, battery: 100.0 },
        ];

        let objects = [
            (MaterialType::CementBag, 3.0, 3.0),
            (MaterialType::ConcreteBlock, 4.0, 3.0),
            (MaterialType::Lumber, 5.0, 3.0),
            (MaterialType::PlywoodSheet, 6.0, 3.0),
            (MaterialType::PipeSection, 3.0, 5.0),
            (MaterialType::CableReel, 4.0, 5.0),
            (MaterialType::SteelBeam, 5.0, 5.0),
            (MaterialType::ToolCrate, 6.0, 5.0),
            (MaterialType::DrywallPanel, 3.0, 7.0),
            (MaterialType::GlassPanel, 4.0, 7.0),
            (MaterialType::BrickPallet, 5.0, 7.0),
            (MaterialType::RoofTiles, 6.0, 7.0),
        ]
        .into_iter()
        .map(|(material, x, y)| ObjectSpec { material, x, y })
        .collect();

        Self {
            width: 40.0,
            height: 30.0,
            zones,
            obstacles,
            robots,
            objects,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub engine: EngineConfig,
    pub grid: GridConfig,
    pub robots: RobotConfig,
    pub tasks: TaskConfig,
    pub sensors: SensorConfig,
    pub layout: LayoutConfig,
}

impl SimConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.engine.tick_duration_secs <= 0.0 {
            return invalid("engine.tick_duration_secs must be positive".into());
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.engine.speed) {
            return invalid(format!(
                "engine.speed {} is outside [{MIN_SPEED}, {MAX_SPEED}]",
                self.engine.speed
            ));
        }
        if self.engine.command_queue_capacity == 0 {
            return invalid("engine.command_queue_capacity must be at least 1".into());
        }
        if self.grid.cell_size <= 0.0 {
            return invalid("grid.cell_size must be positive".into());
        }
        if self.grid.max_expansions == 0 {
            return invalid("grid.max_expansions must be at least 1".into());
        }
        for (name, value) in [
            ("robots.assignment_floor", self.robots.assignment_floor),
            ("robots.charge_threshold", self.robots.charge_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return invalid(format!("{name} {value} is outside [0, 100]"));
            }
        }
        if self.robots.assignment_floor < self.robots.charge_threshold {
            return invalid("robots.assignment_floor must not be below robots.charge_threshold".into());
        }
        if self.robots.charge_rate <= 0.0 {
            return invalid("robots.charge_rate must be positive".into());
        }
        if self.sensors.lidar_step <= 0.0 {
            return invalid("sensors.lidar_step must be positive".into());
        }

        let layout = &self.layout;
        if layout.width <= 0.0 || layout.height <= 0.0 {
            return invalid("layout width and height must be positive".into());
        }
        let cols = (layout.width / self.grid.cell_size).ceil() as f64;
        let rows = (layout.height / self.grid.cell_size).ceil() as f64;
        if cols * rows > MAX_GRID_CELLS as f64 {
            return invalid(format!(
                "a {} x {} layout with cell size {} exceeds {MAX_GRID_CELLS} grid cells",
                layout.width, layout.height, self.grid.cell_size
            ));
        }
        let bounds = layout.bounds();
        for zone in &layout.zones {
            if zone.bounds.is_degenerate() || !bounds.contains(&Position::new(zone.bounds.min_x, zone.bounds.min_y))
                || !bounds.contains(&Position::new(zone.bounds.max_x, zone.bounds.max_y))
            {
                return invalid(format!("zone '{}' lies outside the workspace", zone.name));
            }
        }
        for robot in &layout.robots {
            if !bounds.contains(&Position::new(robot.x, robot.y)) {
                return invalid(format!("robot at ({}, {}) is outside the workspace", robot.x, robot.y));
            }
            if !(0.0..=100.0).contains(&robot.battery) {
                return invalid(format!("robot battery {} is outside [0, 100]", robot.battery));
            }
        }
        for object in &layout.objects {
            if !bounds.contains(&Position::new(object.x, object.y)) {
                return invalid(format!("object at ({}, {}) is outside the workspace", object.x, object.y));
            }
        }
        Ok(())
    }
}
