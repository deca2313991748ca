//! Read-only projection of the world published after every tick

use serde::Serialize;

use super::metrics::SimMetrics;
use super::robot::SimRobot;
use super::sensors::SensorFrame;
use super::site::{SimObject, SimObstacle, SimZone};
use super::task::{Task, TaskStatus};
use super::types::{
    ObjectId, Pose, Position, RobotCategory, RobotId, RobotState, RunStatus, TaskId, ZoneId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotView {
    pub id: RobotId,
    pub category: RobotCategory,
    pub pose: Pose,
    pub battery: f32,
    pub state: RobotState,
    pub held_object: Option<ObjectId>,
    pub task: Option<TaskId>,
    pub manual_control: bool,
    pub fault: Option<String>,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub distance_traveled: f32,
    pub pick_success_ratio: f32,
    pub payload_kg: f32,
    pub waypoints: Vec<Position>,
    pub sensors: Option<SensorFrame>,
}

impl RobotView {
    pub fn new(robot: &SimRobot, sensors: Option<SensorFrame>) -> Self {
        Self {
            id: robot.id,
            category: robot.category,
            pose: robot.pose,
            battery: robot.battery,
            state: robot.state,
            held_object: robot.held_object,
            task: robot.task,
            manual_control: robot.manual_control,
            fault: robot.fault.clone(),
            tasks_completed: robot.tasks_completed,
            tasks_failed: robot.tasks_failed,
            distance_traveled: robot.distance_traveled,
            pick_success_ratio: robot.pick_success_ratio(),
            payload_kg: robot.category.profile().payload_kg,
            waypoints: robot.remaining_waypoints().to_vec(),
            sensors,
        }
    }

    /// Eligible for a new task at the given battery floor
    pub fn is_available(&self, floor: f32) -> bool {
        self.state == RobotState::Idle
            && self.task.is_none()
            && !self.manual_control
            && self.battery > floor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneView {
    #[serde(flatten)]
    pub zone: SimZone,
    pub occupancy: u32,
    pub over_capacity: bool,
}

impl From<&SimZone> for ZoneView {
    fn from(zone: &SimZone) -> Self {
        Self {
            zone: zone.clone(),
            occupancy: zone.occupancy(),
            over_capacity: zone.is_over_capacity(),
        }
    }
}

/// Full world state at the end of a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    /// Simulated seconds since the run started
    pub sim_time: f64,
    pub status: RunStatus,
    pub speed: f32,
    pub layout_version: u64,
    pub width: f32,
    pub height: f32,
    /// Assignment battery floor, so planners can judge eligibility
    pub assignment_floor: f32,
    pub robots: Vec<RobotView>,
    pub objects: Vec<SimObject>,
    pub zones: Vec<ZoneView>,
    pub obstacles: Vec<SimObstacle>,
    pub tasks: Vec<Task>,
    pub metrics: SimMetrics,
}

impl WorldSnapshot {
    pub fn robot(&self, id: RobotId) -> Option<&RobotView> {
        self.robots.iter().find(|robot| robot.id == id)
    }

    pub fn object(&self, id: ObjectId) -> Option<&SimObject> {
        self.objects.iter().find(|object| object.id == id)
    }

    pub fn zone(&self, id: ZoneId) -> Option<&ZoneView> {
        self.zones.iter().find(|view| view.zone.id == id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
    }
}
