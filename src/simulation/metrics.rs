//! Aggregate run metrics

use serde::Serialize;

/// Fleet-wide figures, refreshed at the end of every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimMetrics {
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub tasks_cancelled: u32,
    pub tasks_pending: u32,
    /// Tasks ASSIGNED or IN_PROGRESS
    pub tasks_active: u32,
    /// Completed tasks over created tasks
    pub completion_rate: f32,
    /// Mean start-to-finish time of completed tasks, in simulated seconds
    pub average_task_duration: f64,
    /// Share of robots bound to a task this tick
    pub fleet_utilization: f32,
    /// Share of robot-ticks spent bound to a task since the run started
    pub cumulative_utilization: f32,
    pub total_distance: f32,
    pub pick_success_ratio: f32,
    #[serde(skip)]
    busy_robot_ticks: u64,
    #[serde(skip)]
    robot_ticks: u64,
}

/// Per-tick inputs for [`SimMetrics::record`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TickTally {
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub tasks_cancelled: u32,
    pub tasks_pending: u32,
    pub tasks_active: u32,
    pub duration_sum: f64,
    pub robots: u32,
    pub busy_robots: u32,
    pub total_distance: f32,
    pub pick_attempts: u32,
    pub pick_successes: u32,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the state counted at the end of a tick into the metrics.
    /// `advanced` is false for ticks that only applied commands; those do
    /// not count towards cumulative utilization.
    pub fn record(&mut self, tally: &TickTally, advanced: bool) {
        self.tasks_created = tally.tasks_created;
        self.tasks_completed = tally.tasks_completed;
        self.tasks_failed = tally.tasks_failed;
        self.tasks_cancelled = tally.tasks_cancelled;
        self.tasks_pending = tally.tasks_pending;
        self.tasks_active = tally.tasks_active;

        self.completion_rate = ratio(tally.tasks_completed, tally.tasks_created, 0.0);
        self.average_task_duration = if tally.tasks_completed == 0 {
            0.0
        } else {
            tally.duration_sum / tally.tasks_completed as f64
        };

        self.fleet_utilization = ratio(tally.busy_robots, tally.robots, 0.0);
        if advanced {
            self.busy_robot_ticks += tally.busy_robots as u64;
            self.robot_ticks += tally.robots as u64;
        }
        self.cumulative_utilization = if self.robot_ticks == 0 {
            0.0
        } else {
            self.busy_robot_ticks as f32 / self.robot_ticks as f32
        };

        self.total_distance = tally.total_distance;
        self.pick_success_ratio = ratio(tally.pick_successes, tally.pick_attempts, 1.0);
    }
}

fn ratio(numerator: u32, denominator: u32, empty: f32) -> f32 {
    if denominator == 0 {
        empty
    } else {
        numerator as f32 / denominator as f32
    }
}
