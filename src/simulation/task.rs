//! Task pipeline
//!
//! A task request is decomposed into an ordered list of primitive steps at
//! creation time. The task tracks which step is active, how often the
//! active step has failed, and when it may be retried. The robot update
//! drives the steps; this module only owns the bookkeeping.

use serde::{Deserialize, Serialize};

use super::config::ChargingPolicy;
use super::error::StepFailure;
use super::types::{ObjectId, Position, RobotId, TaskId, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    PickAndPlace,
    Transport,
    Sort,
    Assemble,
    Inspect,
}

/// Scheduling priority. The derived order is the scheduling order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    MoveToPickup,
    Picking,
    MoveToDrop,
    Placing,
}

impl StepKind {
    pub fn is_movement(self) -> bool {
        matches!(self, StepKind::MoveToPickup | StepKind::MoveToDrop)
    }
}

/// One primitive action of a task
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskStep {
    pub kind: StepKind,
    /// Where the step happens: the waypoint goal for moves, the object or
    /// drop point for gripper actions
    pub target: Position,
    /// Gripper action time in simulated seconds; zero for moves
    pub duration_secs: f32,
}

impl TaskStep {
    fn movement(kind: StepKind, target: Position) -> Self {
        Self {
            kind,
            target,
            duration_secs: 0.0,
        }
    }

    fn action(kind: StepKind, target: Position, duration_secs: f32) -> Self {
        Self {
            kind,
            target,
            duration_secs,
        }
    }
}

/// Inputs needed to lay out a task's steps
#[derive(Debug, Clone, Copy)]
pub struct StepPlan {
    pub pickup: Position,
    pub drop: Position,
    pub pick_duration_secs: f32,
    pub place_duration_secs: f32,
}

/// Build the step sequence for a task kind
pub fn plan_steps(kind: TaskKind, plan: &StepPlan) -> Vec<TaskStep> {
    let place_duration = match kind {
        TaskKind::Assemble => plan.place_duration_secs * 2.0,
        _ => plan.place_duration_secs,
    };

    match kind {
        TaskKind::Inspect => vec![
            TaskStep::movement(StepKind::MoveToPickup, plan.pickup),
            TaskStep::movement(StepKind::MoveToDrop, plan.drop),
        ],
        TaskKind::PickAndPlace | TaskKind::Transport | TaskKind::Sort | TaskKind::Assemble => vec![
            TaskStep::movement(StepKind::MoveToPickup, plan.pickup),
            TaskStep::action(StepKind::Picking, plan.pickup, plan.pick_duration_secs),
            TaskStep::movement(StepKind::MoveToDrop, plan.drop),
            TaskStep::action(StepKind::Placing, plan.drop, place_duration),
        ],
    }
}

/// Outcome of completing the active step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAdvance {
    /// Another step follows
    Next,
    /// That was the last step; the task is COMPLETED
    Finished,
}

/// Outcome of a failed step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Re-enter the same step after the backoff (simulated seconds)
    Retry { backoff_secs: f32 },
    /// Retries are used up; the task is FAILED
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub object: ObjectId,
    pub zone: ZoneId,
    pub steps: Vec<TaskStep>,
    pub current_step: usize,
    pub status: TaskStatus,
    pub robot: Option<RobotId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_reason: Option<String>,
    /// Simulated seconds
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    /// Simulated seconds to wait before the active step is retried
    pub backoff_remaining: f32,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        kind: TaskKind,
        priority: TaskPriority,
        object: ObjectId,
        zone: ZoneId,
        steps: Vec<TaskStep>,
        max_retries: u32,
        now: f64,
    ) -> Self {
        Self {
            id,
            kind,
            priority,
            object,
            zone,
            steps,
            current_step: 0,
            status: TaskStatus::Pending,
            robot: None,
            retry_count: 0,
            max_retries,
            failure_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            backoff_remaining: 0.0,
        }
    }

    pub fn current(&self) -> Option<&TaskStep> {
        self.steps.get(self.current_step)
    }

    /// Point where the object will be set down
    pub fn drop_target(&self) -> Option<Position> {
        self.steps
            .iter()
            .find(|step| step.kind == StepKind::MoveToDrop)
            .map(|step| step.target)
    }

    /// Whether the task still needs or holds a robot
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn assign(&mut self, robot: RobotId) {
        self.robot = Some(robot);
        self.status = TaskStatus::Assigned;
    }

    /// ASSIGNED -> IN_PROGRESS on the first tick the robot works on it
    pub fn start(&mut self, now: f64) {
        if self.status == TaskStatus::Assigned {
            self.status = TaskStatus::InProgress;
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
        }
    }

    /// Complete the active step
    pub fn advance(&mut self, now: f64) -> StepAdvance {
        self.current_step += 1;
        self.backoff_remaining = 0.0;
        if self.current_step >= self.steps.len() {
            self.status = TaskStatus::Completed;
            self.completed_at = Some(now);
            self.robot = None;
            StepAdvance::Finished
        } else {
            StepAdvance::Next
        }
    }

    /// Count a failure of the active step and decide whether to retry
    pub fn record_failure(&mut self, reason: &str, backoff_base_secs: f32, now: f64) -> RetryDecision {
        self.retry_count += 1;
        self.failure_reason = Some(reason.to_string());
        if self.retry_count < self.max_retries {
            let backoff_secs = backoff_base_secs * 2f32.powi(self.retry_count as i32 - 1);
            self.backoff_remaining = backoff_secs;
            RetryDecision::Retry { backoff_secs }
        } else {
            self.fail(reason, now);
            RetryDecision::Exhausted
        }
    }

    pub fn fail(&mut self, reason: &str, now: f64) {
        self.status = TaskStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.completed_at = Some(now);
        self.robot = None;
        self.backoff_remaining = 0.0;
    }

    pub fn cancel(&mut self, now: f64) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.robot = None;
        self.backoff_remaining = 0.0;
    }

    /// Detach the robot after a charging interruption and put the task back
    /// in the queue. Returns false when the policy says the task fails.
    pub fn requeue(&mut self, policy: ChargingPolicy, now: f64) -> bool {
        match policy {
            ChargingPolicy::Fail => {
                self.fail(&StepFailure::LowBattery.to_string(), now);
                return false;
            }
            ChargingPolicy::Resume => {
                // A new robot has to travel to the work site first
                while self.current_step > 0
                    && !self.steps[self.current_step].kind.is_movement()
                {
                    self.current_step -= 1;
                }
            }
            ChargingPolicy::Restart => {
                self.current_step = 0;
                self.retry_count = 0;
                self.started_at = None;
                self.failure_reason = None;
            }
        }
        self.status = TaskStatus::Pending;
        self.robot = None;
        self.backoff_remaining = 0.0;
        true
    }

    /// Move the timestamps `secs` earlier, for a clock that restarts at zero
    pub fn shift_clock(&mut self, secs: f64) {
        self.created_at -= secs;
        if let Some(started) = self.started_at.as_mut() {
            *started -= secs;
        }
    }

    /// Seconds from start to completion, for completed tasks
    pub fn duration(&self) -> Option<f64> {
        match (self.status, self.started_at, self.completed_at) {
            (TaskStatus::Completed, Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
