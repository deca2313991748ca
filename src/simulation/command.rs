//! External commands and the bounded queue they wait in
//!
//! Commands are admitted when submitted and applied at the start of the
//! next tick, in arrival order. Nothing is applied mid-tick.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::error::AdmissionError;
use super::task::{TaskKind, TaskPriority};
use super::types::{
    MaterialType, ObjectId, ObstacleId, Rect, RobotCategory, RobotId, TaskId, ZoneId,
};

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

/// A single request against the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    Start,
    Pause,
    Stop,
    Reset,
    SetSpeed {
        multiplier: f32,
    },
    /// Create a task; bound to `robot` when given, otherwise to the nearest
    /// eligible robot if one is free
    CreateTask {
        object: ObjectId,
        zone: ZoneId,
        #[serde(default)]
        robot: Option<RobotId>,
        #[serde(default)]
        kind: TaskKind,
        #[serde(default)]
        priority: TaskPriority,
    },
    /// One task per eligible object; ineligible objects are skipped
    CreateTaskBulk {
        objects: Vec<ObjectId>,
        zone: ZoneId,
        #[serde(default)]
        auto_assign: bool,
        #[serde(default)]
        kind: TaskKind,
        #[serde(default)]
        priority: TaskPriority,
    },
    CancelTask {
        task: TaskId,
    },
    AssignTask {
        task: TaskId,
        robot: RobotId,
    },
    MoveRobot {
        robot: RobotId,
        x: f32,
        y: f32,
    },
    StopRobot {
        robot: RobotId,
    },
    SpawnObject {
        material: MaterialType,
        zone: ZoneId,
    },
    SpawnRobot {
        category: RobotCategory,
        x: f32,
        y: f32,
    },
    RecoverRobot {
        robot: RobotId,
    },
    PlaceObstacle {
        #[serde(default = "default_obstacle_label")]
        label: String,
        bounds: Rect,
    },
    ClearObstacle {
        obstacle: ObstacleId,
    },
    RequestAutoSchedule,
}

fn default_obstacle_label() -> String {
    "obstacle".to_string()
}

impl Command {
    /// Wire name of the command, as used in rejection events
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::SetSpeed { .. } => "set-speed",
            Command::CreateTask { .. } => "create-task",
            Command::CreateTaskBulk { .. } => "create-task-bulk",
            Command::CancelTask { .. } => "cancel-task",
            Command::AssignTask { .. } => "assign-task",
            Command::MoveRobot { .. } => "move-robot",
            Command::StopRobot { .. } => "stop-robot",
            Command::SpawnObject { .. } => "spawn-object",
            Command::SpawnRobot { .. } => "spawn-robot",
            Command::RecoverRobot { .. } => "recover-robot",
            Command::PlaceObstacle { .. } => "place-obstacle",
            Command::ClearObstacle { .. } => "clear-obstacle",
            Command::RequestAutoSchedule => "request-auto-schedule",
        }
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Ids reserved for a command at admission. Events raised when the command
/// is applied refer to these ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accepted {
    pub tasks: Vec<TaskId>,
    pub object: Option<ObjectId>,
    pub robot: Option<RobotId>,
    pub obstacle: Option<ObstacleId>,
}

impl Accepted {
    pub fn task(&self) -> Option<TaskId> {
        self.tasks.first().copied()
    }
}

/// An admitted command waiting for the next tick
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub command: Command,
    pub receipt: Accepted,
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Bounded FIFO of admitted commands, with optional history
#[derive(Debug)]
pub struct CommandQueue {
    pending: VecDeque<QueuedCommand>,
    capacity: usize,
    /// Applied commands: (tick, command)
    history: Vec<(u64, Command)>,
    /// 0 = no history
    max_history: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_max_history(capacity, 0)
    }

    pub fn with_max_history(capacity: usize, max_history: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity,
            history: Vec::new(),
            max_history,
        }
    }

    pub fn push(&mut self, queued: QueuedCommand) -> Result<(), AdmissionError> {
        if self.pending.len() >= self.capacity {
            return Err(AdmissionError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.pending.push_back(queued);
        Ok(())
    }

    /// Take every pending command in arrival order, recording them in the
    /// history under `tick`
    pub fn drain(&mut self, tick: u64) -> Vec<QueuedCommand> {
        let commands: Vec<QueuedCommand> = self.pending.drain(..).collect();

        if self.max_history > 0 {
            for queued in &commands {
                self.history.push((tick, queued.command.clone()));
            }
            let excess = self.history.len().saturating_sub(self.max_history);
            if excess > 0 {
                self.history.drain(..excess);
            }
        }

        commands
    }

    /// Pending commands in arrival order
    pub fn iter_pending(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn history(&self) -> &[(u64, Command)] {
        &self.history
    }
}

// ===========================================================================
// Tests
// ===========================================================================
