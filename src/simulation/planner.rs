//! Greedy task scheduler that runs outside the engine
//!
//! The planner only reads snapshots and answers with assign-task commands.
//! Pending tasks are served by priority, then age; each one goes to the
//! nearest free robot that can lift the object.

use log::{debug, info};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::command::Command;
use super::error::{AdmissionError, ObserverError};
use super::event::{EventKind, SimEvent, SimObserver};
use super::runner::EngineHandle;
use super::snapshot::{RobotView, WorldSnapshot};
use super::task::Task;

#[derive(Debug, Clone, Default)]
pub struct AutoScheduler {
    /// Cap on assignments per planning round; unlimited when None
    pub max_assignments: Option<usize>,
}

impl AutoScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assignments for the pending tasks in `snapshot`
    pub fn plan(&self, snapshot: &WorldSnapshot) -> Vec<Command> {
        let mut tasks: Vec<&Task> = snapshot.pending_tasks().collect();
        tasks.sort_by_key(|task| (Reverse(task.priority), OrderedFloat(task.created_at), task.id));

        let mut free: Vec<&RobotView> = snapshot
            .robots
            .iter()
            .filter(|robot| robot.is_available(snapshot.assignment_floor))
            .collect();

        let limit = self.max_assignments.unwrap_or(usize::MAX);
        let mut commands = Vec::new();
        for task in tasks {
            if commands.len() >= limit || free.is_empty() {
                break;
            }
            let Some(object) = snapshot.object(task.object) else {
                continue;
            };
            let weight = object.weight_kg();
            let nearest = free
                .iter()
                .enumerate()
                .filter(|(_, robot)| robot.payload_kg >= weight)
                .min_by(|(_, a), (_, b)| {
                    a.pose
                        .position
                        .distance(&object.position)
                        .total_cmp(&b.pose.position.distance(&object.position))
                })
                .map(|(index, _)| index);

            if let Some(index) = nearest {
                let robot = free.swap_remove(index);
                commands.push(Command::AssignTask {
                    task: task.id,
                    robot: robot.id,
                });
            } else {
                debug!("No free robot can lift {} for {}", task.object, task.id);
            }
        }
        commands
    }
}

/// Forwards the snapshot that follows an auto-schedule request to the
/// planner thread
pub struct PlannerObserver {
    sender: SyncSender<Arc<WorldSnapshot>>,
    requested: bool,
}

impl SimObserver for PlannerObserver {
    fn on_snapshot(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<(), ObserverError> {
        if !self.requested {
            return Ok(());
        }
        match self.sender.try_send(Arc::clone(snapshot)) {
            Ok(()) => {
                self.requested = false;
                Ok(())
            }
            // Still planning the previous round; retry on the next snapshot
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(ObserverError::Disconnected),
        }
    }

    fn on_event(&mut self, event: &SimEvent) -> Result<(), ObserverError> {
        if event.kind() == EventKind::AutoScheduleRequested {
            self.requested = true;
        }
        Ok(())
    }
}

/// Start the planner thread. The returned observer must be subscribed to
/// the engine; the thread exits once the observer is dropped.
pub fn spawn(scheduler: AutoScheduler, handle: EngineHandle) -> (PlannerObserver, JoinHandle<()>) {
    let (sender, receiver) = mpsc::sync_channel(1);
    let thread = thread::spawn(move || run_planner(scheduler, handle, receiver));
    (
        PlannerObserver {
            sender,
            requested: false,
        },
        thread,
    )
}

fn run_planner(scheduler: AutoScheduler, handle: EngineHandle, receiver: Receiver<Arc<WorldSnapshot>>) {
    for snapshot in receiver {
        let commands = scheduler.plan(&snapshot);
        let mut assigned = 0;
        for command in commands {
            match handle.submit(command) {
                Ok(_) => assigned += 1,
                Err(AdmissionError::EngineStopped) => return,
                Err(err) => debug!("Planner assignment rejected: {}", err),
            }
        }
        info!("Planner round at tick {}: {} assignment(s)", snapshot.tick, assigned);
    }
}
