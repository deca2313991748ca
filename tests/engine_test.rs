//! Engine scenarios: admission, the tick loop and run control

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use site_sim::simulation::{
    AdmissionError, Command, EventKind, MaterialType, ObjectStatus, ObserverError, Position,
    RobotId, RobotState, RunStatus, SimEngine, SimEvent, SimId, SimObserver, StepKind, TaskId,
    TaskKind, TaskPriority, TaskStatus, WorldSnapshot, ZoneId,
};

#[test]
fn test_pick_and_place_completes() {
    let mut engine = engine(yard_config());
    let staging_before = engine.snapshot().zone(STAGING).unwrap().occupancy;
    let storage_before = engine.snapshot().zone(STORAGE).unwrap().occupancy;
    let task = start_with_task(&mut engine, CEMENT, YARD_ROBOT);

    let done = run_until(&mut engine, 400, |engine| {
        engine.world().tasks[&task].status == TaskStatus::Completed
    });
    assert!(done, "task did not complete: {:?}", engine.world().tasks[&task]);

    let snapshot = engine.snapshot();
    let object = snapshot.object(CEMENT).unwrap();
    assert_eq!(object.status, ObjectStatus::Placed);
    assert_eq!(object.holder, None);
    assert_eq!(object.zone, Some(STAGING));
    assert_eq!(snapshot.zone(STAGING).unwrap().occupancy, staging_before + 1);
    assert_eq!(snapshot.zone(STORAGE).unwrap().occupancy, storage_before - 1);

    let robot = snapshot.robot(YARD_ROBOT).unwrap();
    assert_eq!(robot.state, RobotState::Idle);
    assert_eq!(robot.task, None);
    assert_eq!(robot.held_object, None);
    assert_eq!(robot.tasks_completed, 1);
    assert!(robot.battery < 100.0);

    assert_eq!(snapshot.metrics.tasks_completed, 1);
    assert_eq!(snapshot.metrics.completion_rate, 1.0);
    assert!(snapshot.metrics.average_task_duration > 0.0);
    assert_eq!(
        engine
            .recent_events()
            .of_kind(EventKind::TaskCompleted)
            .count(),
        1
    );
}

/// Start the engine with a task of `kind` moving the cement bag to staging
fn start_kind(engine: &mut SimEngine, kind: TaskKind) -> TaskId {
    engine.submit(Command::Start).unwrap();
    engine
        .submit(Command::CreateTask {
            object: CEMENT,
            zone: STAGING,
            robot: Some(YARD_ROBOT),
            kind,
            priority: TaskPriority::Normal,
        })
        .unwrap()
        .task()
        .unwrap()
}

#[test]
fn test_inspect_visits_without_handling() {
    let mut engine = engine(yard_config());
    let cement_at = engine.world().objects[&CEMENT].position;
    let task = start_kind(&mut engine, TaskKind::Inspect);
    engine.tick();
    assert_eq!(engine.world().tasks[&task].steps.len(), 2);

    assert!(run_until(&mut engine, 400, |engine| {
        engine.world().tasks[&task].status == TaskStatus::Completed
    }));

    let object = &engine.world().objects[&CEMENT];
    assert_eq!(object.status, ObjectStatus::Available);
    assert_eq!(object.holder, None);
    assert_eq!(object.position, cement_at);
    assert_eq!(object.zone, Some(STORAGE));

    let robot = &engine.world().robots[&YARD_ROBOT];
    assert_eq!(robot.pick_attempts, 0);
    assert_eq!(robot.held_object, None);
    assert_eq!(robot.tasks_completed, 1);
    assert!(robot.position().distance(&Position::new(17.0, 3.0)) < 0.5);
}

#[test]
fn test_transport_drops_at_zone_centre() {
    let mut engine = engine(yard_config());
    let task = start_kind(&mut engine, TaskKind::Transport);
    engine.tick();
    let centre = Position::new(17.0, 3.0);
    assert_eq!(engine.world().tasks[&task].drop_target(), Some(centre));

    assert!(run_until(&mut engine, 400, |engine| {
        engine.world().tasks[&task].status == TaskStatus::Completed
    }));

    let object = &engine.world().objects[&CEMENT];
    assert_eq!(object.status, ObjectStatus::Placed);
    assert_eq!(object.zone, Some(STAGING));
    assert!(object.position.distance(&centre) < 0.5);
}

/// Ticks the yard robot spends placing the cement bag for a task of `kind`
fn placing_ticks(kind: TaskKind) -> u64 {
    let mut config = yard_config();
    config.robots.place_duration_secs = 2.0;
    let mut engine = engine(config);
    let task = start_kind(&mut engine, kind);

    let mut placing = 0;
    assert!(run_until(&mut engine, 600, |engine| {
        if engine.world().robots[&YARD_ROBOT].state == RobotState::Placing {
            placing += 1;
        }
        engine.world().tasks[&task].status == TaskStatus::Completed
    }));

    let place = engine.world().tasks[&task].steps[3];
    assert_eq!(place.kind, StepKind::Placing);
    let expected = if kind == TaskKind::Assemble { 4.0 } else { 2.0 };
    assert_eq!(place.duration_secs, expected);
    placing
}

#[test]
fn test_assemble_places_twice_as_long() {
    let plain = placing_ticks(TaskKind::PickAndPlace);
    let assemble = placing_ticks(TaskKind::Assemble);
    assert!(plain > 0);
    assert!(
        assemble >= 2 * plain && assemble <= 2 * plain + 2,
        "assemble placed for {} ticks, pick-and-place for {}",
        assemble,
        plain
    );
}

#[test]
fn test_task_assigned_within_one_tick() {
    let mut engine = engine(yard_config());
    let task = start_with_task(&mut engine, CEMENT, YARD_ROBOT);

    let snapshot = engine.tick().expect("first tick publishes");
    let sim_task = snapshot.task(task).unwrap();
    assert!(matches!(
        sim_task.status,
        TaskStatus::Assigned | TaskStatus::InProgress
    ));
    assert_eq!(sim_task.robot, Some(YARD_ROBOT));
    assert_eq!(snapshot.robot(YARD_ROBOT).unwrap().task, Some(task));

    let kinds: Vec<EventKind> = engine.recent_events().iter().map(SimEvent::kind).collect();
    let created = kinds.iter().position(|k| *k == EventKind::TaskCreated);
    let assigned = kinds.iter().position(|k| *k == EventKind::TaskAssigned);
    assert!(created.is_some() && assigned.is_some());
    assert!(created < assigned);
}

#[test]
fn test_create_task_without_robot_picks_nearest() {
    let mut engine = engine(yard_config());
    engine.submit(Command::Start).unwrap();
    let task = engine
        .submit(place(CRATE, STAGING, None))
        .unwrap()
        .task()
        .unwrap();
    engine.tick();
    assert_eq!(engine.world().tasks[&task].robot, Some(YARD_ROBOT));
}

#[test]
fn test_unavailable_object_is_rejected() {
    let mut engine = engine(yard_config());
    let task = start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    assert!(run_until(&mut engine, 400, |engine| {
        engine.world().tasks[&task].status == TaskStatus::Completed
    }));

    let tasks_before = engine.world().tasks.len();
    let result = engine.submit(place(CEMENT, STORAGE, None));
    assert_eq!(
        result,
        Err(AdmissionError::ObjectUnavailable {
            object: CEMENT,
            status: ObjectStatus::Placed,
        })
    );
    engine.tick();
    assert_eq!(engine.world().tasks.len(), tasks_before);
    assert_eq!(engine.pending_commands(), 0);
}

#[test]
fn test_queued_task_reserves_its_object() {
    let mut engine = engine(yard_config());
    let first = engine.submit(place(CEMENT, STAGING, None)).unwrap();
    let second = engine.submit(place(CEMENT, STAGING, None));
    assert_eq!(
        second,
        Err(AdmissionError::ObjectReserved {
            object: CEMENT,
            task: first.task().unwrap(),
        })
    );

    engine.tick();
    assert_eq!(engine.world().tasks.len(), 1);
    assert!(matches!(
        engine.submit(place(CEMENT, STAGING, None)),
        Err(AdmissionError::ObjectReserved { .. })
    ));
}

#[test]
fn test_payload_and_unknown_entities_rejected() {
    let mut engine = engine(yard_config());

    // A 400 kg pallet is too heavy for a pick-and-place robot
    assert!(matches!(
        engine.submit(place(PALLET, STAGING, Some(YARD_ROBOT))),
        Err(AdmissionError::PayloadExceeded { .. })
    ));
    assert!(matches!(
        engine.submit(place(CEMENT, ZoneId(SimId(99)), None)),
        Err(AdmissionError::UnknownZone(_))
    ));
    assert!(matches!(
        engine.submit(place(CEMENT, STAGING, Some(RobotId(SimId(99))))),
        Err(AdmissionError::UnknownRobot(_))
    ));
    assert_eq!(engine.pending_commands(), 0);
}

#[test]
fn test_busy_robot_rejected() {
    let mut engine = engine(yard_config());
    start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    engine.tick();

    let result = engine.submit(place(CRATE, STAGING, Some(YARD_ROBOT)));
    assert!(matches!(result, Err(AdmissionError::RobotBusy { .. })));
}

#[test]
fn test_blocked_route_fails_after_retries() {
    let mut engine = engine(walled_config());
    let task = start_with_task(&mut engine, WALLED_CEMENT, WALLED_ROBOT);

    assert!(run_until(&mut engine, 200, |engine| {
        engine.world().tasks[&task].status.is_terminal()
    }));

    let sim_task = &engine.world().tasks[&task];
    assert_eq!(sim_task.status, TaskStatus::Failed);
    assert_eq!(sim_task.retry_count, 3);
    let reason = sim_task.failure_reason.as_deref().unwrap_or_default();
    assert!(reason.starts_with("no path"), "unexpected reason: {}", reason);

    let robot = &engine.world().robots[&WALLED_ROBOT];
    assert_eq!(robot.state, RobotState::Idle);
    assert_eq!(robot.task, None);
    assert_eq!(robot.tasks_failed, 1);
    assert_eq!(
        engine.world().objects[&WALLED_CEMENT].status,
        ObjectStatus::Available
    );

    // Retries are silent; only the final failure is announced
    assert_eq!(
        engine.recent_events().of_kind(EventKind::TaskFailed).count(),
        1
    );
}

#[test]
fn test_pause_freezes_state() {
    let mut engine = engine(yard_config());
    start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    engine.run_ticks(20);

    engine.submit(Command::Pause).unwrap();
    engine.tick();
    assert_eq!(engine.status(), RunStatus::Paused);
    let frozen = engine.snapshot();

    // Nothing happens while paused, so nothing is published
    for _ in 0..5 {
        assert!(engine.tick().is_none());
    }
    assert_eq!(engine.snapshot(), frozen);

    // A second pause is accepted and changes nothing
    engine.submit(Command::Pause).unwrap();
    engine.tick();
    assert_eq!(engine.snapshot(), frozen);
    assert_eq!(
        engine
            .recent_events()
            .of_kind(EventKind::RunStatusChanged)
            .count(),
        2
    );

    engine.submit(Command::Start).unwrap();
    engine.tick();
    assert_eq!(engine.status(), RunStatus::Running);
    assert_eq!(engine.tick_count(), frozen.tick + 1);
}

#[test]
fn test_stop_resets_clock() {
    let mut engine = engine(yard_config());
    start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    engine.run_ticks(10);
    assert_eq!(engine.tick_count(), 10);

    engine.submit(Command::Stop).unwrap();
    engine.tick();
    assert_eq!(engine.status(), RunStatus::Stopped);
    assert_eq!(engine.tick_count(), 0);
    assert_eq!(engine.world().time, 0.0);

    // Robots keep their place while stopped
    let position = engine.world().robots[&YARD_ROBOT].position();
    engine.run_ticks(5);
    assert_eq!(engine.world().robots[&YARD_ROBOT].position(), position);
}

#[test]
fn test_stop_keeps_task_durations_positive() {
    let mut engine = engine(yard_config());
    engine.submit(Command::Start).unwrap();
    engine.run_ticks(200);
    let task = engine
        .submit(place(CEMENT, STAGING, Some(YARD_ROBOT)))
        .unwrap()
        .task()
        .unwrap();
    engine.run_ticks(30);
    let started = engine.world().tasks[&task].started_at.unwrap();
    assert!(started > 20.0);

    engine.submit(Command::Stop).unwrap();
    engine.tick();
    // Elapsed work time survives the clock restart
    let shifted = engine.world().tasks[&task].started_at.unwrap();
    assert!(shifted <= 0.0);

    engine.submit(Command::Start).unwrap();
    assert!(run_until(&mut engine, 400, |engine| {
        engine.world().tasks[&task].status == TaskStatus::Completed
    }));

    let sim_task = &engine.world().tasks[&task];
    let duration = sim_task.duration().unwrap();
    assert!(duration > 0.0, "duration {}", duration);
    assert!(sim_task.completed_at.unwrap() >= sim_task.started_at.unwrap());
    assert!(engine.metrics().average_task_duration >= 0.0);
    assert!((engine.metrics().average_task_duration - duration).abs() < 1e-6);
}

#[test]
fn test_reset_restores_configured_world() {
    let mut engine = engine(yard_config());
    let initial = engine.snapshot();
    start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    engine.run_ticks(80);
    assert_ne!(
        engine.world().robots[&YARD_ROBOT].position(),
        initial.robot(YARD_ROBOT).unwrap().pose.position
    );

    engine.submit(Command::Reset).unwrap();
    engine.submit(Command::Start).unwrap();
    engine.tick();

    assert_eq!(engine.status(), RunStatus::Stopped);
    assert!(engine.world().tasks.is_empty());
    assert_eq!(
        engine.world().objects[&CEMENT].position,
        initial.object(CEMENT).unwrap().position
    );
    assert_eq!(engine.world().objects[&CEMENT].status, ObjectStatus::Available);
    assert_eq!(engine.world().robots[&YARD_ROBOT].battery, 100.0);

    // The start queued behind the reset was dropped
    let rejected: Vec<&SimEvent> = engine
        .recent_events()
        .of_kind(EventKind::CommandRejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0],
        SimEvent::CommandRejected { command, .. } if command == "start"
    ));

    // History of the old world is gone; only the reset tick remains
    let log = engine.recent_events();
    assert_eq!(log.len(), 3);
    assert_eq!(log.of_kind(EventKind::WorldReset).count(), 1);
    assert_eq!(log.of_kind(EventKind::RunStatusChanged).count(), 1);
    assert_eq!(log.of_kind(EventKind::TaskCreated).count(), 0);
}

#[test]
fn test_speed_scales_progress() {
    let mut normal = engine(yard_config());
    start_with_task(&mut normal, CEMENT, YARD_ROBOT);

    let mut fast = engine(yard_config());
    fast.submit(Command::SetSpeed { multiplier: 2.0 }).unwrap();
    start_with_task(&mut fast, CEMENT, YARD_ROBOT);

    normal.run_ticks(10);
    fast.run_ticks(10);

    assert_eq!(fast.speed(), 2.0);
    assert!((fast.world().time - 2.0 * normal.world().time).abs() < 1e-6);
    let slow_distance = normal.world().robots[&YARD_ROBOT].distance_traveled;
    let fast_distance = fast.world().robots[&YARD_ROBOT].distance_traveled;
    assert!((fast_distance - 2.0 * slow_distance).abs() < 1e-3);
    assert_eq!(
        fast.recent_events().of_kind(EventKind::SpeedChanged).count(),
        1
    );
}

#[test]
fn test_invalid_speed_rejected() {
    let mut engine = engine(yard_config());
    assert_eq!(
        engine.submit(Command::SetSpeed { multiplier: 6.0 }),
        Err(AdmissionError::InvalidSpeed(6.0))
    );
    assert_eq!(
        engine.submit(Command::SetSpeed { multiplier: 0.05 }),
        Err(AdmissionError::InvalidSpeed(0.05))
    );
    assert!(engine.submit(Command::SetSpeed { multiplier: 5.0 }).is_ok());
}

#[test]
fn test_cancel_releases_robot_and_object() {
    let mut engine = engine(yard_config());
    let task = start_with_task(&mut engine, CEMENT, YARD_ROBOT);
    assert!(run_until(&mut engine, 200, |engine| {
        engine.world().robots[&YARD_ROBOT].held_object.is_some()
    }));

    engine.submit(Command::CancelTask { task }).unwrap();
    engine.tick();

    let world = engine.world();
    assert_eq!(world.tasks[&task].status, TaskStatus::Cancelled);
    assert_eq!(world.tasks[&task].robot, None);
    let robot = &world.robots[&YARD_ROBOT];
    assert_eq!(robot.state, RobotState::Idle);
    assert_eq!(robot.task, None);
    assert_eq!(robot.held_object, None);
    let object = &world.objects[&CEMENT];
    assert_eq!(object.status, ObjectStatus::Available);
    assert_eq!(object.holder, None);
    assert!(world.check_invariants().is_ok());

    // Terminal tasks cannot be cancelled twice
    assert!(matches!(
        engine.submit(Command::CancelTask { task }),
        Err(AdmissionError::TaskTerminal { .. })
    ));
}

#[test]
fn test_queue_capacity_enforced() {
    let mut config = yard_config();
    config.engine.command_queue_capacity = 2;
    let mut engine = engine(config);

    engine.submit(Command::Start).unwrap();
    engine.submit(Command::Pause).unwrap();
    assert_eq!(
        engine.submit(Command::Stop),
        Err(AdmissionError::QueueFull { capacity: 2 })
    );

    engine.tick();
    assert_eq!(engine.pending_commands(), 0);
    assert!(engine.submit(Command::Stop).is_ok());
}

#[test]
fn test_bulk_request_skips_ineligible_objects() {
    let mut engine = engine(yard_config());
    let receipt = engine
        .submit(Command::CreateTaskBulk {
            objects: vec![CEMENT, PALLET, CRATE, CEMENT],
            zone: STAGING,
            auto_assign: true,
            kind: TaskKind::PickAndPlace,
            priority: TaskPriority::Normal,
        })
        .unwrap();
    assert_eq!(receipt.tasks.len(), 3);
    engine.tick();

    let statuses: Vec<TaskStatus> = receipt
        .tasks
        .iter()
        .map(|task| engine.world().tasks[task].status)
        .collect();
    // One robot: the first task takes it, the rest wait
    assert_eq!(
        statuses,
        vec![TaskStatus::Assigned, TaskStatus::Pending, TaskStatus::Pending]
    );

    // Every object is now claimed
    assert_eq!(
        engine.submit(Command::CreateTaskBulk {
            objects: vec![CEMENT, CRATE],
            zone: STAGING,
            auto_assign: false,
            kind: TaskKind::PickAndPlace,
            priority: TaskPriority::Normal,
        }),
        Err(AdmissionError::EmptyRequest)
    );
}

/// Records every snapshot tick; fails once it has seen `fail_after`
struct Flaky {
    seen: Arc<Mutex<Vec<u64>>>,
    fail_after: usize,
}

impl SimObserver for Flaky {
    fn on_snapshot(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<(), ObserverError> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(snapshot.tick);
        if seen.len() > self.fail_after {
            Err(ObserverError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[test]
fn test_failing_observer_is_dropped() {
    let mut engine = engine(yard_config());
    let steady = Arc::new(Mutex::new(Vec::new()));
    let flaky = Arc::new(Mutex::new(Vec::new()));
    engine
        .subscribe(Box::new(Flaky {
            seen: Arc::clone(&steady),
            fail_after: usize::MAX,
        }))
        .unwrap();
    engine
        .subscribe(Box::new(Flaky {
            seen: Arc::clone(&flaky),
            fail_after: 2,
        }))
        .unwrap();
    assert_eq!(engine.observer_count(), 2);

    engine.submit(Command::Start).unwrap();
    engine.run_ticks(5);

    assert_eq!(engine.observer_count(), 1);
    // Subscription snapshot plus one per running tick
    assert_eq!(steady.lock().unwrap().len(), 6);
    assert_eq!(flaky.lock().unwrap().len(), 3);
}

#[test]
fn test_subscribe_receives_current_snapshot() {
    let mut engine = engine(yard_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.subscribe(Box::new(Flaky {
        seen: Arc::clone(&seen),
        fail_after: usize::MAX,
    }));
    assert_eq!(*seen.lock().unwrap(), vec![0]);

    // A failing first delivery means no registration
    let rejected = engine.subscribe(Box::new(Flaky {
        seen: Arc::new(Mutex::new(Vec::new())),
        fail_after: 0,
    }));
    assert!(rejected.is_none());
    assert_eq!(engine.observer_count(), 1);
}

#[test]
fn test_spawn_object_lands_in_zone() {
    let mut engine = engine(yard_config());
    let receipt = engine
        .submit(Command::SpawnObject {
            material: MaterialType::Lumber,
            zone: STAGING,
        })
        .unwrap();
    let object = receipt.object.unwrap();
    engine.tick();

    let sim_object = &engine.world().objects[&object];
    assert_eq!(sim_object.status, ObjectStatus::Available);
    assert_eq!(sim_object.zone, Some(STAGING));
    assert!(engine.world().zones[&STAGING].contents.contains(&object));
    assert_eq!(
        engine.recent_events().of_kind(EventKind::ObjectSpawned).count(),
        1
    );
}

#[test]
fn test_command_history_records_applied_commands() {
    let mut engine = engine(yard_config());
    engine.submit(Command::Start).unwrap();
    engine.submit(Command::RequestAutoSchedule).unwrap();
    engine.tick();

    let names: Vec<&str> = engine
        .command_history()
        .iter()
        .map(|(_, command)| command.name())
        .collect();
    assert_eq!(names, vec!["start", "request-auto-schedule"]);
    assert_eq!(
        engine
            .recent_events()
            .of_kind(EventKind::AutoScheduleRequested)
            .count(),
        1
    );
}
