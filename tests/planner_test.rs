//! The external scheduler and the threaded engine runner

mod common;

use std::time::{Duration, Instant};

use common::*;
use site_sim::simulation::{
    AutoScheduler, ChannelObserver, Command, ObjectId, Publication, RobotId, SimConfig, SimEngine,
    SimRunner, TaskKind, TaskPriority, TaskStatus, ZoneId,
};

fn queue(objects: Vec<ObjectId>, zone: ZoneId, priority: TaskPriority) -> Command {
    Command::CreateTaskBulk {
        objects,
        zone,
        auto_assign: false,
        kind: TaskKind::PickAndPlace,
        priority,
    }
}

/// Poll `check` until it holds or `timeout` passes
fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_plan_serves_priority_then_payload() {
    let mut engine = engine(yard_config());
    let pallet = engine
        .submit(queue(vec![PALLET], STAGING, TaskPriority::Urgent))
        .unwrap()
        .tasks[0];
    let cement = engine
        .submit(queue(vec![CEMENT], STAGING, TaskPriority::Normal))
        .unwrap()
        .tasks[0];
    engine
        .submit(queue(vec![CRATE], STAGING, TaskPriority::High))
        .unwrap();
    engine.tick();

    let snapshot = engine.last_snapshot().unwrap();
    assert_eq!(snapshot.pending_tasks().count(), 3);

    // The urgent pallet is too heavy for the only robot; the high-priority
    // crate comes next
    let plan = AutoScheduler::new().plan(&snapshot);
    assert_eq!(plan.len(), 1);
    let Command::AssignTask { task, robot } = plan[0] else {
        panic!("planner produced {:?}", plan[0]);
    };
    assert_ne!(task, pallet);
    assert_ne!(task, cement);
    assert_eq!(robot, YARD_ROBOT);

    for command in plan {
        engine.submit(command).unwrap();
    }
    engine.tick();
    assert_eq!(engine.world().tasks[&task].status, TaskStatus::Assigned);
}

#[test]
fn test_plan_spreads_over_free_robots() {
    let mut config = SimConfig::default();
    config.sensors.enabled = false;
    let mut engine = SimEngine::new(config).unwrap();
    let objects = engine.available_objects();
    let zone = engine.world().zones.keys().copied().nth(1).unwrap();
    engine
        .submit(queue(objects, zone, TaskPriority::Normal))
        .unwrap();
    engine.tick();
    let snapshot = engine.last_snapshot().unwrap();

    let capped = AutoScheduler {
        max_assignments: Some(2),
    };
    assert_eq!(capped.plan(&snapshot).len(), 2);

    let plan = AutoScheduler::new().plan(&snapshot);
    assert_eq!(plan.len(), 4);
    let mut robots: Vec<RobotId> = plan
        .iter()
        .filter_map(|command| match command {
            Command::AssignTask { robot, .. } => Some(*robot),
            _ => None,
        })
        .collect();
    robots.sort();
    robots.dedup();
    assert_eq!(robots.len(), 4);

    for command in plan {
        assert!(engine.submit(command).is_ok());
    }
}

#[test]
fn test_plan_skips_robots_below_floor() {
    let mut config = yard_config();
    config.layout.robots[0].battery = 25.0;
    let mut engine = engine(config);
    engine
        .submit(queue(vec![CEMENT], STAGING, TaskPriority::Normal))
        .unwrap();
    engine.tick();
    assert!(AutoScheduler::new()
        .plan(&engine.last_snapshot().unwrap())
        .is_empty());
}

#[test]
fn test_runner_ticks_on_its_own_thread() {
    let runner = SimRunner::spawn(engine(yard_config()), Duration::from_millis(1), 64);
    let handle = runner.handle();

    let (observer, publications) = ChannelObserver::channel(4096);
    assert!(handle.subscribe(Box::new(observer)).is_some());
    assert!(matches!(
        publications.recv_timeout(Duration::from_secs(1)),
        Ok(Publication::Snapshot(_))
    ));

    handle.submit(Command::Start).unwrap();
    let task = handle
        .submit(place(CEMENT, STAGING, Some(YARD_ROBOT)))
        .unwrap()
        .task()
        .unwrap();

    let completed = wait_for(Duration::from_secs(20), || {
        handle
            .snapshot()
            .and_then(|snapshot| snapshot.task(task).map(|t| t.status))
            == Some(TaskStatus::Completed)
    });
    assert!(completed);

    let engine = runner.shutdown().expect("engine thread exits cleanly");
    assert!(engine.tick_count() > 0);
    assert_eq!(engine.world().tasks[&task].status, TaskStatus::Completed);
    assert!(handle.submit(Command::Pause).is_err());
}

#[test]
fn test_attached_planner_answers_schedule_requests() {
    let mut runner = SimRunner::spawn(engine(yard_config()), Duration::from_millis(2), 64);
    assert!(runner.attach_planner(AutoScheduler::new()));
    assert!(!runner.attach_planner(AutoScheduler::new()));
    let handle = runner.handle();

    let task = handle
        .submit(queue(vec![CEMENT], STAGING, TaskPriority::Normal))
        .unwrap()
        .tasks[0];
    handle.submit(Command::RequestAutoSchedule).unwrap();

    let assigned = wait_for(Duration::from_secs(10), || {
        handle
            .snapshot()
            .and_then(|snapshot| snapshot.task(task).map(|t| t.robot))
            == Some(Some(YARD_ROBOT))
    });
    assert!(assigned);

    let engine = runner.shutdown().expect("engine thread exits cleanly");
    assert_eq!(engine.world().tasks[&task].status, TaskStatus::Assigned);
}
