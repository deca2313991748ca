//! Events and snapshot subscribers
//!
//! Every tick the engine hands its events and then the snapshot to each
//! registered [`SimObserver`]. An observer that reports an error is dropped
//! on the spot; the others and the tick carry on.

use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::error::ObserverError;
use super::snapshot::WorldSnapshot;
use super::task::TaskKind;
use super::types::{
    MaterialType, ObjectId, RobotCategory, RobotId, RunStatus, TaskId, ZoneId,
};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A discrete notification. All events carry the tick at which they were
/// raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // -- Tasks --
    TaskCreated {
        tick: u64,
        task: TaskId,
        kind: TaskKind,
        object: ObjectId,
        zone: ZoneId,
        robot: Option<RobotId>,
    },
    TaskAssigned {
        tick: u64,
        task: TaskId,
        robot: RobotId,
    },
    TaskCompleted {
        tick: u64,
        task: TaskId,
        robot: RobotId,
        duration_secs: f64,
    },
    TaskFailed {
        tick: u64,
        task: TaskId,
        robot: Option<RobotId>,
        reason: String,
        retry_count: u32,
    },
    TaskCancelled {
        tick: u64,
        task: TaskId,
    },
    TaskRequeued {
        tick: u64,
        task: TaskId,
        robot: RobotId,
        resume_step: usize,
    },

    // -- Engine --
    CommandRejected {
        tick: u64,
        command: String,
        reason: String,
    },
    RunStatusChanged {
        tick: u64,
        from: RunStatus,
        to: RunStatus,
    },
    SpeedChanged {
        tick: u64,
        speed: f32,
    },
    AutoScheduleRequested {
        tick: u64,
    },
    WorldReset {
        tick: u64,
    },

    // -- Fleet --
    RobotSpawned {
        tick: u64,
        robot: RobotId,
        category: RobotCategory,
    },
    RobotRerouted {
        tick: u64,
        robot: RobotId,
        attempt: u32,
    },
    RobotLowBattery {
        tick: u64,
        robot: RobotId,
        battery: f32,
    },
    RobotCharged {
        tick: u64,
        robot: RobotId,
    },
    RobotFault {
        tick: u64,
        robot: RobotId,
        reason: String,
    },
    RobotRecovered {
        tick: u64,
        robot: RobotId,
    },

    // -- Site --
    ObjectSpawned {
        tick: u64,
        object: ObjectId,
        material: MaterialType,
        zone: ZoneId,
    },
    LayoutChanged {
        tick: u64,
        version: u64,
    },
}

/// Discriminant of [`SimEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskRequeued,
    CommandRejected,
    RunStatusChanged,
    SpeedChanged,
    AutoScheduleRequested,
    WorldReset,
    RobotSpawned,
    RobotRerouted,
    RobotLowBattery,
    RobotCharged,
    RobotFault,
    RobotRecovered,
    ObjectSpawned,
    LayoutChanged,
}

impl SimEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SimEvent::TaskCreated { .. } => EventKind::TaskCreated,
            SimEvent::TaskAssigned { .. } => EventKind::TaskAssigned,
            SimEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            SimEvent::TaskFailed { .. } => EventKind::TaskFailed,
            SimEvent::TaskCancelled { .. } => EventKind::TaskCancelled,
            SimEvent::TaskRequeued { .. } => EventKind::TaskRequeued,
            SimEvent::CommandRejected { .. } => EventKind::CommandRejected,
            SimEvent::RunStatusChanged { .. } => EventKind::RunStatusChanged,
            SimEvent::SpeedChanged { .. } => EventKind::SpeedChanged,
            SimEvent::AutoScheduleRequested { .. } => EventKind::AutoScheduleRequested,
            SimEvent::WorldReset { .. } => EventKind::WorldReset,
            SimEvent::RobotSpawned { .. } => EventKind::RobotSpawned,
            SimEvent::RobotRerouted { .. } => EventKind::RobotRerouted,
            SimEvent::RobotLowBattery { .. } => EventKind::RobotLowBattery,
            SimEvent::RobotCharged { .. } => EventKind::RobotCharged,
            SimEvent::RobotFault { .. } => EventKind::RobotFault,
            SimEvent::RobotRecovered { .. } => EventKind::RobotRecovered,
            SimEvent::ObjectSpawned { .. } => EventKind::ObjectSpawned,
            SimEvent::LayoutChanged { .. } => EventKind::LayoutChanged,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            SimEvent::TaskCreated { tick, .. }
            | SimEvent::TaskAssigned { tick, .. }
            | SimEvent::TaskCompleted { tick, .. }
            | SimEvent::TaskFailed { tick, .. }
            | SimEvent::TaskCancelled { tick, .. }
            | SimEvent::TaskRequeued { tick, .. }
            | SimEvent::CommandRejected { tick, .. }
            | SimEvent::RunStatusChanged { tick, .. }
            | SimEvent::SpeedChanged { tick, .. }
            | SimEvent::AutoScheduleRequested { tick }
            | SimEvent::WorldReset { tick }
            | SimEvent::RobotSpawned { tick, .. }
            | SimEvent::RobotRerouted { tick, .. }
            | SimEvent::RobotLowBattery { tick, .. }
            | SimEvent::RobotCharged { tick, .. }
            | SimEvent::RobotFault { tick, .. }
            | SimEvent::RobotRecovered { tick, .. }
            | SimEvent::ObjectSpawned { tick, .. }
            | SimEvent::LayoutChanged { tick, .. } => *tick,
        }
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Bounded history of recent events; the oldest entries fall off.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<SimEvent>,
    capacity: usize,
    total_written: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: SimEvent) {
        self.total_written += 1;
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events ever pushed, including the ones no longer retained
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }

    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &SimEvent> {
        self.events.iter().filter(move |event| event.kind() == kind)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// A subscriber to the engine's publications
pub trait SimObserver: Send {
    fn on_snapshot(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<(), ObserverError>;

    fn on_event(&mut self, _event: &SimEvent) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// What a [`ChannelObserver`] forwards
#[derive(Debug, Clone)]
pub enum Publication {
    Snapshot(Arc<WorldSnapshot>),
    Event(SimEvent),
}

/// Forwards publications over a bounded channel without ever blocking the
/// engine. When the receiver falls behind, the publication is dropped for
/// this subscriber only.
pub struct ChannelObserver {
    sender: SyncSender<Publication>,
    dropped: u64,
}

impl ChannelObserver {
    pub fn new(sender: SyncSender<Publication>) -> Self {
        Self { sender, dropped: 0 }
    }

    /// Create an observer together with the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, Receiver<Publication>) {
        let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
        (Self::new(sender), receiver)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn forward(&mut self, publication: Publication) -> Result<(), ObserverError> {
        match self.sender.try_send(publication) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(ObserverError::Disconnected),
        }
    }
}

impl SimObserver for ChannelObserver {
    fn on_snapshot(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<(), ObserverError> {
        self.forward(Publication::Snapshot(Arc::clone(snapshot)))
    }

    fn on_event(&mut self, event: &SimEvent) -> Result<(), ObserverError> {
        self.forward(Publication::Event(event.clone()))
    }
}

/// Writes one JSON document per line: `{"event": ...}` or `{"snapshot": ...}`
///
/// Writes happen inside the publication call. Attach it directly only for
/// in-memory sinks; use [`spawn_json_lines`] for stdout, files or sockets.
pub struct JsonLinesObserver<W: Write + Send> {
    writer: W,
    snapshots: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum JsonLine<'a> {
    Event(&'a SimEvent),
    Snapshot(&'a WorldSnapshot),
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            snapshots: true,
        }
    }

    /// Only write events, skipping the per-tick snapshots
    pub fn events_only(writer: W) -> Self {
        Self {
            writer,
            snapshots: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &JsonLine<'_>) -> Result<(), ObserverError> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write + Send> SimObserver for JsonLinesObserver<W> {
    fn on_snapshot(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<(), ObserverError> {
        if !self.snapshots {
            return Ok(());
        }
        self.write_line(&JsonLine::Snapshot(snapshot))?;
        self.writer.flush()?;
        Ok(())
    }

    fn on_event(&mut self, event: &SimEvent) -> Result<(), ObserverError> {
        self.write_line(&JsonLine::Event(event))
    }
}

/// Write publications as JSON lines on a dedicated thread. The engine sees
/// a [`ChannelObserver`], so a slow writer loses publications instead of
/// stalling the tick. The thread ends once the observer is dropped (or on
/// the first write error) and hands the writer back.
pub fn spawn_json_lines<W>(writer: W, capacity: usize) -> (ChannelObserver, JoinHandle<W>)
where
    W: Write + Send + 'static,
{
    let (observer, receiver) = ChannelObserver::channel(capacity);
    let thread = thread::spawn(move || write_json_lines(JsonLinesObserver::new(writer), receiver));
    (observer, thread)
}

fn write_json_lines<W: Write + Send>(mut sink: JsonLinesObserver<W>, receiver: Receiver<Publication>) -> W {
    for publication in receiver {
        let result = match &publication {
            Publication::Snapshot(snapshot) => sink.on_snapshot(snapshot),
            Publication::Event(event) => sink.on_event(event),
        };
        if let Err(err) = result {
            warn!("JSON output stopped: {}", err);
            break;
        }
    }
    let mut writer = sink.into_inner();
    if let Err(err) = writer.flush() {
        warn!("JSON output flush failed: {}", err);
    }
    writer
}

/// Registered observers with per-observer failure isolation
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<(usize, Box<dyn SimObserver>)>,
    next_id: usize,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and return its handle
    pub fn add(&mut self, observer: Box<dyn SimObserver>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: usize) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver the events, then the snapshot, to every observer. Observers
    /// that fail are removed. Returns how many were removed.
    pub fn publish(&mut self, events: &[SimEvent], snapshot: &Arc<WorldSnapshot>) -> usize {
        let before = self.observers.len();
        self.observers.retain_mut(|(id, observer)| {
            let result = events
                .iter()
                .try_for_each(|event| observer.on_event(event))
                .and_then(|()| observer.on_snapshot(snapshot));
            match result {
                Ok(()) => true,
                Err(err) => {
                    info!("Removing observer {}: {}", id, err);
                    false
                }
            }
        });
        before - self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(tick: u64) -> SimEvent {
        SimEvent::WorldReset { tick }
    }

    #[test]
    fn event_log_drops_oldest() {
        let mut log = EventLog::new(2);
        log.push(created(1));
        log.push(created(2));
        log.push(created(3));
        let ticks: Vec<u64> = log.iter().map(SimEvent::tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert_eq!(log.total_written(), 3);
    }

    #[test]
    fn zero_capacity_log_keeps_nothing() {
        let mut log = EventLog::new(0);
        log.push(created(1));
        assert!(log.is_empty());
        assert_eq!(log.total_written(), 1);
    }

    #[test]
    fn full_channel_drops_without_error() {
        let (mut observer, receiver) = ChannelObserver::channel(1);
        assert!(observer.on_event(&created(1)).is_ok());
        assert!(observer.on_event(&created(2)).is_ok());
        assert_eq!(observer.dropped(), 1);
        drop(receiver);
        assert!(matches!(
            observer.on_event(&created(3)),
            Err(ObserverError::Disconnected)
        ));
    }

    #[test]
    fn json_lines_are_tagged_by_type() {
        let mut observer = JsonLinesObserver::events_only(Vec::new());
        observer
            .on_event(&SimEvent::SpeedChanged { tick: 4, speed: 2.0 })
            .unwrap();
        let text = String::from_utf8(observer.into_inner()).unwrap();
        assert_eq!(
            text,
            "{\"event\":{\"type\":\"speed_changed\",\"tick\":4,\"speed\":2.0}}\n"
        );
    }
}
