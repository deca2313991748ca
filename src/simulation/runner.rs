//! Engine thread
//!
//! `SimRunner` moves a [`SimEngine`] onto its own thread and ticks it at a
//! fixed wall-clock interval. Callers talk to it through cloneable
//! [`EngineHandle`]s over a bounded request channel; the engine thread is
//! the only place the world is touched.

use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::command::{Accepted, Command};
use super::engine::SimEngine;
use super::error::AdmissionError;
use super::event::SimObserver;
use super::planner::{self, AutoScheduler};
use super::snapshot::WorldSnapshot;

/// Requests served by the engine thread between ticks
pub enum EngineRequest {
    Submit {
        command: Command,
        reply: Sender<Result<Accepted, AdmissionError>>,
    },
    Subscribe {
        observer: Box<dyn SimObserver>,
        reply: Sender<Option<usize>>,
    },
    Unsubscribe {
        id: usize,
    },
    Snapshot {
        reply: Sender<Option<Arc<WorldSnapshot>>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    sender: SyncSender<EngineRequest>,
    capacity: usize,
}

impl EngineHandle {
    fn request(&self, request: EngineRequest) -> Result<(), AdmissionError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AdmissionError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(AdmissionError::EngineStopped),
        }
    }

    /// Submit a command and wait for its admission result
    pub fn submit(&self, command: Command) -> Result<Accepted, AdmissionError> {
        let (reply, response) = mpsc::channel();
        self.request(EngineRequest::Submit { command, reply })?;
        response.recv().map_err(|_| AdmissionError::EngineStopped)?
    }

    /// Register an observer on the engine thread
    pub fn subscribe(&self, observer: Box<dyn SimObserver>) -> Option<usize> {
        let (reply, response) = mpsc::channel();
        self.request(EngineRequest::Subscribe { observer, reply }).ok()?;
        response.recv().ok().flatten()
    }

    pub fn unsubscribe(&self, id: usize) -> Result<(), AdmissionError> {
        self.request(EngineRequest::Unsubscribe { id })
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        let (reply, response) = mpsc::channel();
        self.request(EngineRequest::Snapshot { reply }).ok()?;
        response.recv().ok().flatten()
    }
}

/// Owns the engine thread and an optional planner thread
pub struct SimRunner {
    handle: EngineHandle,
    engine_thread: JoinHandle<SimEngine>,
    planner: Option<(usize, JoinHandle<()>)>,
}

impl SimRunner {
    /// Start ticking `engine` every `tick_interval` of wall-clock time
    pub fn spawn(engine: SimEngine, tick_interval: Duration, request_capacity: usize) -> Self {
        let capacity = request_capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let engine_thread = thread::spawn(move || run_engine(engine, receiver, tick_interval));
        info!("Engine thread started (tick every {:?})", tick_interval);

        Self {
            handle: EngineHandle { sender, capacity },
            engine_thread,
            planner: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Run `scheduler` on its own thread. It plans whenever the engine
    /// raises an auto-schedule request and feeds assign-task commands back.
    pub fn attach_planner(&mut self, scheduler: AutoScheduler) -> bool {
        if self.planner.is_some() {
            return false;
        }
        let (observer, planner_thread) = planner::spawn(scheduler, self.handle());
        match self.handle.subscribe(Box::new(observer)) {
            Some(id) => {
                self.planner = Some((id, planner_thread));
                true
            }
            None => {
                warn!("Planner could not subscribe to the engine");
                false
            }
        }
    }

    /// Stop the engine thread and hand the engine back. Returns None if the
    /// engine thread panicked.
    pub fn shutdown(self) -> Option<SimEngine> {
        if let Err(err) = self.handle.request(EngineRequest::Shutdown) {
            debug!("Shutdown request not delivered: {}", err);
        }
        let mut engine = match self.engine_thread.join() {
            Ok(engine) => engine,
            Err(_) => {
                warn!("Engine thread panicked");
                return None;
            }
        };

        if let Some((id, planner_thread)) = self.planner {
            // Dropping the planner's observer closes its channel
            engine.unsubscribe(id);
            if planner_thread.join().is_err() {
                warn!("Planner thread panicked");
            }
        }
        info!("Engine thread stopped at tick {}", engine.tick_count());
        Some(engine)
    }
}

fn run_engine(mut engine: SimEngine, receiver: Receiver<EngineRequest>, interval: Duration) -> SimEngine {
    let mut next_tick = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if now >= next_tick {
            engine.tick();
            next_tick += interval;
            if next_tick < now {
                // Fell behind; skip the missed ticks
                next_tick = now + interval;
            }
            continue;
        }

        match receiver.recv_timeout(next_tick - now) {
            Ok(EngineRequest::Submit { command, reply }) => {
                // The caller may have given up waiting
                let _ = reply.send(engine.submit(command));
            }
            Ok(EngineRequest::Subscribe { observer, reply }) => {
                let _ = reply.send(engine.subscribe(observer));
            }
            Ok(EngineRequest::Unsubscribe { id }) => {
                engine.unsubscribe(id);
            }
            Ok(EngineRequest::Snapshot { reply }) => {
                let snapshot = engine
                    .last_snapshot()
                    .or_else(|| Some(Arc::new(engine.snapshot())));
                let _ = reply.send(snapshot);
            }
            Ok(EngineRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    engine
}
