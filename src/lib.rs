//! Construction Site Robot Simulation Library
//!
//! A headless simulator for pick-and-place robots on a construction site:
//! grid pathfinding, synthetic sensors, a task pipeline with retries, and a
//! tick-driven engine with a command queue and snapshot subscribers.

pub mod simulation;
