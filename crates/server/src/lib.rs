//! Bulletverse game server library.
//!
//! The simulation is plain synchronous code driven by a single game-loop task;
//! everything under [`server`] is the async shell around it.

pub mod ai;
pub mod collision;
pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod server;
pub mod simulation;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use server::{GameServer, ServerState, run, serve};
pub use simulation::{Simulation, TickInput, TickReport};
