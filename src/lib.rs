pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod errors;
pub mod gates;
pub mod orchestrator;
pub mod safety;
pub mod signals;
pub mod state;
pub mod telemetry;
