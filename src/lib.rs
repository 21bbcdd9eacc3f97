// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod dataset;
mod db;
mod formats;
mod loader;
mod telemetry;
