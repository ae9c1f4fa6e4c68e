//! Ember - multiplayer text-game engine host
//!
//! Loads configuration, installs logging and seeds the world for an
//! [`ember_runtime::Engine`].

// Re-export core crate
pub use ember_runtime;

// Configuration loading
pub mod config;

// Tracing subscriber setup
pub mod logging;

// Seed documents from TOML
pub mod seed;
