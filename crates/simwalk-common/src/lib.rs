//! ---
//! sw_section: "01-core-functionality"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Shared primitives and utilities for the harness runtime."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
//! Shared primitives for the simwalk harness workspace.
//! This crate exposes configuration loading, tracing bootstrap and
//! duration helpers consumed by the core.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    BridgeConfig, HarnessConfig, LoadedHarnessConfig, LoggingConfig, PhysicsConfig,
    PreconditionConfig, Stage, SubsystemConfig, SubsystemsConfig, TestProcessConfig, TimeoutConfig,
    ValidationConfig,
};
pub use logging::{init_tracing, LogFormat};
