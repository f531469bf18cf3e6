//! Core tarn library (orchestration engine, providers, tools, config).

pub mod config;
pub mod core;
pub mod fold;
pub mod patchset;
pub mod providers;
pub mod tools;
