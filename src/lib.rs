//! GroupWatch - a group departure notifier
//!
//! This library provides the event classification, registry and delivery
//! logic for relaying group-decrease notices from monitored groups to their
//! notification groups.

pub mod app;
pub mod classifier;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod formatting;
pub mod network;
pub mod notification;
pub mod registry;
pub mod relay;
pub mod store;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
