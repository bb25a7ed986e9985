// SYNOID Agent Modules
// Copyright (c) 2026 Xing_The_Creator | SYNOID

pub mod acquisition;
pub mod artifact_store;
pub mod entry_point;
pub mod health;
pub mod hub;
pub mod launcher;
pub mod model_registry;
pub mod orchestrator;
pub mod path_alias;
pub mod progress;
pub mod retry;
