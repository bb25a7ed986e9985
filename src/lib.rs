// SYNOID Restore Library
// Copyright (c) 2026 Xing_The_Creator | SYNOID

pub mod agent;
pub mod config;
pub mod error;
pub mod gpu_backend;
pub mod server;
pub mod state;
