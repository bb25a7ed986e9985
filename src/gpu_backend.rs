// SYNOID GPU Backend - Compute Device Detection
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Counts the compute devices visible to this process so a restore job can
// start one inference process per device.

use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    /// Taken from CUDA_VISIBLE_DEVICES.
    VisibleDevices,
    /// Listed by nvidia-smi.
    NvidiaSmi,
    /// Nothing detected.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct GpuInventory {
    pub devices: Vec<String>,
    pub source: DeviceSource,
}

impl std::fmt::Display for GpuInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            DeviceSource::VisibleDevices => {
                write!(f, "{} device(s) from CUDA_VISIBLE_DEVICES", self.devices.len())
            }
            DeviceSource::NvidiaSmi => write!(f, "{} NVIDIA GPU(s)", self.devices.len()),
            DeviceSource::Fallback => write!(f, "no GPU detected"),
        }
    }
}

impl GpuInventory {
    pub fn detect() -> Self {
        if let Ok(raw) = std::env::var("CUDA_VISIBLE_DEVICES") {
            if let Some(devices) = parse_visible_devices(&raw) {
                info!("[GPU] CUDA_VISIBLE_DEVICES selects {} device(s)", devices.len());
                return Self {
                    devices,
                    source: DeviceSource::VisibleDevices,
                };
            }
        }

        if let Some(devices) = query_nvidia_smi() {
            for name in &devices {
                info!("[GPU] ✓ {}", name);
            }
            return Self {
                devices,
                source: DeviceSource::NvidiaSmi,
            };
        }

        warn!("[GPU] No GPU detected, defaulting to a single process");
        Self {
            devices: Vec::new(),
            source: DeviceSource::Fallback,
        }
    }

    /// Processes to launch; never zero.
    pub fn device_count(&self) -> u32 {
        (self.devices.len() as u32).max(1)
    }

    pub fn has_gpu(&self) -> bool {
        !self.devices.is_empty()
    }
}

/// `None` when the variable is set but selects nothing usable.
fn parse_visible_devices(raw: &str) -> Option<Vec<String>> {
    let devices: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty() && *d != "-1")
        .map(str::to_string)
        .collect();
    if devices.is_empty() {
        None
    } else {
        Some(devices)
    }
}

fn query_nvidia_smi() -> Option<Vec<String>> {
    let output = Command::new("nvidia-smi").arg("--list-gpus").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let devices = parse_gpu_list(&String::from_utf8_lossy(&output.stdout));
    if devices.is_empty() {
        None
    } else {
        Some(devices)
    }
}

fn parse_gpu_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("GPU "))
        .map(str::to_string)
        .collect()
}

/// Device count for a job when the caller gave no override.
pub fn detect_device_count() -> u32 {
    GpuInventory::detect().device_count()
}

/// Print GPU status (for CLI `gpu` command)
pub fn print_gpu_status() {
    let inventory = GpuInventory::detect();
    println!("=== SYNOID GPU Status ===");
    println!("Detected: {}", inventory);
    println!(
        "Hardware Acceleration: {}",
        if inventory.has_gpu() { "✓ ENABLED" } else { "✗ DISABLED" }
    );
    for device in &inventory.devices {
        println!("  - {}", device);
    }
    println!("Processes per job: {}", inventory.device_count());
}
