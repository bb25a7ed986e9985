// SYNOID Path Alias Normalizer
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Inference code loads weights from fixed logical paths at the store root,
// while the real files live inside each variant directory. This module makes
// every logical path resolve to the right file, replacing anything stale
// first. Re-running it on a correct store writes nothing, and an alias shared
// by several variants is kept while it resolves to identical content.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::agent::model_registry::PathAlias;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasMode {
    /// Symlink, falling back to a copy where links are unsupported.
    Link,
    /// Always copy the artifact.
    Copy,
}

impl FromStr for AliasMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "link" | "symlink" => Ok(AliasMode::Link),
            "copy" => Ok(AliasMode::Copy),
            other => Err(format!("unknown alias mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Unchanged,
    Linked,
    Copied,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AliasReport {
    pub entries: Vec<(PathBuf, AliasAction)>,
}

impl AliasReport {
    /// Aliases that required a filesystem write.
    pub fn written(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, a)| *a != AliasAction::Unchanged)
            .count()
    }
}

/// Make every alias under `alias_root` resolve to its file in `variant_dir`.
pub fn normalize_aliases(
    aliases: &[PathAlias],
    alias_root: &Path,
    variant_dir: &Path,
    mode: AliasMode,
) -> io::Result<AliasReport> {
    let mut report = AliasReport::default();
    for alias in aliases {
        let logical = alias_root.join(&alias.logical);
        let target = variant_dir.join(&alias.target);
        let action = ensure_alias(&logical, &target, mode)?;
        report.entries.push((logical, action));
    }
    Ok(report)
}

/// Point `logical` at `target`, doing nothing when it already does.
pub fn ensure_alias(logical: &Path, target: &Path, mode: AliasMode) -> io::Result<AliasAction> {
    if !target.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("alias target {} is missing", target.display()),
        ));
    }
    if logical == target {
        return Ok(AliasAction::Unchanged);
    }
    if alias_is_current(logical, target)? {
        return Ok(AliasAction::Unchanged);
    }

    remove_stale(logical)?;
    if let Some(parent) = logical.parent() {
        fs::create_dir_all(parent)?;
    }

    if mode == AliasMode::Link {
        match make_symlink(target, logical) {
            Ok(()) => {
                info!("[ALIAS] 🔗 {} -> {}", logical.display(), target.display());
                return Ok(AliasAction::Linked);
            }
            Err(e) => warn!(
                "[ALIAS] Symlink unsupported for {} ({}); copying instead",
                logical.display(),
                e
            ),
        }
    }

    fs::copy(target, logical)?;
    info!("[ALIAS] 📄 Copied {} -> {}", target.display(), logical.display());
    Ok(AliasAction::Copied)
}

fn alias_is_current(logical: &Path, target: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(logical) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if meta.file_type().is_symlink() {
        // Dangling links canonicalize to an error and count as stale.
        let resolved = match (logical.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) if a == b => return Ok(true),
            (Ok(a), Ok(_)) => a,
            _ => return Ok(false),
        };
        // Shared aliases may point into another variant's directory.
        if same_content(&resolved, target)? {
            debug!(
                "[ALIAS] {} already resolves to identical {}",
                logical.display(),
                resolved.display()
            );
            return Ok(true);
        }
        return Ok(false);
    }
    if !meta.is_file() {
        return Ok(false);
    }
    same_content(logical, target)
}

/// Same size and SHA-256. Follows links.
fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::metadata(a)?;
    if !meta_a.is_file() || meta_a.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(sha256_file(a)? == sha256_file(b)?)
}

fn remove_stale(logical: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(logical) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    warn!("[ALIAS] Replacing stale {}", logical.display());
    if meta.is_dir() {
        fs::remove_dir_all(logical)
    } else {
        fs::remove_file(logical)
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unavailable"))
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
