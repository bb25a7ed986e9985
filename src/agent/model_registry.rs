// SYNOID Model Registry
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Static catalog of the restoration model variants: where each one lives on
// the remote registry, which files make it runnable, and which logical paths
// the inference code expects those files under.

use regex::Regex;
use serde::Serialize;
use std::path::Path;

/// Files fetched from the registry. Anything else in the repo is skipped.
pub const DOWNLOAD_ALLOW_LIST: &[&str] = &[
    "*.json",
    "*.safetensors",
    "*.pth",
    "*.pt",
    "*.bin",
    "*.py",
    "*.md",
    "*.txt",
    "*.yaml",
    "*.yml",
];

/// Shell-style wildcard: `*` matches any run of characters (including `/`),
/// `?` exactly one.
#[derive(Debug, Clone)]
pub struct FilePattern {
    raw: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn compile_all(patterns: &[&str]) -> Result<Vec<Self>, regex::Error> {
        patterns.iter().map(|p| Self::new(p)).collect()
    }

    /// Match a path relative to the variant directory, using `/` separators.
    pub fn matches(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    pub fn matches_path(&self, relative: &Path) -> bool {
        let normalized = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.matches(&normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Logical file name (relative to the Artifact Store root) that must resolve
/// to a real file inside the variant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathAlias {
    pub logical: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct ModelVariant {
    pub id: String,
    pub label: String,
    pub repo_id: String,
    pub entry_script: String,
    pub description: String,
    pub required: Vec<FilePattern>,
    pub allow_patterns: Vec<FilePattern>,
    pub aliases: Vec<PathAlias>,
}

impl ModelVariant {
    fn seedvr2(size: &str, description: &str) -> Result<Self, regex::Error> {
        let lower = size.to_lowercase();
        let weights = format!("seedvr2_ema_{}.pth", lower);
        Ok(Self {
            id: size.to_string(),
            label: format!("SeedVR2-{}", size),
            repo_id: format!("ByteDance-Seed/SeedVR2-{}", size),
            entry_script: format!("inference_seedvr2_{}.py", lower),
            description: description.to_string(),
            required: FilePattern::compile_all(&[weights.as_str(), "ema_vae.pth"])?,
            allow_patterns: FilePattern::compile_all(DOWNLOAD_ALLOW_LIST)?,
            aliases: vec![
                PathAlias {
                    logical: weights.clone(),
                    target: weights,
                },
                PathAlias {
                    logical: "ema_vae.pth".to_string(),
                    target: "ema_vae.pth".to_string(),
                },
            ],
        })
    }

    pub fn is_allowed(&self, relative: &str) -> bool {
        self.allow_patterns.iter().any(|p| p.matches(relative))
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    variants: Vec<ModelVariant>,
}

impl ModelCatalog {
    /// The two SeedVR2 variants served by this build.
    pub fn seedvr2() -> Result<Self, regex::Error> {
        Ok(Self {
            variants: vec![
                ModelVariant::seedvr2("3B", "Faster, lighter restoration")?,
                ModelVariant::seedvr2("7B", "Slower, higher quality restoration")?,
            ],
        })
    }

    /// Find a variant by id ("3B") or label ("SeedVR2-3B"), ignoring case.
    pub fn find(&self, name: &str) -> Option<&ModelVariant> {
        let name = name.trim();
        self.variants
            .iter()
            .find(|v| v.id.eq_ignore_ascii_case(name) || v.label.eq_ignore_ascii_case(name))
    }

    pub fn variants(&self) -> &[ModelVariant] {
        &self.variants
    }

    pub fn ids(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.id.as_str()).collect()
    }
}
