//! Job manifest
//!
//! A plain `key=value` text file, one entry per line, written once when a
//! job finishes. Mesh counts use `verts=<n> faces=<n>`; degradations get
//! one `degraded=` line each.

use crate::IoError;
use lowpoly_core::{Degradation, MeshStats, Result};
use std::fmt::Write as _;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.txt";

/// Everything a finished job reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub input: String,
    /// Option values in the order they are written
    pub settings: Vec<(String, String)>,
    pub before: MeshStats,
    pub after: MeshStats,
    pub textures: Vec<String>,
    pub previews: Vec<String>,
    pub export: String,
    pub device: String,
    pub states: Vec<String>,
    pub degraded: Vec<Degradation>,
}

impl Manifest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// Append an option value
    pub fn with_setting(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.settings.push((key.into(), value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "input={}", self.input);
        for (key, value) in &self.settings {
            let _ = writeln!(out, "{}={}", key, value);
        }
        let _ = writeln!(out, "before_low: {}", format_stats(&self.before));
        let _ = writeln!(out, "after_low:  {}", format_stats(&self.after));
        let _ = writeln!(out, "textures={}", list_or_none(&self.textures));
        let _ = writeln!(out, "previews={}", list_or_none(&self.previews));
        let _ = writeln!(out, "export={}", self.export);
        let _ = writeln!(out, "device={}", self.device);
        let _ = writeln!(out, "states={}", self.states.join(" -> "));
        for degradation in &self.degraded {
            let _ = writeln!(out, "degraded={}", degradation);
        }
        out
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.render()).map_err(IoError::from)?;
        Ok(())
    }
}

fn format_stats(stats: &MeshStats) -> String {
    format!("verts={} faces={}", stats.vertices, stats.faces)
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Value of the first `key=` or `key:` line of a manifest
pub fn manifest_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?;
        rest.strip_prefix('=')
            .or_else(|| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

/// Parse `verts=<n> faces=<n>`
pub fn parse_mesh_stats(value: &str) -> Option<MeshStats> {
    let mut stats = MeshStats::default();
    let mut seen = (false, false);
    for part in value.split_whitespace() {
        if let Some(n) = part.strip_prefix("verts=") {
            stats.vertices = n.parse().ok()?;
            seen.0 = true;
        } else if let Some(n) = part.strip_prefix("faces=") {
            stats.faces = n.parse().ok()?;
            seen.1 = true;
        }
    }
    (seen.0 && seen.1).then_some(stats)
}
