//! Object files read by `run --seed` and `check`.

use std::path::Path;

use anyhow::{Context, Result};
use keel_types::{ExternalObject, ManagedResource};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub resources: Vec<ManagedResource>,
    #[serde(default)]
    pub external: Vec<ExternalObject>,
}

pub fn load(path: &Path) -> Result<SeedFile> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
