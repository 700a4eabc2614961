//! Persists the API key between invocations.

use anyhow::{Context, Result};
use std::path::Path;

pub fn save_key(path: &Path, api_key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, api_key)
        .with_context(|| format!("Failed to write API key to {}", path.display()))?;
    Ok(())
}

pub fn load_key(path: &Path) -> Result<String> {
    let key = std::fs::read_to_string(path).with_context(|| {
        format!(
            "No API key at {}. Run `tutor-chat register` or `tutor-chat login` first",
            path.display()
        )
    })?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("API key file {} is empty", path.display());
    }
    Ok(key.to_string())
}
