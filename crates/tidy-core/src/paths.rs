use std::path::PathBuf;

use anyhow::Context;

/// Resolve and create the client's state directory from, in order: the
/// `--state-dir` flag, `TIDY_STATE_DIR`, the platform data directory.
pub fn resolve_state_dir(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = match flag {
        Some(dir) => dir,
        None => match std::env::var("TIDY_STATE_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .map(|base| base.join("smart-tidy"))
                .context("failed to resolve a data directory; pass --state-dir")?,
        },
    };

    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir)
}
