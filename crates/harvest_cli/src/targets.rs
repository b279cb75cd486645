use std::fs;
use std::path::Path;

use anyhow::Context;
use harvest_core::Target;

/// One identifier per line; blank lines and `#` comments are skipped.
pub fn parse_targets(text: &str) -> Vec<Target> {
    Target::batch(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    )
}

pub fn read_targets(path: &Path) -> anyhow::Result<Vec<Target>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read targets from {}", path.display()))?;
    Ok(parse_targets(&text))
}
