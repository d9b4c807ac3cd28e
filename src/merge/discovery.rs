//! Session file discovery: `<dir>/<prefix>*<suffix>`, sorted by path.

use std::path::{Path, PathBuf};

/// Find session recordings in `dir` whose file name starts with `prefix` and
/// ends with `suffix`, in lexicographic path order.
///
/// An unreadable directory yields no sessions; the merge then reports
/// nothing to merge.
pub fn discover_sessions(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Failed to read session directory");
            return Vec::new();
        }
    };

    let mut sessions: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| matches_pattern(name, prefix, suffix))
        })
        .collect();
    sessions.sort();

    tracing::debug!(dir = %dir.display(), found = sessions.len(), "Discovered sessions");
    sessions
}

/// Glob `prefix*suffix` on a bare file name.
fn matches_pattern(name: &str, prefix: &str, suffix: &str) -> bool {
    name.len() >= prefix.len() + suffix.len() && name.starts_with(prefix) && name.ends_with(suffix)
}
