use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Suffix appended to a source-relative path to name its envelope
pub const ENVELOPE_SUFFIX: &str = ".json";

/// Suffix of the temp file an envelope is written to before the final rename
pub const TEMP_SUFFIX: &str = ".sealtree-tmp";

/// Mirror path for a source file: `{mirror_root}/{rel}.json`
pub fn mirror_path_for(mirror_root: &Path, rel: &str) -> PathBuf {
    mirror_root.join(format!("{rel}{ENVELOPE_SUFFIX}"))
}

/// Inverse of [`mirror_path_for`] on relative paths: `a/b.txt.json` → `a/b.txt`.
///
/// Returns `None` for files that are not envelopes.
pub fn source_rel_for(mirror_rel: &str) -> Option<&str> {
    mirror_rel
        .strip_suffix(ENVELOPE_SUFFIX)
        .filter(|rel| !rel.is_empty() && !rel.ends_with('/'))
}

/// Relative path of `path` under `root`, always `/`-separated.
///
/// `None` when `path` is not below `root` or any component is not valid
/// UTF-8; keys must map one-to-one onto envelope names.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// True when `id` is a plain relative path that cannot escape its root.
pub fn is_safe_relative(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    Path::new(id)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// One entry of the plaintext payload produced by the external item source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    /// RFC 3339 publication timestamp, kept verbatim
    pub published_at: String,
}
