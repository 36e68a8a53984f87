//! Node path helpers
//!
//! Paths in the coordination namespace are absolute, `/`-separated and never
//! end with a trailing separator (except the root itself).

use crate::SEQUENCE_WIDTH;
use crate::error::TesseraError;

/// Join path segments into an absolute node path.
///
/// Empty segments and redundant separators are dropped, so absolute and
/// relative pieces can be mixed freely.
///
/// # Examples
///
/// ```
/// use tessera_common::make_path;
///
/// assert_eq!(make_path(&["a", "b", "c"]), "/a/b/c");
/// assert_eq!(make_path(&["/locks/orders", "__READ__"]), "/locks/orders/__READ__");
/// assert_eq!(make_path(&[]), "/");
/// ```
pub fn make_path(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    format!("/{}", joined)
}

/// Last segment of a node path.
///
/// # Examples
///
/// ```
/// use tessera_common::node_name;
///
/// assert_eq!(node_name("/locks/orders/lock-0000000003"), "lock-0000000003");
/// assert_eq!(node_name("lock-0000000003"), "lock-0000000003");
/// ```
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

/// Parent of a node path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }

    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&path[..index]),
        None => None,
    }
}

/// Server-assigned sequence suffix of a sequential node name.
///
/// Returns `None` when the name does not end with a full-width numeric suffix.
pub fn sequence_number(name: &str) -> Option<u64> {
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }

    let suffix = name.get(name.len() - SEQUENCE_WIDTH..)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    suffix.parse().ok()
}

/// Check that a lock name can be used as a candidate node marker.
///
/// The marker is located by its last occurrence in the node name, so it must
/// not end with a digit or that occurrence could fall inside the sequence
/// suffix.
pub fn validate_lock_name(name: &str) -> Result<(), TesseraError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name.ends_with(|c: char| c.is_ascii_digit()) {
        "must not end with a digit"
    } else {
        return Ok(());
    };

    Err(TesseraError::InvalidLockName {
        name: name.to_string(),
        reason,
    })
}
