//! Canonical path handling.
//!
//! Canonical paths are `/`-separated absolute strings with no duplicate
//! slashes and no `..` segments; directory paths always carry exactly one
//! trailing `/`. Drive-letter paths (`C:/...`) count as absolute. UNC paths
//! (`//server/share/...`) keep their leading double slash only when the
//! backend asks for it.

use crate::error::FsError;

/// Returns true when `path` is absolute: it starts with `/`, or its second
/// character is `:` (drive-letter syntax).
pub fn is_absolute_path(path: &str) -> bool {
    let mut chars = path.chars();
    match chars.next() {
        Some('/') => true,
        Some(_) => chars.next() == Some(':'),
        None => false,
    }
}

/// Normalize `path` into canonical form.
///
/// Fails with [`FsError::AbsolutePathRequired`] for relative input and with
/// [`FsError::InvalidPath`] when a `..` segment would climb past the root.
/// Normalization is idempotent; canonical path equality is plain string
/// equality.
pub fn normalize(path: &str, is_directory: bool, unc_paths: bool) -> Result<String, FsError> {
    if !is_absolute_path(path) {
        return Err(FsError::AbsolutePathRequired(path.to_string()));
    }

    let is_unc = unc_paths && path.starts_with("//");

    // Collapse runs of slashes.
    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(ch);
    }

    let mut canonical = if collapsed.contains("..") {
        let mut segments: Vec<&str> = collapsed.split('/').collect();
        let mut i = 1;
        while i < segments.len() {
            if segments[i] == ".." {
                if i < 2 {
                    return Err(FsError::InvalidPath(path.to_string()));
                }
                segments.drain(i - 1..=i);
                i -= 2;
            }
            i += 1;
        }
        segments.join("/")
    } else {
        collapsed
    };

    if is_directory && !canonical.ends_with('/') {
        canonical.push('/');
    }

    if is_unc {
        canonical.insert(0, '/');
    }

    Ok(canonical)
}

/// Split a canonical path into `(parent_path, name)`.
///
/// The parent of the filesystem root is the empty string, matching the
/// entry data model.
pub fn split_name(path: &str) -> (String, String) {
    if path == "/" {
        return (String::new(), String::new());
    }
    let trimmed = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };
    match trimmed.rfind('/') {
        Some(pos) => (trimmed[..=pos].to_string(), trimmed[pos + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

/// Append a trailing slash unless one is already present.
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
