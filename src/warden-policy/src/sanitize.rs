//! Path and environment sanitization.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Clean a path lexically and strip every `..` traversal.
///
/// `.` components are dropped, `..` pops the previous component, and a
/// `..` that would climb above the start is discarded. Any `..` left inside
/// a component name is removed, so the result never contains `..`.
pub fn sanitize_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let mut cleaned = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => cleaned.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    cleaned.pop();
                    depth -= 1;
                }
            }
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                let mut name = name.into_owned();
                while name.contains("..") {
                    name = name.replace("..", "");
                }
                if !name.is_empty() && name != "." {
                    cleaned.push(name);
                    depth += 1;
                }
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// A working directory is acceptable when it has no NUL byte, no command
/// substitution and no `..` component.
pub fn is_valid_work_dir(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.contains('\0') || text.contains("$(") || text.contains('`') {
        return false;
    }
    !path.components().any(|c| c == Component::ParentDir)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip NUL bytes, backticks and `$(` until none remain.
pub fn sanitize_env_value(value: &str) -> String {
    let mut value: String = value.chars().filter(|&c| c != '\0' && c != '`').collect();
    while value.contains("$(") {
        value = value.replace("$(", "");
    }
    value
}

/// Drop entries with invalid keys and sanitize the remaining values.
pub fn sanitize_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .filter(|(key, _)| is_valid_env_key(key))
        .map(|(key, value)| (key.clone(), sanitize_env_value(value)))
        .collect()
}
