//! Small but reusable helper functions shared by the resolver and the handler.
use std::path::{Component, Path, PathBuf};

/// Characters that are not safe to embed verbatim in a temp file name, replaced with `_`.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '?', '&', '=', ' '];

/// Sanitizes the leaf component of a nested archive path for use in a temp file name,
/// per the `<prefix>---<sanitized-leaf>` contract.
pub fn sanitize_leaf(leaf: &str) -> String {
    leaf.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Builds the session temp file name for a nested archive leaf: `<prefix>---<sanitized-leaf>`.
pub fn temp_file_name(prefix: &str, leaf: &str) -> String {
    format!("{}---{}", prefix, sanitize_leaf(leaf))
}

/// Resolves `path` against `base` the way a class loader resolves a relative classpath
/// entry against its containing directory, collapsing `.` and `..` components lexically
/// (no symlink resolution — canonicalization is a separate, fallible step).
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize_lexically(&joined)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_leaf("a b:c?d&e=f/g\\h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn builds_temp_file_name_with_separator() {
        assert_eq!(temp_file_name("abc123", "inner.jar"), "abc123---inner.jar");
    }

    #[test]
    fn resolve_against_collapses_relative_components() {
        let base = Path::new("/w/lib");
        assert_eq!(
            resolve_against(base, Path::new("./a.jar")),
            PathBuf::from("/w/lib/a.jar")
        );
        assert_eq!(
            resolve_against(base, Path::new("../other/b.jar")),
            PathBuf::from("/w/other/b.jar")
        );
    }

    #[test]
    fn resolve_against_keeps_absolute_paths() {
        let base = Path::new("/w/lib");
        assert_eq!(
            resolve_against(base, Path::new("/usr/lib/jvm/rt.jar")),
            PathBuf::from("/usr/lib/jvm/rt.jar")
        );
    }
}
