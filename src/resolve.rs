//! Mapping archive identifiers to directories on disk.

use std::path::{Component, Path, PathBuf};

/// Resolves `identifier` against the configured root directory.
///
/// Returns `None` when the identifier is malformed or when the joined
/// path is not an existing directory. The two cases are deliberately
/// indistinguishable to the client (both answer 404), and neither ever
/// spawns a compressor.
pub(crate) fn source_dir(root: &Path, identifier: &str) -> Option<PathBuf> {
    if !is_clean(identifier) {
        return None;
    }
    let dir = root.join(identifier);
    if dir.is_dir() { Some(dir) } else { None }
}

/// A clean identifier is exactly one relative, normal path component:
/// no separators, no `.` or `..` segments, no absolute markers, no NUL.
/// Anything else could escape the root directory.
fn is_clean(identifier: &str) -> bool {
    if identifier.is_empty() || identifier.contains('\0') {
        return false;
    }
    let mut components = Path::new(identifier).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("abc123")).unwrap();

        let dir = source_dir(root.path(), "abc123").unwrap();
        assert_eq!(dir, root.path().join("abc123"));
    }

    #[test]
    fn missing_directory_is_none() {
        let root = tempfile::tempdir().unwrap();
        assert!(source_dir(root.path(), "missing").is_none());
    }

    #[test]
    fn plain_file_is_not_a_source() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("notes.txt"), b"x").unwrap();
        assert!(source_dir(root.path(), "notes.txt").is_none());
    }

    #[test]
    fn traversal_identifiers_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("inner")).unwrap();

        for identifier in ["..", "../inner", "inner/..", "a/b", "/etc", ".", "", "a\0b"] {
            assert!(
                source_dir(root.path(), identifier).is_none(),
                "identifier {identifier:?} should not resolve"
            );
        }
    }
}
