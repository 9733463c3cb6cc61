//! Working copy metadata probes
//!
//! Only the 1.7+ layout is understood: a single metadata directory at the
//! working copy root holding `wc.db`, plus nested roots for externals and
//! obstructing checkouts.

use std::fs;
use std::path::{Path, PathBuf};

/// Name of the working copy database inside the metadata directory
pub const WC_DB: &str = "wc.db";

/// Whether `dir` carries its own metadata directory
pub fn has_svn_meta(dir: &Path, metadata_dir: &str) -> bool {
    dir.join(metadata_dir).is_dir()
}

/// Whether a nested working copy sits somewhere below `dir`
///
/// Follows the first subdirectory at every level (in name order) until one
/// carries metadata or the chain ends. Externals are usually mounted through
/// a chain of otherwise empty folders, so this finds them without a full walk.
pub fn contains_svn_meta_in_children(dir: &Path, metadata_dir: &str) -> bool {
    let mut current = first_subdirectory(dir, metadata_dir);
    while let Some(folder) = current {
        if has_svn_meta(&folder, metadata_dir) {
            return true;
        }
        current = first_subdirectory(&folder, metadata_dir);
    }
    false
}

fn first_subdirectory(dir: &Path, metadata_dir: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != metadata_dir)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

/// Working copy database governing `dir`, searching upwards
pub fn find_wc_db(dir: &Path, metadata_dir: &str) -> Option<PathBuf> {
    dir.ancestors()
        .map(|d| d.join(metadata_dir).join(WC_DB))
        .find(|db| db.is_file())
}

/// Whether something exists at `path` (dangling symlinks count)
pub fn file_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_own_metadata() {
        let temp = TempDir::new().unwrap();
        assert!(!has_svn_meta(temp.path(), ".svn"));
        fs::create_dir(temp.path().join(".svn")).unwrap();
        assert!(has_svn_meta(temp.path(), ".svn"));
    }

    #[test]
    fn finds_metadata_down_single_child_chain() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b").join("ext");
        fs::create_dir_all(nested.join(".svn")).unwrap();
        assert!(contains_svn_meta_in_children(temp.path(), ".svn"));
        assert!(contains_svn_meta_in_children(&temp.path().join("a"), ".svn"));
    }

    #[test]
    fn only_first_branch_is_followed() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join("z").join(".svn")).unwrap();
        assert!(!contains_svn_meta_in_children(temp.path(), ".svn"));
    }

    #[test]
    fn own_metadata_dir_is_not_a_child() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".svn").join("pristine")).unwrap();
        assert!(!contains_svn_meta_in_children(temp.path(), ".svn"));
    }

    #[test]
    fn wc_db_is_found_from_subfolders() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".svn")).unwrap();
        fs::write(temp.path().join(".svn").join(WC_DB), b"").unwrap();
        let sub = temp.path().join("src").join("main");
        fs::create_dir_all(&sub).unwrap();
        assert_eq!(
            find_wc_db(&sub, ".svn"),
            Some(temp.path().join(".svn").join(WC_DB))
        );
    }

    #[test]
    fn file_exists_checks_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f.txt");
        assert!(!file_exists(&path));
        fs::write(&path, b"x").unwrap();
        assert!(file_exists(&path));
    }
}
