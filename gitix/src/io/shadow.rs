//! Shadow copies: mirror a directory tree with symlinks to its files.
//!
//! Ignore rules (`.gitignore`, `.git/info/exclude`) are honoured and the `.git`
//! directory is never mirrored.

use std::fs;
use std::io;
use std::path::Path;

use ignore::WalkBuilder;
use tracing::{debug, instrument};

use crate::error::StagingError;

/// True when this platform can create shadow copies.
pub const fn is_supported() -> bool {
    cfg!(unix)
}

/// Mirror `source` into `dest` (created if missing). Returns the number of linked files.
#[instrument(skip_all, fields(source = %source.display(), dest = %dest.display()))]
pub fn shadow_copy(source: &Path, dest: &Path) -> Result<usize, StagingError> {
    create_dir(dest)?;
    let walker = WalkBuilder::new(source)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .parents(false)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut linked = 0usize;
    for entry in walker {
        let entry = entry.map_err(|source_err| StagingError::Walk {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        let is_dir = entry.file_type().is_some_and(|file_type| file_type.is_dir());
        if is_dir {
            create_dir(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        link_file(entry.path(), &target).map_err(|source_err| StagingError::Io {
            path: target.clone(),
            source: source_err,
        })?;
        linked += 1;
    }
    debug!(linked, "shadow copy complete");
    Ok(linked)
}

/// Remove the entries at `paths` under `root` that are symlinks.
///
/// Called before the index is written over a shadow copy so nothing is written
/// through a link into the source tree.
pub fn unlink_shadowed(root: &Path, paths: &[String]) -> Result<(), StagingError> {
    for path in paths {
        let target = root.join(path);
        let is_link = fs::symlink_metadata(&target)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            fs::remove_file(&target).map_err(|source| StagingError::Io {
                path: target.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), StagingError> {
    fs::create_dir_all(path).map_err(|source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn link_file(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn link_file(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "shadow copies need symlink support",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn mirrors_files_as_links_and_skips_git_and_ignored() {
        let source = tempfile::tempdir().expect("source");
        let dest = tempfile::tempdir().expect("dest");
        let root = source.path();
        fs::create_dir_all(root.join(".git")).expect("git dir");
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").expect("head");
        fs::create_dir_all(root.join("p/q")).expect("dirs");
        fs::write(root.join("p/x.go"), "package p\n").expect("x");
        fs::write(root.join("p/q/y.go"), "package q\n").expect("y");
        fs::write(root.join(".gitignore"), "build/\n").expect("gitignore");
        fs::create_dir_all(root.join("build")).expect("build");
        fs::write(root.join("build/out.bin"), "bin").expect("out");

        let snapshot = dest.path().join("snap");
        let linked = shadow_copy(root, &snapshot).expect("shadow");

        assert_eq!(linked, 3);
        let x = snapshot.join("p/x.go");
        assert!(fs::symlink_metadata(&x).expect("meta").file_type().is_symlink());
        assert_eq!(fs::read_to_string(&x).expect("read"), "package p\n");
        assert!(snapshot.join("p/q/y.go").exists());
        assert!(snapshot.join(".gitignore").exists());
        assert!(!snapshot.join(".git").exists());
        assert!(!snapshot.join("build").exists());
    }

    #[test]
    fn unlink_shadowed_leaves_source_intact() {
        let source = tempfile::tempdir().expect("source");
        let dest = tempfile::tempdir().expect("dest");
        fs::write(source.path().join("a.go"), "original").expect("write");
        let snapshot = dest.path().join("snap");
        shadow_copy(source.path(), &snapshot).expect("shadow");

        unlink_shadowed(&snapshot, &["a.go".to_string(), "missing.go".to_string()])
            .expect("unlink");

        assert!(!snapshot.join("a.go").exists());
        assert_eq!(
            fs::read_to_string(source.path().join("a.go")).expect("read"),
            "original"
        );
    }
}
