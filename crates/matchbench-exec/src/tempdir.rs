//! Scoped scratch directories and fresh-instance copies.
//!
//! Directories are created through a [`TempDirFactory`] handed to the
//! invoker, and removed when the returned [`TempDir`] is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Creates uniquely named directories that are removed on drop.
pub trait TempDirFactory: Send + Sync {
    /// `purpose` becomes part of the directory name.
    fn create(&self, purpose: &str) -> io::Result<TempDir>;
}

/// Directories under the system temp dir or a configured root.
#[derive(Debug, Clone, Default)]
pub struct SystemTempDirs {
    root: Option<PathBuf>,
}

impl SystemTempDirs {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl TempDirFactory for SystemTempDirs {
    fn create(&self, purpose: &str) -> io::Result<TempDir> {
        let prefix = format!("matchbench-{purpose}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }
}

/// Copy the contents of `src` into the existing directory `dst`.
/// Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

/// A private copy of a matcher's working directory for one invocation.
pub fn fresh_instance(factory: &dyn TempDirFactory, working_dir: &Path) -> io::Result<TempDir> {
    let instance = factory.create("instance")?;
    copy_dir_recursive(working_dir, instance.path())?;
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_creates_under_root_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let factory = SystemTempDirs::new(Some(root.path().join("scratch")));
        let dir = factory.create("run").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("matchbench-run-"));
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn names_are_unique() {
        let factory = SystemTempDirs::default();
        let a = factory.create("x").unwrap();
        let b = factory.create("x").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn fresh_instance_copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("lib/nested")).unwrap();
        fs::write(src.path().join("run.sh"), "echo hi").unwrap();
        fs::write(src.path().join("lib/nested/data.txt"), "data").unwrap();

        let instance = fresh_instance(&SystemTempDirs::default(), src.path()).unwrap();
        assert_eq!(
            fs::read_to_string(instance.path().join("lib/nested/data.txt")).unwrap(),
            "data"
        );
        assert!(instance.path().join("run.sh").is_file());
    }
}
