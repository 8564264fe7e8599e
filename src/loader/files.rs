//! Input file discovery

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{LoadError, LoadResult};

/// How the input path is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// A single file
    File,
    /// Every file below a directory
    Directory,
}

/// Files found under the input path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFiles {
    /// File or directory mode
    pub mode: InputMode,
    /// Absolute input path
    pub root: PathBuf,
    /// Absolute file paths, sorted by path within each directory
    pub files: Vec<PathBuf>,
}

impl InputFiles {
    /// Number of files found
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true when nothing was found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of `file` below the input directory
    #[must_use]
    pub fn relative<'a>(&self, file: &'a Path) -> Option<&'a Path> {
        file.strip_prefix(&self.root).ok()
    }
}

/// Collects the files to load from `input`.
///
/// A directory is walked recursively. Symbolic links to files are loaded,
/// symbolic links to directories are not followed.
///
/// # Errors
///
/// `LoadError::Input` if `input` does not exist, `LoadError::Io` if a
/// directory cannot be read.
pub fn collect_input_files(input: &Path) -> LoadResult<InputFiles> {
    if !input.exists() {
        return Err(LoadError::Input(format!(
            "File or directory {} does not exist.",
            input.display()
        )));
    }
    let root = std::path::absolute(input)?;

    if root.is_dir() {
        let mut files = Vec::new();
        walk(&root, &mut files)?;
        Ok(InputFiles {
            mode: InputMode::Directory,
            root,
            files,
        })
    } else {
        Ok(InputFiles {
            mode: InputMode::File,
            files: vec![root.clone()],
            root,
        })
    }
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> LoadResult<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_symlink() && path.is_dir() {
            tracing::debug!("skipping directory link {}", path.display());
        } else {
            files.push(path);
        }
    }
    for subdir in subdirs {
        walk(&subdir, files)?;
    }
    Ok(())
}
