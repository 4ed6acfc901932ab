use std::path::{Path, PathBuf};

use super::constants::{filenames, subdirs};

/// Directory structure under the localvol home directory.
///
/// ```text
/// ~/.localvol/
///   db/localvol.db
///   logs/localvol.log.YYYY-MM-DD
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(subdirs::DB_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(filenames::DB)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(subdirs::LOGS_DIR)
    }

    /// Create every directory of the layout.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home_dir)?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_directories() {
        let temp = tempfile::tempdir().unwrap();
        let layout = FilesystemLayout::new(temp.path().join("home"));
        layout.prepare().unwrap();

        assert!(layout.db_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
        assert_eq!(layout.db_path(), temp.path().join("home/db/localvol.db"));
    }
}
