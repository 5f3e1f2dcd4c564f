use std::path::{Path, PathBuf};

/// Files kept in the data directory (config, catalog, persisted vectors).
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(base_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(BackendLocal {
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }

    pub fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path(ident)).is_ok()
    }

    pub fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    /// Write through a uniquely named temp file so readers never see a
    /// partial file.
    pub fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self
            .base_dir
            .join(format!("{}-{ident}", rusty_ulid::generate_ulid_string()));

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, self.path(ident))
    }
}
