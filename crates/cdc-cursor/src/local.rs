//! A [`CursorStore`] backed by a single file on local disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::ErrorKind};

use crate::{CursorStore, Error};

/// Stores the cursor token as the raw contents of a file, writing via a
/// temp-file-then-rename so a crash mid-write never corrupts the
/// previously saved token (spec.md §4.5's atomicity note).
pub struct LocalFileCursorStore {
    path: PathBuf,
}

impl LocalFileCursorStore {
    /// Targets `path` (default `./resume-token.json` per spec.md §6).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CursorStore for LocalFileCursorStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Unavailable {
                reason: err.to_string(),
            }),
        }
    }

    async fn save(&self, token: Vec<u8>) -> Result<(), Error> {
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &token).await.map_err(|err| Error::Unavailable {
            reason: err.to_string(),
        })?;
        fs::rename(&tmp_path, &self.path).await.map_err(|err| Error::Unavailable {
            reason: err.to_string(),
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn load_is_none_before_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileCursorStore::new(dir.path().join("resume-token.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileCursorStore::new(dir.path().join("resume-token.json"));

        store.save(b"token-a".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"token-a".to_vec()));

        store.save(b"token-b".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"token-b".to_vec()));
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("resume-token.json");
        let store = LocalFileCursorStore::new(&target);

        store.save(b"token".to_vec()).await.unwrap();

        assert!(!tmp_path_for(&target).exists());
        assert!(target.exists());
    }
}
