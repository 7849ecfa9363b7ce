//! Durable markers in the data directory
//!
//! - [`ActiveChannelStore`]: single-slot record of the channel the client
//!   role currently has configured, used for crash recovery
//! - [`ConfigPushedMarker`]: empty file recording that the agent's product
//!   configuration reached the billing controller

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use meterbridge_common::{Channel, StoreError, ACTIVE_CHANNEL_FILE, CONFIG_PUSHED_FILE};

/// Single-slot record of the active channel
#[derive(Debug, Clone)]
pub struct ActiveChannelStore {
    path: PathBuf,
}

impl ActiveChannelStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(ACTIVE_CHANNEL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the record with `channel`
    pub async fn store(&self, channel: &Channel) -> Result<(), StoreError> {
        fs::write(&self.path, channel.as_str())
            .await
            .map_err(|source| self.io_error(source))?;
        debug!(channel = %channel, path = %self.path.display(), "Active channel stored");
        Ok(())
    }

    /// Read the record
    ///
    /// An absent file and an empty file both read as `None`.
    pub async fn load(&self) -> Result<Option<Channel>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let raw = raw.trim();
                Ok((!raw.is_empty()).then(|| Channel::new(raw)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Delete the record; fails with [`StoreError::Missing`] when there is none
    pub async fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Active channel removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::Missing {
                path: self.path.clone(),
            }),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Marker recording a successful product configuration push
#[derive(Debug, Clone)]
pub struct ConfigPushedMarker {
    path: PathBuf,
}

impl ConfigPushedMarker {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(CONFIG_PUSHED_FILE),
        }
    }

    pub async fn is_set(&self) -> Result<bool, StoreError> {
        fs::try_exists(&self.path).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn set(&self) -> Result<(), StoreError> {
        fs::write(&self.path, b"").await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_store_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveChannelStore::new(dir.path());

        assert_eq!(store.load().await.unwrap(), None);

        store.store(&Channel::new("0xfeed")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Channel::new("0xfeed")));

        store.store(&Channel::new("0xbeef")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Channel::new("0xbeef")));

        store.remove().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_missing_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveChannelStore::new(dir.path());

        assert!(matches!(
            store.remove().await,
            Err(StoreError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveChannelStore::new(dir.path());
        std::fs::write(store.path(), "").unwrap();

        assert_eq!(store.load().await.unwrap(), None);
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_record_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActiveChannelStore::new(dir.path());
        std::fs::create_dir(store.path()).unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Io { .. })));
    }

    #[tokio::test]
    async fn test_config_pushed_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = ConfigPushedMarker::new(dir.path());

        assert!(!marker.is_set().await.unwrap());
        marker.set().await.unwrap();
        assert!(marker.is_set().await.unwrap());
        assert!(dir.path().join(CONFIG_PUSHED_FILE).exists());
    }

    proptest! {
        #[test]
        fn prop_store_then_load_returns_channel(id in "[0-9a-zA-Z_-]{1,64}") {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = ActiveChannelStore::new(dir.path());
                let channel = Channel::new(id.clone());

                store.store(&channel).await.unwrap();
                prop_assert_eq!(store.load().await.unwrap(), Some(channel));

                store.remove().await.unwrap();
                prop_assert_eq!(store.load().await.unwrap(), None);
                Ok(())
            })?;
        }
    }
}
