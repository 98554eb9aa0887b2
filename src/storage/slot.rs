use std::{
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;

/// Storage shared between every instance of the tracker.
#[async_trait]
pub trait SharedSlots: Send + Sync {
    /// Returns `None` if nothing was written under `key` or the value was removed.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing slot is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T> SharedSlots for T
where
    T: Deref + Send + Sync,
    T::Target: SharedSlots,
{
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.deref().read(key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.deref().write(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.deref().remove(key).await
    }
}

/// One file per slot inside a directory.
pub struct FileSlots {
    slot_dir: PathBuf,
}

impl FileSlots {
    pub fn new(slot_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&slot_dir)?;

        Ok(Self { slot_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.slot_dir.join(format!("{key}.json"))
    }
}

async fn read_locked(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path).await?;
    file.lock_shared()?;
    let mut content = String::new();
    let read = file.read_to_string(&mut content).await;
    file.unlock_async().await?;
    read?;
    Ok(content)
}

#[async_trait]
impl SharedSlots for FileSlots {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match read_locked(&path).await {
            // A writer truncates before writing, an empty file means nothing useful yet.
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read slot {path:?}")),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let mut file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open slot {path:?}"))?;

        file.lock_exclusive()?;
        let written = async {
            file.set_len(0).await?;
            file.rewind().await?;
            file.write_all(value.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        file.unlock_async().await?;
        written.with_context(|| format!("Failed to write slot {path:?}"))?;

        debug!("Wrote slot {key}");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed slot {key}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove slot {path:?}")),
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// Slots kept in memory. Clone the `Arc` holding it to share between "instances".
    #[derive(Default)]
    pub struct MemorySlots {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl SharedSlots for MemorySlots {
        async fn read(&self, key: &str) -> Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn write(&self, key: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
