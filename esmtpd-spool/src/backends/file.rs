use std::path::{Path, PathBuf};

use async_trait::async_trait;
use esmtpd_common::context::Context;
use serde::{Deserialize, Serialize};

use crate::{SpoolError, ValidationError, r#trait::BackingStore, types::SpooledMessageId};

#[cfg(unix)]
const SYSTEM_DIRECTORIES: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr", "/boot", "/sys", "/proc", "/dev",
];

#[cfg(windows)]
const SYSTEM_DIRECTORIES: &[&str] = &[
    "\\windows",
    "\\program files",
    "\\program files (x86)",
    "\\programdata",
];

fn validate_path(path: &Path) -> Result<(), ValidationError> {
    let display = path.display().to_string();

    if display.contains("..") {
        return Err(ValidationError::InvalidConfiguration(format!(
            "spool path cannot contain '..': {display}"
        )));
    }

    if !path.is_absolute() {
        return Err(ValidationError::InvalidConfiguration(format!(
            "spool path must be absolute: {display}"
        )));
    }

    let lowered = display.to_ascii_lowercase();
    if SYSTEM_DIRECTORIES
        .iter()
        .any(|sys| lowered == *sys || lowered.starts_with(&format!("{sys}/")) || lowered.starts_with(&format!("{sys}\\")))
    {
        return Err(ValidationError::InvalidConfiguration(format!(
            "spool path cannot be a system directory: {display}"
        )));
    }

    Ok(())
}

/// A message persisted to disk: bincode-encoded next to the raw body so the
/// two can be written/read independently of one another.
#[derive(Debug, Serialize, Deserialize)]
struct StoredContext {
    context: Context,
}

/// Disk-backed [`BackingStore`], one file per message under a configured
/// directory.
///
/// Each message is stored as `<spool dir>/<ulid>.bin`, bincode-encoded. The
/// directory is validated at construction time (and again on deserialization)
/// to reject relative paths, `..` components and well-known system
/// directories, since a misconfigured spool path is a foot-gun with real
/// consequences.
#[derive(Debug, Clone, Serialize)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/esmtpd"),
        }
    }
}

impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            path: PathBuf,
        }

        let raw = Raw::deserialize(deserializer)?;
        validate_path(&raw.path).map_err(serde::de::Error::custom)?;
        Ok(Self { path: raw.path })
    }
}

impl FileBackingStore {
    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn message_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    /// Ensure the spool directory exists.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn init(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }
}

/// Builder for [`FileBackingStore`], validating the path before construction.
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: Option<PathBuf>,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// # Errors
    /// Returns an error if no path was given, or the path fails validation.
    pub fn build(self) -> crate::Result<FileBackingStore> {
        let path = self
            .path
            .ok_or_else(|| ValidationError::InvalidConfiguration("no spool path given".into()))?;
        validate_path(&path)?;
        Ok(FileBackingStore { path })
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId> {
        let id = SpooledMessageId::generate();
        context.tracking_id = Some(id.to_string());

        let encoded = bincode::serde::encode_to_vec(
            &StoredContext {
                context: context.clone(),
            },
            bincode::config::standard(),
        )
        .map_err(crate::error::SerializationError::Encode)?;

        let path = self.message_path(&id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, encoded).await?;

        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && let Some(id) = SpooledMessageId::from_filename(name)
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context> {
        let path = self.message_path(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| if e.kind() == std::io::ErrorKind::NotFound {
                SpoolError::NotFound(id.clone())
            } else {
                SpoolError::Io(e)
            })?;

        let (stored, _): (StoredContext, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(crate::error::SerializationError::Decode)?;

        Ok(stored.context)
    }

    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        let path = self.message_path(id);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(SpoolError::NotFound(id.clone()));
        }

        let encoded = bincode::serde::encode_to_vec(
            &StoredContext {
                context: context.clone(),
            },
            bincode::config::standard(),
        )
        .map_err(crate::error::SerializationError::Encode)?;

        tokio::fs::write(&path, encoded).await?;
        Ok(())
    }

    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()> {
        let path = self.message_path(id);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| if e.kind() == std::io::ErrorKind::NotFound {
                SpoolError::NotFound(id.clone())
            } else {
                SpoolError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_relative_path() {
        let result = FileBackingStore::builder()
            .path(PathBuf::from("relative/path"))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "spawns real file I/O")]
    async fn write_read_delete_round_trip() {
        let dir = std::env::temp_dir().join(format!("esmtpd-spool-test-{}", ulid::Ulid::new()));
        let store = FileBackingStore::builder()
            .path(dir.clone())
            .build()
            .expect("valid path");
        store.init().expect("init succeeds");

        let mut ctx = Context::default();
        let id = store.write(&mut ctx).await.expect("write succeeds");

        let ids = store.list().await.expect("list succeeds");
        assert_eq!(ids, vec![id.clone()]);

        let read_back = store.read(&id).await.expect("read succeeds");
        assert_eq!(read_back.tracking_id, Some(id.to_string()));

        store.delete(&id).await.expect("delete succeeds");
        assert!(store.list().await.expect("list succeeds").is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
