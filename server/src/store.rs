//! This module provides the two JSON-file-backed stores: [PhotoStore], which maps uploaded filenames to their
//! [PhotoRecord]s, and [GroupNameStore], which maps burst indexes to user-assigned names.
//!
//! Both stores persist their entire mapping in a single file.  Every mutation loads the whole mapping, applies the
//! change, and atomically replaces the file with the result.  A missing file is treated as an empty mapping; a
//! malformed one is an error.

#![deny(warnings)]

use {
    crate::Error,
    anyhow::{Context, Result},
    burst_shared::{GroupNames, PhotoRecord, Ranking},
    serde::{de::DeserializeOwned, Serialize},
    std::{
        collections::BTreeMap,
        io::{ErrorKind, Write},
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
    tokio::{fs, sync::Mutex as AsyncMutex, task},
    tracing::info,
};

/// Contents of the photo store: filename to record, in filename order
pub type Photos = BTreeMap<String, PhotoRecord>;

async fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(buffer) => Ok(Some(serde_json::from_slice(&buffer).with_context(|| {
            format!("malformed store file {}", path.display())
        })?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("unable to read {}", path.display())),
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    task::block_in_place(|| {
        let mut file = NamedTempFile::new_in(dir)?;

        serde_json::to_writer(&mut file, value)?;

        file.flush()?;

        file.persist(path)?;

        Ok::<_, anyhow::Error>(())
    })
    .with_context(|| format!("unable to write {}", path.display()))
}

/// Persisted mapping of filename to [PhotoRecord]
#[derive(Debug)]
pub struct PhotoStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl PhotoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retrieve every record in the store, or an empty map if the store file does not exist yet.
    pub async fn get_all(&self) -> Result<Photos> {
        let _lock = self.lock.lock().await;

        Ok(load(&self.path).await?.unwrap_or_default())
    }

    /// Insert or replace the record for `filename`.
    pub async fn upsert(
        &self,
        filename: &str,
        date_taken: Option<String>,
        ranking: Ranking,
    ) -> Result<()> {
        let _lock = self.lock.lock().await;

        let mut photos = load::<Photos>(&self.path).await?.unwrap_or_default();

        photos.insert(
            filename.to_owned(),
            PhotoRecord {
                date_taken,
                ranking,
            },
        );

        save(&self.path, &photos)
    }

    /// Change the ranking of an existing record.
    ///
    /// Fails with [Error::NotFound] if the store file does not exist or has no record for `filename`.
    pub async fn set_ranking(&self, filename: &str, ranking: Ranking) -> Result<()> {
        let _lock = self.lock.lock().await;

        let mut photos = load::<Photos>(&self.path)
            .await?
            .ok_or_else(|| Error::NotFound("metadata file not found".into()))?;

        photos
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound("file not found in metadata".into()))?
            .ranking = ranking;

        save(&self.path, &photos)
    }

    /// Remove the record for `filename`, returning whether there was one.
    ///
    /// This is a no-op if the store file does not exist or has no record for `filename`.
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        let _lock = self.lock.lock().await;

        if let Some(mut photos) = load::<Photos>(&self.path).await? {
            if photos.remove(filename).is_some() {
                save(&self.path, &photos)?;

                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Persisted mapping of burst index to user-assigned name
///
/// Names are keyed by the position of a burst in the output of [crate::bursts::compute_groups], which shifts when
/// photos in earlier bursts are deleted.  [GroupNameStore::prune] drops names whose index no longer exists, but a
/// name is not carried along with its photos when indexes shift.
#[derive(Debug)]
pub struct GroupNameStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl GroupNameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get_all(&self) -> Result<GroupNames> {
        let _lock = self.lock.lock().await;

        Ok(load(&self.path).await?.unwrap_or_default())
    }

    pub async fn set(&self, index: i64, name: &str) -> Result<()> {
        let _lock = self.lock.lock().await;

        let mut names = load::<GroupNames>(&self.path).await?.unwrap_or_default();

        names.insert(index, name.to_owned());

        save(&self.path, &names)
    }

    /// Discard every name whose index is not in `0..group_count`, returning how many were discarded.
    ///
    /// The store file is only rewritten if something was discarded, and is never created.
    pub async fn prune(&self, group_count: usize) -> Result<usize> {
        let _lock = self.lock.lock().await;

        let mut names = if let Some(names) = load::<GroupNames>(&self.path).await? {
            names
        } else {
            return Ok(0);
        };

        let before = names.len();

        names.retain(|&index, _| usize::try_from(index).map_or(false, |index| index < group_count));

        let pruned = before - names.len();

        if pruned > 0 {
            info!("pruned {} stale group name(s)", pruned);

            save(&self.path, &names)?;
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod test {
    use {super::*, maplit::btreemap, tempfile::TempDir};

    fn ranking(value: i64) -> Ranking {
        Ranking::try_from(value).unwrap()
    }

    fn not_found(error: &anyhow::Error) -> bool {
        matches!(error.root_cause().downcast_ref::<Error>(), Some(Error::NotFound(_)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn photo_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let store = PhotoStore::new(dir.path().join("metadata.json"));

        assert!(store.get_all().await?.is_empty());

        store
            .upsert("a.jpg", Some("2021:07:04 12:30:05".into()), Ranking::default())
            .await?;
        store.upsert("trip/b.jpg", None, ranking(0)).await?;

        assert_eq!(
            store.get_all().await?,
            btreemap! {
                "a.jpg".to_string() => PhotoRecord {
                    date_taken: Some("2021:07:04 12:30:05".into()),
                    ranking: ranking(1),
                },
                "trip/b.jpg".to_string() => PhotoRecord { date_taken: None, ranking: ranking(0) },
            }
        );

        // Upserting an existing filename replaces its record.

        store.upsert("a.jpg", None, ranking(2)).await?;

        assert_eq!(
            store.get_all().await?.get("a.jpg"),
            Some(&PhotoRecord {
                date_taken: None,
                ranking: ranking(2)
            })
        );

        // The file on disk uses the documented layout.

        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&std::fs::read(store.path())?)?,
            serde_json::json!({
                "a.jpg": { "date_taken": null, "ranking": 2 },
                "trip/b.jpg": { "date_taken": null, "ranking": 0 },
            })
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn set_ranking() -> Result<()> {
        let dir = TempDir::new()?;
        let store = PhotoStore::new(dir.path().join("metadata.json"));

        // No store file yet.

        assert!(not_found(&store.set_ranking("a.jpg", ranking(2)).await.unwrap_err()));

        store.upsert("a.jpg", None, Ranking::default()).await?;

        // Unknown filename.

        assert!(not_found(&store.set_ranking("b.jpg", ranking(2)).await.unwrap_err()));

        store.set_ranking("a.jpg", ranking(0)).await?;

        assert_eq!(store.get_all().await?["a.jpg"].ranking, ranking(0));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn delete() -> Result<()> {
        let dir = TempDir::new()?;
        let store = PhotoStore::new(dir.path().join("metadata.json"));

        // Deleting from a missing store neither fails nor creates the file.

        assert!(!store.delete("a.jpg").await?);
        assert!(!store.path().exists());

        store.upsert("a.jpg", None, Ranking::default()).await?;
        store.upsert("b.jpg", None, Ranking::default()).await?;

        assert!(!store.delete("c.jpg").await?);
        assert!(store.delete("a.jpg").await?);

        assert_eq!(
            store.get_all().await?.keys().collect::<Vec<_>>(),
            vec!["b.jpg"]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn malformed() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("metadata.json");

        std::fs::write(&path, b"{ not json")?;

        let store = PhotoStore::new(&path);

        assert!(store.get_all().await.is_err());
        assert!(store.upsert("a.jpg", None, Ranking::default()).await.is_err());

        // The malformed file must be left alone rather than reset.

        assert_eq!(std::fs::read(&path)?, b"{ not json");

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn group_names() -> Result<()> {
        let dir = TempDir::new()?;
        let store = GroupNameStore::new(dir.path().join("group_names.json"));

        assert!(store.get_all().await?.is_empty());

        // Pruning a missing store is a no-op.

        assert_eq!(store.prune(0).await?, 0);
        assert!(!store.path().exists());

        store.set(0, "Beach").await?;
        store.set(2, "Dinner").await?;
        store.set(5, "Sunset").await?;
        store.set(2, "Late dinner").await?;

        assert_eq!(
            store.get_all().await?,
            btreemap! {
                0 => "Beach".to_string(),
                2 => "Late dinner".to_string(),
                5 => "Sunset".to_string(),
            }
        );

        assert_eq!(store.prune(6).await?, 0);
        assert_eq!(store.prune(3).await?, 1);

        assert_eq!(
            store.get_all().await?,
            btreemap! { 0 => "Beach".to_string(), 2 => "Late dinner".to_string() }
        );

        assert_eq!(store.prune(0).await?, 2);
        assert!(store.get_all().await?.is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn negative_group_index() -> Result<()> {
        let dir = TempDir::new()?;
        let store = GroupNameStore::new(dir.path().join("group_names.json"));

        store.set(-1, "Nowhere").await?;

        assert_eq!(store.get_all().await?.get(&-1).map(String::as_str), Some("Nowhere"));

        assert_eq!(store.prune(10).await?, 1);

        Ok(())
    }
}
