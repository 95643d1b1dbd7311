//! This module provides the handlers for the endpoints which manage individual uploaded files: listing, deleting,
//! and ranking them.

#![deny(warnings)]

use {
    crate::{bursts, Error, State},
    anyhow::{anyhow, Result},
    burst_shared::{DeleteResponse, Ranking, RankingResponse, RankingUpdate, UploadsResponse},
    futures::future::{BoxFuture, FutureExt},
    std::path::{Component, Path, PathBuf},
    tokio::fs,
    tracing::info,
};

/// Validate a client-supplied filename, returning it as a path relative to the upload directory.
///
/// The filename may contain directories, but must not be empty, absolute, or contain `.` or `..` components.
pub fn relative_path(filename: &str) -> Result<PathBuf> {
    let path = Path::new(filename);

    if filename.is_empty()
        || !path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(Error::Validation(format!("invalid filename: {:?}", filename).into()).into());
    }

    Ok(path.to_owned())
}

fn find_files<'a>(
    root: &'a Path,
    exclude: &'a [&'a Path],
    result: &'a mut Vec<String>,
    dir: PathBuf,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                find_files(root, exclude, result, path).await?;
            } else if file_type.is_file() && !exclude.contains(&path.as_path()) {
                result.push(
                    path.strip_prefix(root)?
                        .iter()
                        .map(|segment| segment.to_str().ok_or_else(|| anyhow!("bad utf8")))
                        .collect::<Result<Vec<_>>>()?
                        .join("/"),
                );
            }
        }

        Ok(())
    }
    .boxed()
}

/// Handle a GET /list_uploads request.
///
/// Every regular file under the upload directory is listed except the store files themselves.
pub async fn list(state: &State) -> Result<UploadsResponse> {
    let root = state.upload_directory.as_path();
    let exclude = [state.photos.path(), state.group_names.path()];

    let mut files = Vec::new();

    find_files(root, &exclude, &mut files, root.to_owned()).await?;

    files.sort();

    Ok(UploadsResponse { files })
}

/// Handle a DELETE /delete_upload request.
///
/// The file must exist; its metadata record need not.  Group names are pruned against the bursts which remain.
pub async fn delete(state: &State, filename: Option<String>) -> Result<DeleteResponse> {
    let filename = filename
        .filter(|filename| !filename.is_empty())
        .ok_or_else(|| Error::Validation("filename required".into()))?;

    let path = state.upload_directory.join(relative_path(&filename)?);

    let is_file = fs::metadata(&path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);

    if !is_file || state.is_store_file(&path) {
        return Err(Error::NotFound("file not found".into()).into());
    }

    fs::remove_file(&path).await?;

    state.photos.delete(&filename).await?;

    let pruned = bursts::prune_group_names(&state.photos, &state.group_names).await?;

    info!("deleted {} (pruned {} group names)", filename, pruned);

    Ok(DeleteResponse { deleted: filename })
}

/// Handle a POST /update_ranking request.
pub async fn update_ranking(state: &State, update: RankingUpdate) -> Result<RankingResponse> {
    let (filename, ranking) = match (update.filename, update.ranking.map(Ranking::try_from)) {
        (Some(filename), Some(Ok(ranking))) => (filename, ranking),
        _ => return Err(Error::Validation("invalid filename or ranking".into()).into()),
    };

    state.photos.set_ranking(&filename, ranking).await?;

    Ok(RankingResponse { filename, ranking })
}
