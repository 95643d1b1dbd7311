#![deny(warnings)]

use {
    crate::warp_util::HttpError,
    anyhow::{anyhow, Context, Result},
    burst_shared::{DeleteQuery, GroupName, RankingUpdate, UploadResponse},
    bytes::Buf,
    futures::{
        future::{FutureExt, TryFutureExt},
        stream::TryStreamExt,
    },
    http::{
        header::{self, HeaderValue},
        response::{self, Response},
        Uri,
    },
    hyper::Body,
    serde::Serialize,
    serde_json::json,
    std::{
        borrow::Cow,
        convert::Infallible,
        net::SocketAddr,
        panic::{self, AssertUnwindSafe},
        path::{Path, PathBuf},
        sync::Arc,
    },
    structopt::StructOpt,
    tokio::fs,
    tracing::{info, warn},
    warp::{multipart::FormData, Filter, Rejection, Reply},
};

pub use {
    bursts::compute_groups,
    extract::date_taken,
    ingest::ingest,
    store::{GroupNameStore, PhotoStore, Photos},
};

mod bursts;
mod extract;
mod ingest;
mod store;
mod uploads;
mod warp_util;

/// Largest accepted POST /upload body
const MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Name of the multipart form field carrying uploaded files
const UPLOAD_FIELD: &str = "files";

const DEFAULT_METADATA_FILE: &str = "metadata.json";

const DEFAULT_GROUP_NAMES_FILE: &str = "group_names.json";

/// Errors which are the client's fault, as opposed to the server's
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file or metadata record which the request refers to does not exist.
    #[error("{0}")]
    NotFound(Cow<'static, str>),

    /// The request is missing a field or has a malformed one.
    #[error("{0}")]
    Validation(Cow<'static, str>),
}

#[derive(StructOpt, Debug)]
#[structopt(name = "burst-server", about = "Photo upload and burst grouping backend")]
pub struct Options {
    /// Address to which to bind
    #[structopt(long)]
    pub address: SocketAddr,

    /// Directory in which to store uploaded photos
    #[structopt(long)]
    pub upload_directory: String,

    /// JSON file mapping filenames to photo metadata (default: metadata.json in the upload directory)
    #[structopt(long)]
    pub metadata_file: Option<String>,

    /// JSON file mapping burst indexes to names (default: group_names.json in the upload directory)
    #[structopt(long)]
    pub group_names_file: Option<String>,

    /// Origin from which browsers may make cross-origin requests (may be repeated)
    #[structopt(long, default_value = "http://localhost:3000")]
    pub cors_origin: Vec<String>,

    /// File containing TLS certificate to use
    #[structopt(long)]
    pub cert_file: Option<String>,

    /// File containing TLS key to use
    #[structopt(long)]
    pub key_file: Option<String>,
}

/// Everything a request handler may touch: the upload directory and the two stores
#[derive(Debug)]
pub struct State {
    pub upload_directory: PathBuf,
    pub photos: PhotoStore,
    pub group_names: GroupNameStore,
}

impl State {
    pub fn new(options: &Options) -> Self {
        let upload_directory = PathBuf::from(&options.upload_directory);

        Self {
            photos: PhotoStore::new(
                options
                    .metadata_file
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| upload_directory.join(DEFAULT_METADATA_FILE)),
            ),
            group_names: GroupNameStore::new(
                options
                    .group_names_file
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| upload_directory.join(DEFAULT_GROUP_NAMES_FILE)),
            ),
            upload_directory,
        }
    }

    fn is_store_file(&self, path: &Path) -> bool {
        path == self.photos.path() || path == self.group_names.path()
    }
}

/// Make sure `origin` is a bare `scheme://host[:port]` origin which warp's CORS filter will accept.
fn check_origin(origin: &str) -> Result<()> {
    HeaderValue::from_str(origin)?;

    let uri = origin.parse::<Uri>()?;

    if !origin.contains("://")
        || uri.scheme().is_none()
        || uri.authority().is_none()
        || uri.path() != "/"
        || uri.query().is_some()
    {
        return Err(anyhow!("expected scheme://host[:port]"));
    }

    Ok(())
}

/// Check the options, create the upload directory if necessary, and make sure both stores are readable.
pub async fn open(options: &Options) -> Result<State> {
    for origin in &options.cors_origin {
        check_origin(origin).with_context(|| format!("invalid CORS origin {:?}", origin))?;
    }

    let state = State::new(options);

    fs::create_dir_all(&state.upload_directory).await?;

    let photos = state.photos.get_all().await?;
    let names = state.group_names.get_all().await?;

    info!(
        "opened {} ({} photos, {} group names)",
        state.upload_directory.display(),
        photos.len(),
        names.len()
    );

    Ok(state)
}

fn response() -> response::Builder {
    Response::builder()
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;

    Ok(response()
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

/// Collect the filename and contents of every file in the "files" field of a multipart form, in order.
async fn read_files(form: FormData) -> Result<Vec<(String, Vec<u8>)>> {
    form.map_err(anyhow::Error::from)
        .try_filter_map(|part| async move {
            let filename = match part.filename() {
                Some(filename) if part.name() == UPLOAD_FIELD => filename.to_owned(),
                _ => return Ok::<_, anyhow::Error>(None),
            };

            let data = part
                .stream()
                .try_fold(Vec::new(), |mut data, chunk| async move {
                    data.extend_from_slice(chunk.chunk());
                    Ok(data)
                })
                .await?;

            Ok(Some((filename, data)))
        })
        .try_collect()
        .await
}

fn routes(
    state: &Arc<State>,
    options: &Options,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let cors = warp::cors()
        .allow_origins(options.cors_origin.iter().map(String::as_str))
        .allow_credentials(true)
        .allow_methods(vec!["GET", "POST", "DELETE"])
        .allow_headers(vec!["content-type"])
        .build();

    warp::get()
        .and(
            warp::path::end()
                .map(|| warp::reply::json(&json!({ "message": "burst server is running" })))
                .or(warp::path!("list_uploads").and_then({
                    let state = state.clone();

                    move || {
                        let state = state.clone();

                        async move { json_response(&uploads::list(&state).await?) }.map_err(|e| {
                            warn!("error listing uploads: {:?}", e);

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("grouped_photos").and_then({
                    let state = state.clone();

                    move || {
                        let state = state.clone();

                        async move { json_response(&bursts::grouped_photos(&state.photos).await?) }
                            .map_err(|e| {
                                warn!("error grouping photos: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                    }
                }))
                .or(warp::path!("group_names").and_then({
                    let state = state.clone();

                    move || {
                        let state = state.clone();

                        async move { json_response(&bursts::group_names(&state.group_names).await?) }
                            .map_err(|e| {
                                warn!("error retrieving group names: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                    }
                }))
                .or(warp::path("uploads").and(warp::fs::dir(state.upload_directory.clone()))),
        )
        .or(warp::post().and(
            warp::path!("upload")
                .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
                .and_then({
                    let state = state.clone();

                    move |form: FormData| {
                        let state = state.clone();

                        async move {
                            let files = read_files(form).await?;

                            json_response(&UploadResponse {
                                uploaded: ingest::ingest(&state, files).await?,
                            })
                        }
                        .map_err(|e| {
                            warn!("error handling upload: {:?}", e);

                            Rejection::from(HttpError::from(e))
                        })
                    }
                })
                .or(warp::path!("update_ranking")
                    .and(warp::body::json())
                    .and_then({
                        let state = state.clone();

                        move |update: RankingUpdate| {
                            let state = state.clone();

                            async move { json_response(&uploads::update_ranking(&state, update).await?) }
                                .map_err(|e| {
                                    warn!("error updating ranking: {:?}", e);

                                    Rejection::from(HttpError::from(e))
                                })
                        }
                    }))
                .or(warp::path!("set_group_name")
                    .and(warp::body::json())
                    .and_then({
                        let state = state.clone();

                        move |group: GroupName| {
                            let state = state.clone();

                            async move {
                                json_response(&bursts::set_group_name(&state.group_names, group).await?)
                            }
                            .map_err(|e| {
                                warn!("error setting group name: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    })),
        ))
        .or(warp::delete().and(
            warp::path!("delete_upload")
                .and(warp::query::<DeleteQuery>())
                .and_then({
                    let state = state.clone();

                    move |query: DeleteQuery| {
                        let state = state.clone();

                        async move { json_response(&uploads::delete(&state, query.filename).await?) }
                            .map_err(|e| {
                                warn!("error deleting upload: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                    }
                }),
        ))
        .recover(warp_util::handle_rejection)
        .with(cors)
        .recover(warp_util::handle_rejection)
        .with(warp::log("burst"))
}

fn catch_unwind<T>(fun: impl panic::UnwindSafe + FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(fun).map_err(|e| {
        if let Some(s) = e.downcast_ref::<&str>() {
            anyhow!("{}", s)
        } else if let Some(s) = e.downcast_ref::<String>() {
            anyhow!("{}", s)
        } else {
            anyhow!("caught panic")
        }
    })
}

pub async fn serve(state: &Arc<State>, options: &Arc<Options>) -> Result<()> {
    let routes = routes(state, options);

    let (address, future) = if let (Some(cert), Some(key)) = (&options.cert_file, &options.key_file)
    {
        let server = warp::serve(routes).tls().cert_path(cert).key_path(key);

        // As of this writing, warp::TlsServer does not have a try_bind_ephemeral method, so we must catch panics
        // explicitly.
        let (address, future) = catch_unwind(AssertUnwindSafe(move || {
            server.bind_ephemeral(options.address)
        }))?;

        (address, future.boxed())
    } else {
        let (address, future) = warp::serve(routes).try_bind_ephemeral(options.address)?;

        (address, future.boxed())
    };

    info!("listening on {}", address);

    future.await;

    Ok(())
}
