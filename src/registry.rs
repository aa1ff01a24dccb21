//! Docker Registry v1 HTTP protocol.
//!
//! ## Spec
//!
//! The wire format implemented here is the legacy "v1" registry API, as
//! originally served by `docker-registry` / `blang/crane`: a three-phase
//! image push (`PUT .../json` → `PUT .../layer` → `PUT .../checksum`),
//! namespaced repositories with a mutable tag table, and bearer tokens
//! scoped to a `(namespace, repository, image set, mode)` capability.

pub(crate) mod auth;
pub(crate) mod blob_store;
pub(crate) mod meta_store;
pub(crate) mod types;
mod www_authenticate;

use std::{path::Path as FsPath, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{HeaderMap, CONTENT_TYPE, HOST},
        HeaderValue, Request, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use futures::StreamExt;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use self::{
    auth::{Authenticator, BearerToken, LocalAuthenticator, Mode, UnverifiedCredentials},
    blob_store::BlobStore,
    meta_store::MetaStore,
    types::{parse_image_document, RepositoryImagePut},
};
use crate::error::RegistryError;

/// Bundles the three leaf components and orchestrates the image-ingestion
/// pipeline described in the module-level docs. No other component talks to
/// `MetaStore` or `BlobStore` directly.
pub(crate) struct Registry {
    meta: MetaStore,
    blobs: BlobStore,
    auth: Box<dyn Authenticator>,
}

impl Registry {
    pub(crate) fn new<P: AsRef<FsPath>>(datadir: P) -> std::io::Result<Arc<Self>> {
        Ok(Arc::new(Registry {
            meta: MetaStore::new(),
            blobs: BlobStore::new(datadir)?,
            auth: Box::new(LocalAuthenticator::new()),
        }))
    }

    pub(crate) fn make_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/v1/_ping", get(ping))
            .route("/v1/users/", get(check_login).post(register))
            .route(
                "/v1/repositories/:namespace/:repository/",
                put(put_repository_images).delete(accept_delete),
            )
            .route(
                "/v1/repositories/:namespace/:repository/images",
                get(get_repository_images).put(put_repository_images_complete),
            )
            .route(
                "/v1/repositories/:namespace/:repository/tags",
                get(get_tags),
            )
            .route(
                "/v1/repositories/:namespace/:repository/tags/:tag",
                get(get_tag).put(put_tag).delete(accept_delete),
            )
            .route(
                "/v1/images/:image_id/json",
                get(get_image_json).put(put_image_json),
            )
            .route(
                "/v1/images/:image_id/layer",
                get(get_image_layer).put(put_image_layer),
            )
            .route("/v1/images/:image_id/checksum", put(put_image_checksum))
            .route("/v1/images/:image_id/ancestry", get(get_image_ancestry))
            .route("/v1/images/:image_id", delete(accept_delete))
            .layer(middleware::from_fn(apply_wire_headers))
            .with_state(self)
    }

    //
    // Phase 1 — stage JSON.
    //
    fn stage_image_json(&self, id: &str, json_bytes: &[u8]) -> Result<(), RegistryError> {
        let parent = parse_image_document(json_bytes)
            .map_err(|err| RegistryError::BadRequest(err.to_string()))?;

        if self.meta.image_json(id).is_some() {
            return Err(RegistryError::Conflict);
        }

        let json = String::from_utf8(json_bytes.to_vec())
            .map_err(|_| RegistryError::BadRequest("image document is not valid UTF-8".into()))?;
        self.meta.set_tmp_image_json(id, json);

        if let Some(parent) = parent {
            self.meta.set_tmp_ancestry(id, &parent);
        }

        Ok(())
    }

    //
    // Phase 2 — stream the layer.
    //
    async fn stage_layer<R>(&self, id: &str, reader: R) -> Result<(), RegistryError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let Some(tmp_json) = self.meta.tmp_image_json(id) else {
            return Err(RegistryError::NotFound("image"));
        };

        let (checksum, size) = self.blobs.set_tmp_layer(id, &tmp_json, reader).await?;

        self.meta.set_tmp_checksum(id, checksum);
        self.meta.set_tmp_size(id, size as i64);

        Ok(())
    }

    //
    // Phase 3 — validate the client-supplied checksum and commit, or discard.
    //
    async fn validate_and_commit_layer(&self, id: &str, expected_checksum: &str) -> bool {
        let Some(actual) = self.meta.tmp_checksum(id) else {
            self.discard(id).await;
            return false;
        };

        if actual != expected_checksum {
            self.discard(id).await;
            return false;
        }

        if !self.blobs.commit_tmp_layer(id).await {
            self.discard(id).await;
            return false;
        }

        if !self.meta.commit_tmp_image(id) {
            self.discard(id).await;
            return false;
        }

        true
    }

    async fn discard(&self, id: &str) {
        self.meta.discard_tmp_image(id);
        self.blobs.discard_tmp_layer(id).await;
    }
}

//
// Wire-format middleware: every response carries these two headers,
// regardless of the handler that produced it — a protocol quirk inherited
// from the original registry, which sets them once up front for the whole
// server rather than per-handler.
//
async fn apply_wire_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response.headers_mut().insert(
        "X-Docker-RegistryAPI-Version",
        HeaderValue::from_static("0.1.0"),
    );
    response
}

fn token_headers(token: &str, namespace: &str, repository: &str, mode: Mode, host: &str) -> HeaderMap {
    let access = match mode {
        Mode::Read => "read",
        Mode::Write => "write",
    };
    let value = format!(
        "Token signature={token},repository=\"{namespace}/{repository}\",access={access}"
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        "WWW-Authenticate",
        HeaderValue::from_str(&value).expect("header value is ASCII"),
    );
    headers.insert(
        "X-Docker-Token",
        HeaderValue::from_str(&value).expect("header value is ASCII"),
    );
    headers.insert(
        "X-Docker-Endpoints",
        HeaderValue::from_str(host).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers
}

fn host_of(headers: &HeaderMap) -> String {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned()
}

async fn ping() -> &'static str {
    "true"
}

async fn check_login(creds: UnverifiedCredentials, State(registry): State<Arc<Registry>>) -> StatusCode {
    if registry.auth.authenticate(&creds.username, "").await {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

/// Always fails, forcing the client to fall through to the login check —
/// this registry never creates new accounts.
async fn register() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!("Username or email already exists")),
    )
}

async fn put_repository_images(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository)): Path<(String, String)>,
    creds: UnverifiedCredentials,
    headers: HeaderMap,
    Json(entries): Json<Vec<RepositoryImagePut>>,
) -> Result<Response, RegistryError> {
    let image_ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();

    let Some(token) = registry
        .auth
        .authorize(
            &creds.username,
            "",
            &namespace,
            &repository,
            &image_ids,
            Mode::Write,
        )
        .await
    else {
        return Err(RegistryError::Unauthorized);
    };

    registry.meta.set_images(&namespace, &repository, image_ids);
    for entry in entries {
        if let Some(tag) = entry.tag {
            registry.meta.set_tag(&namespace, &repository, &entry.id, &tag);
        }
    }

    let token_headers = token_headers(&token, &namespace, &repository, Mode::Write, &host_of(&headers));
    Ok((StatusCode::OK, token_headers, Json(json!({}))).into_response())
}

async fn get_repository_images(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository)): Path<(String, String)>,
    creds: UnverifiedCredentials,
    headers: HeaderMap,
) -> Result<Response, RegistryError> {
    let images = registry
        .meta
        .images(&namespace, &repository)
        .unwrap_or_default();

    let Some(token) = registry
        .auth
        .authorize(
            &creds.username,
            "",
            &namespace,
            &repository,
            &images,
            Mode::Read,
        )
        .await
    else {
        return Err(RegistryError::Unauthorized);
    };

    let body: Vec<_> = images.iter().map(|id| json!({ "id": id })).collect();
    let token_headers = token_headers(&token, &namespace, &repository, Mode::Read, &host_of(&headers));
    Ok((StatusCode::OK, token_headers, Json(body)).into_response())
}

/// `PUT .../images` with an empty array marks a push as complete; any other
/// body is malformed as far as this endpoint is concerned.
async fn put_repository_images_complete(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository)): Path<(String, String)>,
    BearerToken(token): BearerToken,
    body: axum::body::Bytes,
) -> Result<StatusCode, RegistryError> {
    if !registry
        .auth
        .has_perm_push_checksums(&token, &namespace, &repository)
        .await
    {
        return Err(RegistryError::Unauthorized);
    }

    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|err| RegistryError::BadRequest(err.to_string()))?;

    match value.as_array() {
        Some(items) if items.is_empty() => Ok(StatusCode::NO_CONTENT),
        _ => Err(RegistryError::BadRequest(
            "expected an empty JSON array".into(),
        )),
    }
}

async fn get_tags(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository)): Path<(String, String)>,
    BearerToken(token): BearerToken,
) -> Result<Response, RegistryError> {
    if !registry
        .auth
        .has_perm_pull_tags(&token, &namespace, &repository)
        .await
    {
        return Err(RegistryError::Unauthorized);
    }

    let tags = registry
        .meta
        .tags(&namespace, &repository)
        .ok_or(RegistryError::NotFound("tags"))?;

    Ok(Json(tags).into_response())
}

async fn get_tag(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository, tag)): Path<(String, String, String)>,
    BearerToken(token): BearerToken,
) -> Result<Response, RegistryError> {
    if !registry
        .auth
        .has_perm_pull_tag(&token, &namespace, &repository)
        .await
    {
        return Err(RegistryError::Unauthorized);
    }

    let id = registry
        .meta
        .tag(&namespace, &repository, &tag)
        .ok_or(RegistryError::NotFound("tag"))?;

    Ok(Json(id).into_response())
}

async fn put_tag(
    State(registry): State<Arc<Registry>>,
    Path((namespace, repository, tag)): Path<(String, String, String)>,
    BearerToken(token): BearerToken,
    body: axum::body::Bytes,
) -> Result<StatusCode, RegistryError> {
    let image_id: String =
        serde_json::from_slice(&body).map_err(|err| RegistryError::BadRequest(err.to_string()))?;

    if !registry
        .auth
        .has_perm_push_tag(&token, &namespace, &repository, &image_id, &tag)
        .await
    {
        return Err(RegistryError::Unauthorized);
    }

    registry.meta.set_tag(&namespace, &repository, &image_id, &tag);
    Ok(StatusCode::OK)
}

async fn get_image_json(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
) -> Result<Response, RegistryError> {
    if !registry.auth.has_perm_pull_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    let json = registry
        .meta
        .image_json(&image_id)
        .ok_or(RegistryError::NotFound("image"))?;
    let checksum = registry.meta.checksum(&image_id).unwrap_or_default();
    let size = registry.meta.size(&image_id).unwrap_or_default();

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Docker-Payload-Checksum",
        HeaderValue::from_str(&format!("sha256:{checksum}")).expect("hex digest is ASCII"),
    );
    headers.insert(
        "X-Docker-Size",
        HeaderValue::from_str(&size.to_string()).expect("integer is ASCII"),
    );

    Ok((StatusCode::OK, headers, json).into_response())
}

async fn put_image_json(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
    body: axum::body::Bytes,
) -> Result<StatusCode, RegistryError> {
    if !registry.auth.has_perm_push_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    registry.stage_image_json(&image_id, &body)?;
    Ok(StatusCode::OK)
}

async fn get_image_layer(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
) -> Result<Response, RegistryError> {
    if !registry.auth.has_perm_pull_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    let file = registry
        .blobs
        .layer(&image_id)
        .await
        .map_err(|_| RegistryError::NotFound("layer"))?;

    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, Body::from_stream(stream)).into_response())
}

async fn put_image_layer(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
    request: Request<Body>,
) -> Result<StatusCode, RegistryError> {
    if !registry.auth.has_perm_push_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    let reader = tokio_util::io::StreamReader::new(
        request
            .into_body()
            .into_data_stream()
            .map(|result| result.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))),
    );

    registry.stage_layer(&image_id, reader).await?;
    Ok(StatusCode::OK)
}

async fn put_image_checksum(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
    headers: HeaderMap,
) -> Result<StatusCode, RegistryError> {
    if !registry.auth.has_perm_push_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    let header_value = headers
        .get("X-Docker-Checksum-Payload")
        .or_else(|| headers.get("X-Docker-Checksum"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RegistryError::BadRequest("missing checksum header".into()))?;

    let expected = header_value.strip_prefix("sha256:").unwrap_or(header_value);

    if registry
        .validate_and_commit_layer(&image_id, expected)
        .await
    {
        Ok(StatusCode::OK)
    } else {
        Err(RegistryError::ChecksumMismatch)
    }
}

async fn get_image_ancestry(
    State(registry): State<Arc<Registry>>,
    Path(image_id): Path<String>,
    BearerToken(token): BearerToken,
) -> Result<Response, RegistryError> {
    if !registry.auth.has_perm_pull_image(&token, &image_id).await {
        return Err(RegistryError::Unauthorized);
    }

    if registry.meta.image_json(&image_id).is_none() {
        return Err(RegistryError::NotFound("image"));
    }

    Ok(Json(registry.meta.ancestry(&image_id)).into_response())
}

/// DELETE is accepted and treated as a no-op across the board — clients of
/// this protocol expect a success status, but nothing is actually removed.
async fn accept_delete(request: Request<Body>) -> StatusCode {
    debug!(method = %request.method(), uri = %request.uri(), "accepted no-op delete");
    StatusCode::NO_CONTENT
}
