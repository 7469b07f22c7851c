//! `/files` handlers: upload, batch upload, metadata, download and inline streaming.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use dedupstore_core::defaults::{RECENT_LINKS_LIMIT, TEMPORARY_OWNER_PREFIX, TEMPORARY_OWNER_TYPE};
use dedupstore_core::{
    format_bytes, Error, Link, OwnerRef, ProcessingStatus, StoreOptions, StoredObject,
};
use dedupstore_engine::{Download, StorageEngine};

use crate::error::ApiError;
use crate::AppState;

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// A stored object as seen by API clients, optionally with the link a
/// request just created.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub hash: String,
    pub md5_hash: Option<String>,
    pub filename: String,
    pub original_name: Option<String>,
    pub mime_type: String,
    pub size: i64,
    pub size_human: String,
    pub disk: String,
    pub status: ProcessingStatus,
    pub url: Option<String>,
    pub download_url: String,
    pub stream_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_status: Option<ProcessingStatus>,
}

impl FileResponse {
    fn build(
        engine: &StorageEngine,
        object: &StoredObject,
        link: Option<&Link>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            hash: object.hash.clone(),
            md5_hash: object.md5.clone(),
            filename: object.filename.clone(),
            original_name: link
                .and_then(|l| l.original_name.clone())
                .or_else(|| object.original_name.clone()),
            mime_type: object.mime_type.clone(),
            size: object.size,
            size_human: format_bytes(object.size.max(0) as u64),
            disk: object.disk.clone(),
            status: object.status,
            url: engine.url_for(object)?,
            download_url: format!("/files/{}/download", object.hash),
            stream_url: format!("/files/{}/stream", object.hash),
            created_at: object.created_at,
            relation_id: link.map(|l| l.id),
            relation_status: link.map(|l| l.status),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RelationResponse {
    pub id: i64,
    pub owner_type: String,
    pub owner_id: String,
    pub status: ProcessingStatus,
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Link> for RelationResponse {
    fn from(link: Link) -> Self {
        Self {
            id: link.id,
            owner_type: link.owner_type,
            owner_id: link.owner_id,
            status: link.status,
            original_name: link.original_name,
            created_at: link.created_at,
        }
    }
}

/// Metadata view for `GET /files/{hash}`.
#[derive(Debug, Serialize)]
pub struct FileDetails {
    #[serde(flatten)]
    pub file: FileResponse,
    pub path: String,
    /// Whether the blob is present on its disk.
    pub exists: bool,
    pub updated_at: DateTime<Utc>,
    pub relations_count: i64,
    pub relations_by_type: BTreeMap<String, i64>,
    pub relations: Vec<RelationResponse>,
}

/// One entry of a batch upload response.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Stored(FileResponse),
    Failed {
        error: bool,
        original_name: String,
        message: String,
    },
}

// =============================================================================
// MULTIPART
// =============================================================================

/// An uploaded file part spooled to a temporary file. The file is removed
/// when this value drops.
struct SpooledFile {
    path: TempPath,
    client_name: String,
    client_mime: Option<String>,
    size: u64,
}

#[derive(Default)]
struct UploadForm {
    files: Vec<SpooledFile>,
    owner_type: Option<String>,
    owner_id: Option<String>,
    disk: Option<String>,
}

impl UploadForm {
    /// Read every part. File parts named `file_field` are spooled to disk,
    /// unknown parts are skipped.
    async fn read(mut multipart: Multipart, file_field: &str) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        let array_field = format!("{}[]", file_field);

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                n if n == file_field || n == array_field => {
                    form.files.push(spool(field).await?);
                }
                "owner_type" => form.owner_type = non_empty(field.text().await?),
                "owner_id" => form.owner_id = non_empty(field.text().await?),
                "disk" => form.disk = non_empty(field.text().await?),
                other => debug!(subsystem = "api", field = other, "Ignoring multipart field"),
            }
        }
        Ok(form)
    }

    /// Explicit owner from the form. Both parts or neither must be given.
    fn owner(&self) -> Result<Option<OwnerRef>, ApiError> {
        match (&self.owner_type, &self.owner_id) {
            (Some(owner_type), Some(owner_id)) => {
                Ok(Some(OwnerRef::new(owner_type.clone(), owner_id.clone())))
            }
            (None, None) => Ok(None),
            _ => Err(ApiError::BadRequest(
                "owner_type and owner_id must be provided together".to_string(),
            )),
        }
    }

    fn options(&self) -> StoreOptions {
        StoreOptions {
            disk: self.disk.clone(),
            ..Default::default()
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn spool(mut field: Field<'_>) -> Result<SpooledFile, ApiError> {
    let client_name = field.file_name().unwrap_or("upload").to_string();
    let client_mime = field.content_type().map(str::to_string);

    let (file, path) = tempfile::NamedTempFile::new()?.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(SpooledFile {
        path,
        client_name,
        client_mime,
        size,
    })
}

/// Owner for uploads that name none: a fresh `upload:temp_<uuid>` reference.
fn temporary_owner() -> OwnerRef {
    OwnerRef::new(
        TEMPORARY_OWNER_TYPE,
        format!("{}{}", TEMPORARY_OWNER_PREFIX, Uuid::now_v7().simple()),
    )
}

async fn store_spooled(
    engine: &StorageEngine,
    file: &SpooledFile,
    owner: &OwnerRef,
    options: &StoreOptions,
) -> Result<FileResponse, ApiError> {
    let link = engine
        .store_uploaded(
            file.path.to_path_buf(),
            &file.client_name,
            file.client_mime.clone(),
            owner,
            options,
        )
        .await?;
    let object = engine
        .find(&link.hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("File {} not found", link.hash)))?;
    FileResponse::build(engine, &object, Some(&link))
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /files`: store the `file` part and link it to the given owner.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = UploadForm::read(multipart, "file").await?;
    let owner = form.owner()?.unwrap_or_else(temporary_owner);
    let file = form
        .files
        .first()
        .ok_or_else(|| ApiError::BadRequest("Missing file field 'file'".to_string()))?;

    let response = store_spooled(&state.engine, file, &owner, &form.options()).await?;
    info!(
        subsystem = "api",
        op = "upload",
        hash = %response.hash,
        owner = %owner,
        size = file.size,
        "File uploaded"
    );
    Ok((StatusCode::CREATED, Json(Envelope::ok(response))))
}

/// `POST /files/batch`: store every `files` part. Failures are reported per item.
pub async fn upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = UploadForm::read(multipart, "files").await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest(
            "Missing file field 'files'".to_string(),
        ));
    }
    let owner = form.owner()?;
    let options = form.options();

    let mut items = Vec::with_capacity(form.files.len());
    for file in &form.files {
        let owner = owner.clone().unwrap_or_else(temporary_owner);
        let item = match store_spooled(&state.engine, file, &owner, &options).await {
            Ok(response) => BatchItem::Stored(response),
            Err(err) => BatchItem::Failed {
                error: true,
                original_name: file.client_name.clone(),
                message: error_message(err),
            },
        };
        items.push(item);
    }

    let failed = items
        .iter()
        .filter(|i| matches!(i, BatchItem::Failed { .. }))
        .count();
    info!(
        subsystem = "api",
        op = "upload_batch",
        total = items.len(),
        failed,
        "Batch uploaded"
    );
    Ok((StatusCode::CREATED, Json(Envelope::ok(items))))
}

fn error_message(err: ApiError) -> String {
    match err {
        ApiError::Store(e) => e.to_string(),
        ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
        ApiError::Multipart(e) => e.body_text(),
    }
}

/// `GET /files/{hash}`: object metadata plus its links.
pub async fn show_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Envelope<FileDetails>>, ApiError> {
    let hash = parse_hash(&hash)?;
    let engine = &state.engine;
    let object = engine
        .find(&hash)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let exists = engine.disks().get(&object.disk)?.exists(&object.path).await?;
    let links = engine.links();
    let relations_count = links.count_for_hash(&hash).await?;
    let relations_by_type = links
        .counts_by_owner_type(&hash)
        .await?
        .into_iter()
        .collect();
    let relations = links
        .recent_for_hash(&hash, RECENT_LINKS_LIMIT)
        .await?
        .into_iter()
        .map(RelationResponse::from)
        .collect();

    Ok(Json(Envelope::ok(FileDetails {
        file: FileResponse::build(engine, &object, None)?,
        path: object.path.clone(),
        exists,
        updated_at: object.updated_at,
        relations_count,
        relations_by_type,
        relations,
    })))
}

/// `GET /files/{hash}/download`: the blob as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&hash)?;
    let download = open_download(&state.engine, &hash).await?;

    let disposition = content_disposition("attachment", &download.filename)?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok(blob_response(download, headers))
}

/// `GET /files/{hash}/stream`: the blob inline, cacheable by its hash.
pub async fn stream_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&hash)?;
    let etag = header_value(format!("\"{}\"", hash))?;

    if etag_matches(&request_headers, &hash) {
        if !state.engine.exists(&hash).await? {
            return Err(ApiError::NotFound("File not found".to_string()));
        }
        return Ok((StatusCode::NOT_MODIFIED, [(ETAG, etag)]).into_response());
    }

    let download = open_download(&state.engine, &hash).await?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_DISPOSITION, content_disposition("inline", &download.filename)?);
    headers.insert(CACHE_CONTROL, header_value(state.cache_control.clone())?);
    headers.insert(ETAG, etag);
    Ok(blob_response(download, headers))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn open_download(engine: &StorageEngine, hash: &str) -> Result<Download, ApiError> {
    engine
        .stream_download(hash)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))
}

fn blob_response(download: Download, mut headers: HeaderMap) -> Response {
    if let Ok(mime) = HeaderValue::from_str(&download.mime_type) {
        headers.insert(CONTENT_TYPE, mime);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(download.size));
    let body = Body::from_stream(ReaderStream::new(download.reader));
    (headers, body).into_response()
}

// =============================================================================
// HELPERS
// =============================================================================

/// Accept a 40-character hex SHA-1, normalised to lowercase.
fn parse_hash(raw: &str) -> Result<String, ApiError> {
    if raw.len() == 40 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(raw.to_ascii_lowercase())
    } else {
        Err(ApiError::BadRequest(format!("Invalid file hash: {}", raw)))
    }
}

fn etag_matches(headers: &HeaderMap, hash: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/").trim_matches('"'))
        .any(|tag| tag == "*" || tag.eq_ignore_ascii_case(hash))
}

fn header_value(value: String) -> Result<HeaderValue, ApiError> {
    HeaderValue::try_from(value)
        .map_err(|e| ApiError::Store(Error::Internal(format!("invalid header value: {}", e))))
}

/// `Content-Disposition` with an ASCII fallback name and, for non-ASCII
/// names, an RFC 5987 `filename*` parameter.
fn content_disposition(kind: &str, filename: &str) -> Result<HeaderValue, ApiError> {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut value = format!("{}; filename=\"{}\"", kind, fallback);
    if !filename.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in filename.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(byte as char);
            } else {
                value.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    header_value(value)
}
