use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    capabilities::Capabilities,
    error::{ApiError, ApiResult},
    listing::{FormatTable, SubtitleTable},
    metadata::MediaInfo,
    request::DownloadRequest,
    service::SharedService,
};

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    url: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    message: String,
    filename: String,
    download_url: String,
}

pub fn router(service: SharedService) -> ApiResult<Router> {
    let cors = build_cors_layer(&service.config().allowed_origins)?;

    Ok(Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/info", get(media_info))
        .route("/formats", get(formats))
        .route("/subtitles", get(subtitles))
        .route("/capabilities", get(capabilities))
        .route("/download", post(start_download))
        .route("/download-file/{filename}", get(download_file))
        .with_state(service)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Media Formats API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "media-formats-api"}))
}

async fn media_info(
    State(service): State<SharedService>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<MediaInfo>> {
    service.media_info(&query.url).await.map(Json)
}

async fn formats(
    State(service): State<SharedService>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<FormatTable>> {
    service.formats(&query.url).await.map(Json)
}

async fn subtitles(
    State(service): State<SharedService>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<SubtitleTable>> {
    service.subtitles(&query.url).await.map(Json)
}

async fn capabilities(State(service): State<SharedService>) -> Json<Capabilities> {
    Json(service.capabilities().await.clone())
}

async fn start_download(
    State(service): State<SharedService>,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    let outcome = service.download(payload).await?;

    Ok(Json(DownloadResponse {
        message: "Download completed successfully".to_string(),
        download_url: download_url(&outcome.filename),
        filename: outcome.filename,
    }))
}

async fn download_file(
    State(service): State<SharedService>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Response> {
    let path = service.resolve_file(&filename).await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::file_not_found())?;
    let length = file
        .metadata()
        .await
        .map_err(|_| ApiError::file_not_found())?
        .len();

    let content_type = MimeGuess::from_path(&path)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build download headers"))?,
    );

    service.schedule_delete(path);
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub fn download_url(filename: &str) -> String {
    format!("/download-file/{}", urlencoding::encode(filename))
}

fn build_cors_layer(configured: &[String]) -> ApiResult<CorsLayer> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Accepting requests from any origin.");
        return Ok(base.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!("CORS allow-list loaded with {} origin(s)", normalized_origins.len());

    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!("CORS origin check raw={:?} allowed={}", origin, allowed);
        allowed
    });

    Ok(base.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_percent_encodes_names() {
        assert_eq!(
            download_url("My Clip_1700000000_abcd1234.mp4"),
            "/download-file/My%20Clip_1700000000_abcd1234.mp4"
        );
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("HTTPS://Example.com").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:3000").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(
            normalize_origin("https://example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_configured_origin_is_rejected() {
        assert!(build_cors_layer(&["not an origin".to_string()]).is_err());
        assert!(build_cors_layer(&["http://localhost:3000".to_string()]).is_ok());
        assert!(build_cors_layer(&[]).is_ok());
    }

    #[test]
    fn content_disposition_keeps_unicode_in_extended_form() {
        let header = build_content_disposition("Canción \"final\".mp3");
        assert!(header.starts_with("attachment; filename=\"Canci_n _final_.mp3\""));
        assert!(header.contains("filename*=UTF-8''Canci%C3%B3n%20%22final%22.mp3"));
    }

    #[test]
    fn blank_names_get_placeholder() {
        assert_eq!(sanitize_ascii_filename("   "), "download.bin");
    }
}
