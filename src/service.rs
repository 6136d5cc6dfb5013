use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::{
    capabilities::{Capabilities, CapabilityCache, FfmpegProbe},
    command::CommandBuilder,
    config::ServiceConfig,
    custodian::FileCustodian,
    error::{ApiError, ApiResult},
    listing::{FormatTable, SubtitleTable, parse_formats, parse_subtitles},
    metadata::{MediaInfo, parse_media_info},
    output::{MatchKind, locate_output},
    request::{DownloadRequest, validate_url},
    tool::{ToolOutput, classify_failure, launch_failure, run_tool},
};

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub filename: String,
    pub matched_by: MatchKind,
}

pub struct MediaService {
    config: ServiceConfig,
    commands: CommandBuilder,
    capabilities: CapabilityCache,
    custodian: FileCustodian,
    download_permits: Semaphore,
}

impl MediaService {
    pub async fn new(config: ServiceConfig) -> ApiResult<Self> {
        let capabilities = CapabilityCache::new(FfmpegProbe::new(config.ffmpeg_bin.clone()));
        Self::with_capabilities(config, capabilities).await
    }

    pub async fn with_capabilities(
        config: ServiceConfig,
        capabilities: CapabilityCache,
    ) -> ApiResult<Self> {
        let custodian = FileCustodian::open(&config.downloads_dir, config.file_max_age)
            .await
            .map_err(|error| {
                ApiError::internal(format!(
                    "Could not prepare downloads directory {:?}: {error}",
                    config.downloads_dir
                ))
            })?;
        let mut config = config;
        config.downloads_dir = custodian.root().to_path_buf();

        Ok(Self {
            commands: CommandBuilder::from_config(&config),
            download_permits: Semaphore::new(config.max_concurrent_downloads),
            capabilities,
            custodian,
            config,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn custodian(&self) -> &FileCustodian {
        &self.custodian
    }

    pub async fn capabilities(&self) -> &Capabilities {
        self.capabilities.get().await
    }

    pub async fn media_info(&self, url: &str) -> ApiResult<MediaInfo> {
        let url = validate_url(url)?;
        let output = self
            .query(&["--dump-json", "--no-warnings"], &url, "Failed to get video info")
            .await?;
        parse_media_info(&output.stdout)
    }

    pub async fn formats(&self, url: &str) -> ApiResult<FormatTable> {
        let url = validate_url(url)?;
        let output = self
            .query(&["--list-formats"], &url, "Failed to get formats")
            .await?;
        Ok(parse_formats(&output.stdout))
    }

    pub async fn subtitles(&self, url: &str) -> ApiResult<SubtitleTable> {
        let url = validate_url(url)?;
        let output = self
            .query(&["--list-subs"], &url, "Failed to get subtitles")
            .await?;
        Ok(parse_subtitles(&output.stdout))
    }

    pub async fn download(&self, request: DownloadRequest) -> ApiResult<DownloadOutcome> {
        let request = request.normalized()?;
        let capabilities = self.capabilities.get().await;
        request.check_extension(capabilities.for_media(request.media_type))?;

        let _permit = self
            .download_permits
            .acquire()
            .await
            .map_err(|_| ApiError::internal("Download capacity is unavailable"))?;

        self.custodian.sweep_expired().await;

        let built = self.commands.build(&request, None, &capabilities.audio);
        info!(
            "Starting {} download of {} (marker {})",
            request.media_type, request.url, built.marker
        );

        let output = self
            .run(&built.args, self.config.download_timeout, "Download")
            .await?;
        if !output.success() {
            return Err(classify_failure(&output.stderr, &request.url, "Download failed"));
        }

        let located = locate_output(self.custodian.root(), &output.stdout, &built.marker)
            .await
            .ok_or_else(|| ApiError::not_found("No file was downloaded"))?;
        if located.matched_by == MatchKind::Fallback && self.config.strict_output_match {
            warn!(
                "Rejecting unmarked output {:?} for marker {}",
                located.path, built.marker
            );
            return Err(ApiError::not_found(
                "No file was downloaded for this request",
            ));
        }

        let filename = located
            .file_name()
            .map(ToString::to_string)
            .ok_or_else(|| ApiError::not_found("No file was downloaded"))?;
        info!("Download ready: {filename} ({:?})", located.matched_by);

        Ok(DownloadOutcome {
            path: located.path,
            filename,
            matched_by: located.matched_by,
        })
    }

    pub async fn resolve_file(&self, filename: &str) -> ApiResult<PathBuf> {
        self.custodian
            .resolve(filename)
            .await
            .ok_or_else(ApiError::file_not_found)
    }

    pub fn schedule_delete(&self, path: PathBuf) {
        self.custodian
            .schedule_delete(path, self.config.served_file_ttl);
    }

    pub async fn shutdown(&self) {
        self.custodian.shutdown().await;
    }

    async fn query(&self, flags: &[&str], url: &str, context: &str) -> ApiResult<ToolOutput> {
        let args = self.commands.query(flags, url);
        let output = self
            .run(&args, self.config.query_timeout, "Request")
            .await?;
        if !output.success() {
            let error = classify_failure(&output.stderr, url, "yt-dlp error");
            return Err(ApiError::new(error.kind, format!("{context}: {}", error.message)));
        }
        Ok(output)
    }

    async fn run(&self, args: &[String], limit: Duration, what: &str) -> ApiResult<ToolOutput> {
        run_tool(&self.config.yt_dlp_bin, args, limit)
            .await
            .map_err(|error| launch_failure(error, what))
    }
}

pub type SharedService = Arc<MediaService>;
