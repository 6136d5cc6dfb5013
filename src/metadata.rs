use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult, ErrorKind};

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    duration_string: Option<String>,
    thumbnail: Option<String>,
    view_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub duration: u64,
    pub duration_string: String,
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
}

/// Reads the `--dump-json` document. Only the first line is considered when
/// the tool emits one document per line.
pub fn parse_media_info(stdout: &str) -> ApiResult<MediaInfo> {
    let document = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let info: YtDlpInfo = serde_json::from_str(document).map_err(|_| {
        ApiError::upstream(ErrorKind::UpstreamFailure, "Failed to parse yt-dlp JSON output")
    })?;

    let duration = info
        .duration
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value as u64)
        .unwrap_or_default();

    Ok(MediaInfo {
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        duration,
        duration_string: info
            .duration_string
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format_duration(duration)),
        thumbnail: info.thumbnail.unwrap_or_default(),
        views: info.view_count,
    })
}

pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
