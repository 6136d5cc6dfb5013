use std::{collections::BTreeSet, fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::non_empty,
    error::{ApiError, ApiResult},
};

static VIDEO_QUALITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+p$").expect("video quality pattern"));
static AUDIO_QUALITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+k$").expect("audio quality pattern"));
static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{2,5}$").expect("extension pattern"));
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}):([0-5]\d):([0-5]\d)$").expect("timestamp pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => f.write_str("video"),
            MediaType::Audio => f.write_str("audio"),
        }
    }
}

/// A download as submitted by the client. Call [`DownloadRequest::normalized`]
/// before handing it to the command builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            media_type,
            extension: None,
            quality: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Trims every field, turns blank optionals into `None` and checks the
    /// shape invariants that do not depend on the environment.
    pub fn normalized(self) -> ApiResult<Self> {
        let url = validate_url(&self.url)?;
        let extension = clean(self.extension).map(|value| value.to_ascii_lowercase());
        let quality = clean(self.quality);
        let start_time = clean(self.start_time);
        let end_time = clean(self.end_time);

        if let Some(extension) = extension.as_deref()
            && !EXTENSION.is_match(extension)
        {
            return Err(ApiError::bad_request(format!(
                "Invalid extension '{extension}': expected 2-5 alphanumeric characters"
            )));
        }

        if let Some(quality) = quality.as_deref() {
            let (pattern, example) = match self.media_type {
                MediaType::Video => (&*VIDEO_QUALITY, "720p"),
                MediaType::Audio => (&*AUDIO_QUALITY, "192k"),
            };
            if !pattern.is_match(quality) {
                return Err(ApiError::bad_request(format!(
                    "Invalid {} quality '{quality}': expected a value like {example}",
                    self.media_type
                )));
            }
        }

        let start_seconds = start_time.as_deref().map(parse_timestamp).transpose()?;
        let end_seconds = end_time.as_deref().map(parse_timestamp).transpose()?;
        if let (Some(start), Some(end)) = (start_seconds, end_seconds)
            && end <= start
        {
            return Err(ApiError::bad_request(
                "Invalid time range: end_time must be after start_time",
            ));
        }

        Ok(Self {
            url,
            media_type: self.media_type,
            extension,
            quality,
            start_time,
            end_time,
        })
    }

    pub fn check_extension(&self, supported: &BTreeSet<String>) -> ApiResult<()> {
        match self.extension.as_deref() {
            Some(extension) if !supported.contains(extension) => {
                let allowed = supported.iter().cloned().collect::<Vec<_>>().join(", ");
                Err(ApiError::bad_request(format!(
                    "Unsupported {} extension '{extension}'. Allowed: [{allowed}]",
                    self.media_type
                )))
            }
            _ => Ok(()),
        }
    }
}

pub fn validate_url(raw: &str) -> ApiResult<String> {
    let url = non_empty(raw).ok_or_else(|| ApiError::bad_request("URL cannot be empty"))?;
    let parsed =
        Url::parse(url).map_err(|_| ApiError::bad_request(format!("Invalid URL: {url}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ApiError::bad_request(format!("Invalid URL: {url}")));
    }
    Ok(url.to_string())
}

fn parse_timestamp(value: &str) -> ApiResult<u32> {
    let invalid = || ApiError::bad_request(format!("Invalid time '{value}': expected HH:MM:SS"));
    let captures = TIMESTAMP.captures(value).ok_or_else(invalid)?;
    let field = |index: usize| {
        captures
            .get(index)
            .and_then(|part| part.as_str().parse::<u32>().ok())
            .ok_or_else(invalid)
    };
    Ok(field(1)? * 3600 + field(2)? * 60 + field(3)?)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .and_then(non_empty)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn video(url: &str) -> DownloadRequest {
        DownloadRequest::new(url, MediaType::Video)
    }

    #[test]
    fn media_type_deserializes_lowercase() {
        let request: DownloadRequest =
            serde_json::from_str(r#"{"url":"https://example.com/v","media_type":"audio"}"#)
                .unwrap();
        assert_eq!(request.media_type, MediaType::Audio);
        assert!(request.extension.is_none());
    }

    #[test]
    fn blank_optionals_become_none() {
        let mut request = video(" https://example.com/watch?v=1 ");
        request.extension = Some("  ".into());
        request.quality = Some("".into());
        let request = request.normalized().unwrap();
        assert_eq!(request.url, "https://example.com/watch?v=1");
        assert!(request.extension.is_none());
        assert!(request.quality.is_none());
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in ["", "not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            let error = video(url).normalized().unwrap_err();
            assert_eq!(error.kind, ErrorKind::InvalidRequest, "{url}");
        }
    }

    #[test]
    fn quality_must_match_media_type() {
        let mut request = video("https://example.com/v");
        request.quality = Some("720".into());
        assert!(request.normalized().is_err());

        let mut request = video("https://example.com/v");
        request.quality = Some("192k".into());
        assert!(request.normalized().is_err());

        let mut request = DownloadRequest::new("https://example.com/v", MediaType::Audio);
        request.quality = Some("192k".into());
        assert!(request.normalized().is_ok());
    }

    #[test]
    fn extension_shape_is_checked() {
        for extension in ["m*p3", "a", "toolong"] {
            let mut request = video("https://example.com/v");
            request.extension = Some(extension.into());
            assert!(request.normalized().is_err(), "{extension}");
        }
    }

    #[test]
    fn time_range_is_validated() {
        let mut request = video("https://example.com/v");
        request.start_time = Some("00:01:00".into());
        request.end_time = Some("00:00:30".into());
        assert!(request.normalized().is_err());

        let mut request = video("https://example.com/v");
        request.start_time = Some("00:61:00".into());
        assert!(request.normalized().is_err());

        let mut request = video("https://example.com/v");
        request.end_time = Some("1:02:03".into());
        assert!(request.normalized().is_ok());
    }

    #[test]
    fn unsupported_extension_is_invalid_request() {
        let supported: BTreeSet<String> = ["mp4", "mkv", "webm"].map(String::from).into();
        let mut request = video("https://example.com/v");
        request.extension = Some("xyz".into());
        let request = request.normalized().unwrap();

        let error = request.check_extension(&supported).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert!(error.message.contains("Unsupported video extension 'xyz'"));
    }
}
