//! Argument vectors for the extraction tool.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    request::{DownloadRequest, MediaType},
};

pub const DEFAULT_HEIGHT_CAP: &str = "1080";
pub const VIDEO_MERGE_PREFERENCE: &str = "mp4/mkv/webm";
pub const AUDIO_PREFERENCE: [&str; 4] = ["mp3", "m4a", "opus", "wav"];

/// Flag telling the extraction tool to print the final file path once all
/// post-processing has finished.
pub const PRINT_FINAL_PATH: [&str; 2] = ["--print", "after_move:filepath"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    pub args: Vec<String>,
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    downloads_dir: PathBuf,
    base_args: Vec<String>,
}

impl CommandBuilder {
    pub fn new(downloads_dir: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            base_args,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.downloads_dir.clone(), base_args(config))
    }

    /// Arguments for a query that only prints to stdout (`--dump-json`,
    /// `--list-formats`, ...). The URL is always last.
    pub fn query(&self, flags: &[&str], url: &str) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(flags.iter().map(ToString::to_string));
        args.push(url.to_string());
        args
    }

    pub fn build(
        &self,
        request: &DownloadRequest,
        marker: Option<String>,
        audio_supported: &BTreeSet<String>,
    ) -> BuiltCommand {
        let marker = marker.unwrap_or_else(new_marker);
        let template = self
            .downloads_dir
            .join(format!("%(title)s_{marker}.%(ext)s"));

        let mut args = self.base_args.clone();
        args.push("--no-playlist".to_string());
        args.extend(PRINT_FINAL_PATH.map(String::from));
        args.push("--no-simulate".to_string());
        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());

        if let Some(section) =
            download_sections(request.start_time.as_deref(), request.end_time.as_deref())
        {
            args.push("--download-sections".to_string());
            args.push(section);
        }

        match request.media_type {
            MediaType::Video => {
                args.push("-f".to_string());
                args.push(video_format_selector(request.quality.as_deref()));
                args.push("--merge-output-format".to_string());
                args.push(
                    request
                        .extension
                        .clone()
                        .unwrap_or_else(|| VIDEO_MERGE_PREFERENCE.to_string()),
                );
            }
            MediaType::Audio => args.extend(audio_args(request, audio_supported)),
        }

        args.push(request.url.clone());
        BuiltCommand { args, marker }
    }
}

pub fn new_marker() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().timestamp(), &suffix[..8])
}

pub fn download_sections(start: Option<&str>, end: Option<&str>) -> Option<String> {
    if start.is_none() && end.is_none() {
        return None;
    }
    Some(format!(
        "*{}-{}",
        start.unwrap_or("00:00:00"),
        end.unwrap_or_default()
    ))
}

pub fn video_format_selector(quality: Option<&str>) -> String {
    let cap = quality
        .map(|value| value.trim_end_matches(['p', 'P']))
        .filter(|value| !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(DEFAULT_HEIGHT_CAP);
    format!("bv*[height<={cap}]+ba/b[height<={cap}]")
}

fn audio_args(request: &DownloadRequest, audio_supported: &BTreeSet<String>) -> Vec<String> {
    let mut args = vec!["-x".to_string()];

    let chosen = request.extension.clone().or_else(|| {
        AUDIO_PREFERENCE
            .iter()
            .find(|extension| audio_supported.contains(**extension))
            .map(|extension| extension.to_string())
    });
    if let Some(extension) = chosen {
        args.push("--audio-format".to_string());
        args.push(extension);
    }

    // Non-numeric bitrates are dropped rather than rejected.
    if let Some(bitrate) = request
        .quality
        .as_deref()
        .map(|value| value.trim_end_matches(['k', 'K']))
        .and_then(|value| value.parse::<u32>().ok())
    {
        args.push("--audio-quality".to_string());
        args.push(bitrate.to_string());
    }

    args
}

pub fn base_args(config: &ServiceConfig) -> Vec<String> {
    let mut args = vec!["--no-check-certificate".to_string()];
    if !config.user_agent.is_empty() {
        args.push("--user-agent".to_string());
        args.push(config.user_agent.clone());
    }
    if let Some(cookies) = cookies_if_present(&config.cookies_file) {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().into_owned());
    }
    args
}

/// The cookies file is only worth passing when it holds at least one entry.
fn cookies_if_present(path: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(path).ok()?;
    let has_entries = contents.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    });
    if !has_entries {
        return None;
    }
    fs::canonicalize(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn builder() -> CommandBuilder {
        CommandBuilder::new("/srv/downloads", Vec::new())
    }

    fn all_audio() -> BTreeSet<String> {
        AUDIO_PREFERENCE.map(String::from).into()
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|index| args.get(index + 1))
            .map(String::as_str)
    }

    #[test]
    fn marker_has_timestamp_and_hex_suffix() {
        let marker = new_marker();
        let (timestamp, suffix) = marker.split_once('_').unwrap();
        assert!(timestamp.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn url_is_last_and_template_embeds_marker() {
        let request = DownloadRequest::new("https://example/video", MediaType::Video);
        let built = builder().build(&request, None, &all_audio());

        assert_eq!(built.args.last().unwrap(), "https://example/video");
        let template = value_after(&built.args, "-o").unwrap();
        assert!(template.contains(&built.marker));
        assert!(template.starts_with("/srv/downloads/"));
        assert!(template.ends_with(&format!("%(title)s_{}.%(ext)s", built.marker)));
    }

    #[test]
    fn supplied_marker_is_reused() {
        let request = DownloadRequest::new("https://example/video", MediaType::Audio);
        let built = builder().build(&request, Some("fixed_marker".into()), &all_audio());
        assert_eq!(built.marker, "fixed_marker");
    }

    #[test]
    fn video_request_with_quality() {
        let mut request = DownloadRequest::new("https://example/video", MediaType::Video);
        request.quality = Some("720p".into());
        let built = builder().build(&request, None, &all_audio());

        assert_eq!(
            value_after(&built.args, "-f"),
            Some("bv*[height<=720]+ba/b[height<=720]")
        );
        assert_eq!(
            value_after(&built.args, "--merge-output-format"),
            Some("mp4/mkv/webm")
        );
        assert!(!built.args.iter().any(|arg| arg == "-x"));
    }

    #[test]
    fn video_defaults_to_1080_cap_and_honours_extension() {
        let mut request = DownloadRequest::new("https://example/video", MediaType::Video);
        request.extension = Some("mkv".into());
        let built = builder().build(&request, None, &all_audio());

        assert_eq!(
            value_after(&built.args, "-f"),
            Some("bv*[height<=1080]+ba/b[height<=1080]")
        );
        assert_eq!(value_after(&built.args, "--merge-output-format"), Some("mkv"));
    }

    #[test]
    fn audio_request_picks_first_supported_extension() {
        let mut request = DownloadRequest::new("https://example/video", MediaType::Audio);
        request.quality = Some("192k".into());
        let built = builder().build(&request, None, &all_audio());

        assert!(built.args.iter().any(|arg| arg == "-x"));
        assert_eq!(value_after(&built.args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&built.args, "--audio-quality"), Some("192"));
        assert!(value_after(&built.args, "-f").is_none());
    }

    #[test]
    fn audio_preference_skips_unsupported_and_may_choose_nothing() {
        let request = DownloadRequest::new("https://example/video", MediaType::Audio);

        let supported: BTreeSet<String> = ["opus", "wav"].map(String::from).into();
        let built = builder().build(&request, None, &supported);
        assert_eq!(value_after(&built.args, "--audio-format"), Some("opus"));

        let built = builder().build(&request, None, &BTreeSet::new());
        assert!(value_after(&built.args, "--audio-format").is_none());
    }

    #[test]
    fn non_numeric_audio_quality_is_dropped() {
        let mut request = DownloadRequest::new("https://example/video", MediaType::Audio);
        request.quality = Some("bestk".into());
        let built = builder().build(&request, None, &all_audio());
        assert!(value_after(&built.args, "--audio-quality").is_none());
    }

    #[test]
    fn sections_only_when_a_bound_is_set() {
        assert_eq!(download_sections(None, None), None);
        assert_eq!(
            download_sections(Some("00:01:00"), None).as_deref(),
            Some("*00:01:00-")
        );
        assert_eq!(
            download_sections(None, Some("00:02:00")).as_deref(),
            Some("*00:00:00-00:02:00")
        );

        let request = DownloadRequest::new("https://example/video", MediaType::Video);
        let built = builder().build(&request, None, &all_audio());
        assert!(!built.args.iter().any(|arg| arg == "--download-sections"));

        let mut request = DownloadRequest::new("https://example/video", MediaType::Video);
        request.start_time = Some("00:00:10".into());
        request.end_time = Some("00:00:20".into());
        let built = builder().build(&request, None, &all_audio());
        let section = value_after(&built.args, "--download-sections").unwrap();
        assert!(section.starts_with('*'));
        assert_eq!(section, "*00:00:10-00:00:20");
    }

    #[test]
    fn query_args_end_with_url() {
        let builder = CommandBuilder::new("/d", vec!["--no-check-certificate".into()]);
        let args = builder.query(&["--list-formats"], "https://example/video");
        assert_eq!(
            args,
            vec!["--no-check-certificate", "--list-formats", "https://example/video"]
        );
    }

    #[test]
    fn cookies_are_only_passed_when_the_file_has_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        let mut config = ServiceConfig::default();
        config.cookies_file = cookies.clone();

        assert!(!base_args(&config).iter().any(|arg| arg == "--cookies"));

        std::fs::write(&cookies, "# Netscape HTTP Cookie File\n\n").unwrap();
        assert!(!base_args(&config).iter().any(|arg| arg == "--cookies"));

        let mut file = std::fs::OpenOptions::new().append(true).open(&cookies).unwrap();
        writeln!(file, ".example.com\tTRUE\t/\tFALSE\t0\tname\tvalue").unwrap();
        let args = base_args(&config);
        assert!(args.iter().any(|arg| arg == "--cookies"));
        assert_eq!(args[0], "--no-check-certificate");
        assert_eq!(value_after(&args, "--user-agent"), Some(config.user_agent.as_str()));
    }
}
