//! Parsers for the extraction tool's human-readable `--list-formats` and
//! `--list-subs` tables.

use std::{
    collections::{BTreeMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;

pub const UNKNOWN_QUALITY: &str = "unknown";

const FORMAT_HEADER_TOKENS: [&str; 2] = ["ID", "format code"];
const SUBTITLE_HEADER_TOKENS: [&str; 2] = ["Language", "Available"];
const FORMAT_NOISE: [&str; 4] = ["[info]", "storyboard", "Extracting", "FILESIZE"];
const EXCLUDED_EXTENSION: &str = "mhtml";

static FORMAT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("format id pattern"));
static ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("alphanumeric pattern"));
static AUDIO_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)audio.*only|only.*audio").expect("audio only pattern")
});
static HEIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)p").expect("height pattern"));
static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)x(\d+)").expect("resolution pattern"));
static BITRATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+k").expect("bitrate pattern"));
static LANGUAGE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2,3}(-[A-Za-z]+)?$").expect("language code pattern")
});
static FORMAT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("format separator pattern"));

pub type QualityTable = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatTable {
    pub video_formats: QualityTable,
    pub audio_formats: QualityTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleInfo {
    pub language_name: String,
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubtitleTable {
    pub subtitles: BTreeMap<String, SubtitleInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FormatLine {
    extension: String,
    quality: String,
    audio_only: bool,
}

pub fn parse_formats(raw: &str) -> FormatTable {
    let mut video = Accumulator::default();
    let mut audio = Accumulator::default();

    for line in raw.lines().filter_map(parse_format_line) {
        let table = if line.audio_only {
            &mut audio
        } else {
            &mut video
        };
        table.push(line.extension, line.quality);
    }

    FormatTable {
        video_formats: video.finish(),
        audio_formats: audio.finish(),
    }
}

fn parse_format_line(line: &str) -> Option<FormatLine> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || FORMAT_HEADER_TOKENS
            .iter()
            .any(|token| trimmed.starts_with(token))
        || is_separator(trimmed)
        || trimmed.starts_with('[')
        || FORMAT_NOISE.iter().any(|noise| trimmed.contains(noise))
        || trimmed.ends_with(':')
    {
        return None;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }
    let (id, extension) = (tokens[0], tokens[1]);
    if !FORMAT_ID.is_match(id) || !ALNUM.is_match(extension) || extension == EXCLUDED_EXTENSION {
        return None;
    }

    let has_resolution = HEIGHT.is_match(trimmed) || RESOLUTION.is_match(trimmed);
    let mentions_audio_only = trimmed.contains("audio only")
        || trimmed.contains("audio-only")
        || AUDIO_ONLY.is_match(trimmed);
    let audio_only = mentions_audio_only && !has_resolution;

    let quality = if audio_only {
        BITRATE.find(trimmed).map(|found| found.as_str().to_string())
    } else {
        HEIGHT
            .find(trimmed)
            .map(|found| found.as_str().to_string())
            .or_else(|| {
                RESOLUTION
                    .captures(trimmed)
                    .and_then(|captures| captures.get(2))
                    .map(|height| format!("{}p", height.as_str()))
            })
    }
    .unwrap_or_else(|| UNKNOWN_QUALITY.to_string());

    Some(FormatLine {
        extension: extension.to_string(),
        quality,
        audio_only,
    })
}

#[derive(Default)]
struct Accumulator {
    table: QualityTable,
    seen: HashSet<(String, String)>,
}

impl Accumulator {
    fn push(&mut self, extension: String, quality: String) {
        if self.seen.insert((extension.clone(), quality.clone())) {
            self.table.entry(extension).or_default().push(quality);
        }
    }

    fn finish(mut self) -> QualityTable {
        for qualities in self.table.values_mut() {
            qualities.sort_by_key(|quality| quality_rank(quality));
        }
        self.table
    }
}

/// Leading number of a quality label; labels without one (`unknown`) rank 0.
pub fn quality_rank(quality: &str) -> u64 {
    let digits: String = quality.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

pub fn parse_subtitles(raw: &str) -> SubtitleTable {
    let mut subtitles = BTreeMap::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || SUBTITLE_HEADER_TOKENS
                .iter()
                .any(|token| trimmed.starts_with(token))
            || is_separator(trimmed)
            || trimmed.starts_with('[')
        {
            continue;
        }

        let Some((code, name, blob)) = split_three(trimmed) else {
            continue;
        };
        if !LANGUAGE_CODE.is_match(code) {
            continue;
        }

        let normalized = FORMAT_SEPARATOR.replace_all(blob, ",");
        let mut formats: Vec<String> = Vec::new();
        for token in normalized.split(',').map(str::trim) {
            if ALNUM.is_match(token) && !formats.iter().any(|known| known == token) {
                formats.push(token.to_string());
            }
        }
        if formats.is_empty() {
            continue;
        }

        subtitles.insert(
            code.to_string(),
            SubtitleInfo {
                language_name: name.to_string(),
                formats,
            },
        );
    }

    SubtitleTable { subtitles }
}

/// Splits into code, name and the untouched remainder, collapsing the
/// whitespace between the first two fields.
fn split_three(line: &str) -> Option<(&str, &str, &str)> {
    let (code, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (name, rest) = rest.split_once(char::is_whitespace)?;
    let blob = rest.trim();
    if code.is_empty() || name.is_empty() || blob.is_empty() {
        return None;
    }
    Some((code, name, blob))
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '-' | '─' | '=' | ' ' | '│' | '|'))
}
