//! Which output containers the local transcoding tool can actually produce.

use std::{collections::BTreeSet, future::Future, time::Duration};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{request::MediaType, tool::run_tool};

pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mkv"];
pub const DEFAULT_AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "m4a", "opus", "wav"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub video: BTreeSet<String>,
    pub audio: BTreeSet<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            video: DEFAULT_VIDEO_EXTENSIONS.map(String::from).into(),
            audio: DEFAULT_AUDIO_EXTENSIONS.map(String::from).into(),
        }
    }
}

impl Capabilities {
    pub fn for_media(&self, media_type: MediaType) -> &BTreeSet<String> {
        match media_type {
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
        }
    }

    /// Narrows the defaults using the transcoder's muxer and encoder
    /// listings. Blank listings mean the probe failed, so the defaults stand.
    pub fn from_listings(muxers: &str, encoders: &str) -> Self {
        let mut capabilities = Self::default();
        if muxers.trim().is_empty() || encoders.trim().is_empty() {
            return capabilities;
        }

        let has_mp4_mux = muxers.contains(" E mov,")
            || muxers.contains(" E mp4")
            || muxers.contains("mov,mp4,m4a");
        let has_webm_mux = muxers.contains(" E webm");
        let has_mkv_mux = muxers.contains(" E matroska");
        let has_mp3_mux = muxers.contains(" E mp3");

        let has_aac = encoders.contains("aac ");
        let has_libmp3 = encoders.contains("libmp3lame");
        let has_libopus = encoders.contains("libopus");
        let has_pcm = encoders.contains("pcm_s16le") || encoders.contains("pcm_f32le");

        let video = &mut capabilities.video;
        let audio = &mut capabilities.audio;
        if !has_mp4_mux {
            video.remove("mp4");
            audio.remove("m4a");
        }
        if !has_webm_mux {
            video.remove("webm");
        }
        if !has_mkv_mux {
            video.remove("mkv");
        }
        if !has_libmp3 || !has_mp3_mux {
            audio.remove("mp3");
        }
        if !has_aac {
            audio.remove("m4a");
        }
        if !has_libopus {
            audio.remove("opus");
        }
        if !has_pcm {
            audio.remove("wav");
        }

        capabilities
    }
}

/// Source of capability information. The text-scraping prober is the only
/// implementation today; a structured query can replace it behind this seam.
pub trait CapabilityQuery: Send + Sync {
    fn query(&self) -> impl Future<Output = Capabilities> + Send;
}

pub struct FfmpegProbe {
    program: String,
}

impl FfmpegProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn listing(&self, flag: &str) -> Option<String> {
        let args = ["-hide_banner".to_string(), flag.to_string()];
        match run_tool(&self.program, &args, PROBE_TIMEOUT).await {
            Ok(output) if output.success() => Some(format!("{}{}", output.stdout, output.stderr)),
            Ok(output) => {
                warn!("{} {flag} exited with {:?}", self.program, output.code);
                None
            }
            Err(error) => {
                warn!("capability probe {flag} failed: {error}");
                None
            }
        }
    }
}

impl CapabilityQuery for FfmpegProbe {
    async fn query(&self) -> Capabilities {
        let (Some(muxers), Some(encoders)) =
            (self.listing("-muxers").await, self.listing("-encoders").await)
        else {
            warn!("transcoder introspection unavailable, assuming default formats");
            return Capabilities::default();
        };

        Capabilities::from_listings(&muxers, &encoders)
    }
}

/// Probes once and serves the result for the rest of the process lifetime.
pub struct CapabilityCache<Q = FfmpegProbe> {
    query: Q,
    cached: OnceCell<Capabilities>,
}

impl<Q: CapabilityQuery> CapabilityCache<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            cached: OnceCell::new(),
        }
    }

    pub fn preset(query: Q, capabilities: Capabilities) -> Self {
        Self {
            query,
            cached: OnceCell::new_with(Some(capabilities)),
        }
    }

    pub async fn get(&self) -> &Capabilities {
        self.cached
            .get_or_init(|| async {
                let capabilities = self.query.query().await;
                info!(
                    "supported extensions video={:?} audio={:?}",
                    capabilities.video, capabilities.audio
                );
                capabilities
            })
            .await
    }

    pub async fn supported_extensions(&self, media_type: MediaType) -> &BTreeSet<String> {
        self.get().await.for_media(media_type)
    }
}
