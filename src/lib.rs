//! HTTP backend that wraps `yt-dlp` and `ffmpeg`: media metadata, format and
//! subtitle listings, capability-aware downloads and short-lived file serving.

pub mod api;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod custodian;
pub mod error;
pub mod listing;
pub mod metadata;
pub mod output;
pub mod request;
pub mod service;
pub mod tool;
