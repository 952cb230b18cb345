//! Configuration loading and parsing.
//!
//! Defines the peer config schema and resolves defaults into the session
//! and resolver tunables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tvshare::config::SessionConfig;
use tvshare::resolve::ResolverConfig;

/// Top-level peer configuration loaded from TOML. Every field is optional;
/// missing values fall back to the built-in defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PeerConfig {
    /// Path to the local clip looped while the queue is empty.
    pub fallback_clip: Option<PathBuf>,
    /// Session timing overrides.
    pub session: Option<SessionTimingConfig>,
    /// Resolver backend settings.
    pub resolver: Option<ResolverSectionConfig>,
}

/// Timing overrides, all in milliseconds except the drift threshold.
#[derive(Debug, Default, Deserialize)]
pub struct SessionTimingConfig {
    pub tick_interval_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub evict_advance_delay_ms: Option<u64>,
    pub auto_advance_delay_ms: Option<u64>,
    pub position_interval_ms: Option<u64>,
    pub drift_threshold_secs: Option<f64>,
    pub join_settle_delay_ms: Option<u64>,
}

/// Resolver backend section.
#[derive(Debug, Default, Deserialize)]
pub struct ResolverSectionConfig {
    /// Path to the extractor binary; downloaded here on first use if absent.
    pub backend_path: Option<PathBuf>,
    /// Override the download source, or set `download = false` to require
    /// a pre-installed binary.
    pub download_url: Option<String>,
    pub download: Option<bool>,
    /// Format preference string passed to the backend.
    pub format_preference: Option<String>,
}

impl PeerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PeerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Session tunables with config overrides applied.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(clip) = &self.fallback_clip {
            session.fallback_clip = clip.clone();
        }
        if let Some(timing) = &self.session {
            let ms = Duration::from_millis;
            if let Some(v) = timing.tick_interval_ms {
                session.tick_interval = ms(v);
            }
            if let Some(v) = timing.retry_delay_ms {
                session.retry_delay = ms(v);
            }
            if let Some(v) = timing.evict_advance_delay_ms {
                session.evict_advance_delay = ms(v);
            }
            if let Some(v) = timing.auto_advance_delay_ms {
                session.auto_advance_delay = ms(v);
            }
            if let Some(v) = timing.position_interval_ms {
                session.position_interval = ms(v);
            }
            if let Some(v) = timing.drift_threshold_secs {
                session.drift_threshold_secs = v;
            }
            if let Some(v) = timing.join_settle_delay_ms {
                session.join_settle_delay = ms(v);
            }
        }
        session
    }

    /// Resolver settings with config overrides applied.
    pub fn resolver_config(&self) -> ResolverConfig {
        let mut resolver = ResolverConfig::default();
        if let Some(section) = &self.resolver {
            if let Some(path) = &section.backend_path {
                resolver.backend_path = path.clone();
            }
            if section.download == Some(false) {
                resolver.download_url = None;
            } else if let Some(url) = &section.download_url {
                resolver.download_url = Some(url.clone());
            }
            if let Some(fmt) = &section.format_preference {
                resolver.format_preference = fmt.clone();
            }
        }
        resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: PeerConfig = toml::from_str("").unwrap();
        let session = cfg.session_config();
        assert_eq!(session.tick_interval, Duration::from_millis(100));
        assert_eq!(session.retry_delay, Duration::from_secs(3));
        let resolver = cfg.resolver_config();
        assert!(resolver.download_url.is_some());
    }

    #[test]
    fn overrides_apply() {
        let cfg: PeerConfig = toml::from_str(
            r#"
            fallback_clip = "/media/loop.mp4"

            [session]
            retry_delay_ms = 5000
            drift_threshold_secs = 2.5

            [resolver]
            backend_path = "/opt/tools/yt-dlp"
            download = false
            "#,
        )
        .unwrap();
        let session = cfg.session_config();
        assert_eq!(session.fallback_clip, PathBuf::from("/media/loop.mp4"));
        assert_eq!(session.retry_delay, Duration::from_secs(5));
        assert_eq!(session.drift_threshold_secs, 2.5);
        let resolver = cfg.resolver_config();
        assert_eq!(resolver.backend_path, PathBuf::from("/opt/tools/yt-dlp"));
        assert!(resolver.download_url.is_none());
    }

    #[test]
    fn load_reads_toml_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.toml");
        std::fs::write(&path, "fallback_clip = \"clip.mp4\"\n").unwrap();
        let cfg = PeerConfig::load(&path).unwrap();
        assert_eq!(cfg.fallback_clip, Some(PathBuf::from("clip.mp4")));
        assert!(PeerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
