//! Reference resolution backed by an external extractor binary.
//!
//! A dedicated worker thread owns the backend: it fetches the binary on
//! first use if it is missing, then serves resolution requests one at a
//! time. Results come back to the session as [`SessionMsg::Resolved`]
//! carrying the generation the request was issued under, so stale replies
//! can be discarded without any cancellation machinery.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::normalize::{Reference, SEARCH_PREFIX};
use crate::session::SessionMsg;

/// Official release artifact, fetched once when no backend binary exists
/// at the configured path.
pub const DEFAULT_BACKEND_URL: &str =
    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp";

/// Preference chain handed to the backend: progressive mp4 formats first,
/// then anything capped at 480p, then whatever is left.
pub const DEFAULT_FORMAT_PREFERENCE: &str = "18/22/mp4[height<=480]/worst";

/// One resolution request. The reply lands on `reply` as
/// [`SessionMsg::Resolved`].
pub struct ResolveRequest {
    pub reference: Reference,
    pub generation: u64,
    pub reply: Sender<SessionMsg>,
}

/// Submission side of a resolver.
pub trait Resolve: Send + Sync {
    fn submit(&self, request: ResolveRequest);
    /// True while a request is being served.
    fn is_resolving(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Where the backend binary lives, or will be placed after download.
    pub backend_path: PathBuf,
    /// Fetched to `backend_path` on first use when the binary is missing.
    /// `None` means the binary must already exist.
    pub download_url: Option<String>,
    pub format_preference: String,
    pub extra_args: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend_path: std::env::temp_dir().join("tvshare").join("yt-dlp"),
            download_url: Some(DEFAULT_BACKEND_URL.to_string()),
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Handle to the resolver worker thread.
pub struct BackendResolver {
    tx: Sender<ResolveRequest>,
    busy: Arc<AtomicBool>,
}

impl Resolve for BackendResolver {
    fn submit(&self, request: ResolveRequest) {
        if self.tx.send(request).is_err() {
            tracing::error!("resolver worker is gone; request dropped");
        }
    }

    fn is_resolving(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Spawn the resolver worker thread.
pub fn spawn_backend_resolver(config: ResolverConfig) -> BackendResolver {
    let (tx, rx) = unbounded();
    let busy = Arc::new(AtomicBool::new(false));
    let thread_busy = busy.clone();
    thread::Builder::new()
        .name("resolver".into())
        .spawn(move || resolver_thread_main(config, rx, thread_busy))
        .ok();
    BackendResolver { tx, busy }
}

fn resolver_thread_main(
    config: ResolverConfig,
    rx: Receiver<ResolveRequest>,
    busy: Arc<AtomicBool>,
) {
    // Requests queued before the backend is ready simply wait; the first
    // one pays the download cost.
    let backend_ready = match ensure_backend(&config) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "resolver backend unavailable");
            false
        }
    };

    while let Ok(request) = rx.recv() {
        busy.store(true, Ordering::SeqCst);
        let url = if backend_ready {
            match run_backend(&config, &request.reference) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(
                        reference = %request.reference,
                        error = %e,
                        "resolution failed"
                    );
                    None
                }
            }
        } else {
            None
        };
        let outcome = SessionMsg::Resolved {
            generation: request.generation,
            reference: request.reference,
            url,
        };
        busy.store(false, Ordering::SeqCst);
        if request.reply.send(outcome).is_err() {
            tracing::debug!("session inbox closed; resolution result dropped");
            break;
        }
    }
}

/// Make sure the backend binary exists, downloading it if allowed.
/// A no-op when the file is already in place.
fn ensure_backend(config: &ResolverConfig) -> Result<()> {
    if config.backend_path.exists() {
        return Ok(());
    }
    let Some(url) = &config.download_url else {
        bail!(
            "resolver backend missing at {} and no download url configured",
            config.backend_path.display()
        );
    };
    tracing::info!(url = %url, path = %config.backend_path.display(), "fetching resolver backend");
    if let Some(parent) = config.backend_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create backend directory {}", parent.display()))?;
    }
    let staging = config.backend_path.with_extension("part");
    let mut response = ureq::get(url).call().context("download resolver backend")?;
    if !response.status().is_success() {
        bail!("backend download returned status {}", response.status());
    }
    {
        let mut file = std::fs::File::create(&staging)
            .with_context(|| format!("create {}", staging.display()))?;
        std::io::copy(&mut response.body_mut().as_reader(), &mut file)
            .context("write backend binary")?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o755))
            .context("mark backend executable")?;
    }
    std::fs::rename(&staging, &config.backend_path).context("move backend into place")?;
    Ok(())
}

/// Run one resolution. The backend is asked for a direct URL only; no
/// media is downloaded here.
fn run_backend(config: &ResolverConfig, reference: &Reference) -> Result<String> {
    let target = if reference.is_search() {
        let terms = &reference.as_str()[SEARCH_PREFIX.len()..];
        format!("ytsearch:{terms}")
    } else {
        reference.as_str().to_string()
    };

    tracing::debug!(target = %target, "resolving");
    let output = Command::new(&config.backend_path)
        .arg("-f")
        .arg(&config.format_preference)
        .arg("--get-url")
        .arg("--no-playlist")
        .arg("--no-warnings")
        .args(&config.extra_args)
        .arg(&target)
        .output()
        .with_context(|| format!("spawn {}", config.backend_path.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        bail!("backend exited with {}: {}", output.status, stderr.trim());
    }
    if !stderr.trim().is_empty() {
        tracing::debug!(stderr = %stderr.trim(), "backend chatter");
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(url) => Ok(url.to_string()),
        None => bail!("backend produced no url"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn write_stub(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("stub-backend");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn resolver_with_stub(dir: &std::path::Path, body: &str) -> BackendResolver {
        spawn_backend_resolver(ResolverConfig {
            backend_path: write_stub(dir, body),
            download_url: None,
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_string(),
            extra_args: Vec::new(),
        })
    }

    fn await_resolved(
        rx: &crossbeam_channel::Receiver<SessionMsg>,
    ) -> (u64, Reference, Option<String>) {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            SessionMsg::Resolved {
                generation,
                reference,
                url,
            } => (generation, reference, url),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn resolves_first_stdout_line() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with_stub(
            dir.path(),
            "echo 'https://cdn.example/a.mp4'\necho 'https://cdn.example/b.mp4'",
        );
        let (tx, rx) = unbounded();
        resolver.submit(ResolveRequest {
            reference: normalize("dQw4w9WgXcQ"),
            generation: 7,
            reply: tx,
        });
        let (generation, _, url) = await_resolved(&rx);
        assert_eq!(generation, 7);
        assert_eq!(url.as_deref(), Some("https://cdn.example/a.mp4"));
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with_stub(dir.path(), "exit 1");
        let (tx, rx) = unbounded();
        resolver.submit(ResolveRequest {
            reference: normalize("dQw4w9WgXcQ"),
            generation: 1,
            reply: tx,
        });
        let (_, _, url) = await_resolved(&rx);
        assert!(url.is_none());
    }

    #[test]
    fn empty_stdout_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with_stub(dir.path(), "exit 0");
        let (tx, rx) = unbounded();
        resolver.submit(ResolveRequest {
            reference: normalize("dQw4w9WgXcQ"),
            generation: 1,
            reply: tx,
        });
        let (_, _, url) = await_resolved(&rx);
        assert!(url.is_none());
    }

    #[test]
    fn search_markers_map_to_ytsearch() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the last positional argument back as the "url".
        let resolver = resolver_with_stub(
            dir.path(),
            "for a in \"$@\"; do last=\"$a\"; done; echo \"$last\"",
        );
        let (tx, rx) = unbounded();
        resolver.submit(ResolveRequest {
            reference: normalize("lofi hip hop radio"),
            generation: 1,
            reply: tx,
        });
        let (_, _, url) = await_resolved(&rx);
        assert_eq!(url.as_deref(), Some("ytsearch:lofi hip hop radio"));
    }

    #[test]
    fn missing_backend_without_download_url_fails_requests() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = spawn_backend_resolver(ResolverConfig {
            backend_path: dir.path().join("does-not-exist"),
            download_url: None,
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_string(),
            extra_args: Vec::new(),
        });
        let (tx, rx) = unbounded();
        resolver.submit(ResolveRequest {
            reference: normalize("dQw4w9WgXcQ"),
            generation: 1,
            reply: tx,
        });
        let (_, _, url) = await_resolved(&rx);
        assert!(url.is_none());
    }

    #[test]
    fn existing_backend_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stub(dir.path(), "echo ok");
        let config = ResolverConfig {
            backend_path: path,
            // Unreachable on purpose; must never be contacted.
            download_url: Some("http://127.0.0.1:1/nope".to_string()),
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_string(),
            extra_args: Vec::new(),
        };
        assert!(ensure_backend(&config).is_ok());
    }
}
