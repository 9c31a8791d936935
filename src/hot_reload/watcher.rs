use log::{debug, trace};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Type of file change event
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEventType {
    Created,
    Modified,
    Deleted,
}

/// Settled file change
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub event_type: WatchEventType,
    pub timestamp: Instant,
}

/// One watched path
#[derive(Debug)]
struct WatchedSource {
    path: PathBuf,

    /// Modification time the owner last acted on
    committed: Option<SystemTime>,

    /// Changed modification time and when it was first seen
    candidate: Option<(Option<SystemTime>, Instant)>,
}

impl WatchedSource {
    fn new(path: PathBuf) -> Self {
        let committed = modified_time(&path);
        Self {
            path,
            committed,
            candidate: None,
        }
    }

    fn poll(&mut self, now: Instant, debounce: Duration) -> Option<WatchEvent> {
        let current = modified_time(&self.path);

        if current == self.committed {
            self.candidate = None;
            return None;
        }

        match self.candidate {
            Some((seen, since)) if seen == current => {
                if now.saturating_duration_since(since) < debounce {
                    return None;
                }

                let event_type = match (self.committed, current) {
                    (None, _) => WatchEventType::Created,
                    (_, None) => WatchEventType::Deleted,
                    _ => WatchEventType::Modified,
                };
                self.committed = current;
                self.candidate = None;

                Some(WatchEvent {
                    path: self.path.clone(),
                    event_type,
                    timestamp: now,
                })
            }
            _ => {
                // First sighting, or the file is still being written
                trace!("Change pending on {}", self.path.display());
                self.candidate = Some((current, now));
                None
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Modification-time poller with debouncing
///
/// A change is reported once its modification time has been observed
/// unchanged on two polls at least `debounce` apart, so a file that is still
/// being written is never reported half way.
#[derive(Debug)]
pub struct SourceWatch {
    sources: Vec<WatchedSource>,
    debounce: Duration,
}

impl SourceWatch {
    /// Create new watcher; current modification times are the baseline
    pub fn new<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>, debounce: Duration) -> Self {
        let sources = paths
            .into_iter()
            .map(|p| WatchedSource::new(p.as_ref().to_path_buf()))
            .collect();

        Self { sources, debounce }
    }

    /// Poll for settled changes (non-blocking)
    pub fn poll(&mut self) -> Vec<WatchEvent> {
        self.poll_at(Instant::now())
    }

    /// Poll with an explicit clock reading
    pub fn poll_at(&mut self, now: Instant) -> Vec<WatchEvent> {
        let debounce = self.debounce;
        let events: Vec<WatchEvent> = self
            .sources
            .iter_mut()
            .filter_map(|source| source.poll(now, debounce))
            .collect();

        for event in &events {
            debug!("{:?} {}", event.event_type, event.path.display());
        }

        events
    }

    /// Accept the current state of every file as the baseline
    pub fn rebaseline(&mut self) {
        for source in &mut self.sources {
            source.committed = modified_time(&source.path);
            source.candidate = None;
        }
    }

    /// Any change seen but not yet settled
    pub fn has_pending(&self) -> bool {
        self.sources.iter().any(|s| s.candidate.is_some())
    }

    /// Get watched paths
    pub fn watched_paths(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().map(|s| s.path.as_path())
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}
