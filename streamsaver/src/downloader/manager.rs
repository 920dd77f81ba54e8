//! Download Manager implementation.
//!
//! The manager is the only entry point callers use. It owns the job registry,
//! the per-host admission queues, the conversion pipeline, and the public
//! list of sessions.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::admission::AdmissionQueue;
use super::conversion::ConversionPipeline;
use super::session::{SessionInfo, SharedSession};
use super::worker::{DownloadTool, Downloader, SessionRegistry};
use crate::config::AppConfig;
use crate::utils::url::destination_host;

/// Externally readable list of live sessions, in creation order.
#[derive(Debug, Default)]
pub struct SessionList {
    sessions: RwLock<Vec<SharedSession>>,
}

impl SessionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every session of job `key`.
    pub fn remove(&self, key: &str) -> bool {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|session| session.lock().id() != key);
        sessions.len() != before
    }

    pub fn get(&self, key: &str) -> Option<SharedSession> {
        self.sessions
            .read()
            .iter()
            .find(|session| session.lock().id() == key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshots(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .iter()
            .map(|session| session.lock().snapshot())
            .collect()
    }
}

impl SessionRegistry for SessionList {
    /// Publishes a session. A restarted job's new session takes the place of
    /// its previous one.
    fn post_session(&self, session: SharedSession) {
        let id = session.lock().id().to_string();
        let mut sessions = self.sessions.write();
        match sessions.iter().position(|s| s.lock().id() == id) {
            Some(index) => sessions[index] = session,
            None => sessions.push(session),
        }
    }
}

pub struct DownloadManager {
    tool: Arc<DownloadTool>,
    per_host_limit: usize,
    downloaders: DashMap<String, Arc<Downloader>>,
    host_queues: DashMap<String, AdmissionQueue>,
    sessions: Arc<SessionList>,
    pipeline: Arc<ConversionPipeline>,
}

impl DownloadManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tool: Arc::new(DownloadTool::from_config(config)),
            per_host_limit: config.per_host_download_limit,
            downloaders: DashMap::new(),
            host_queues: DashMap::new(),
            sessions: Arc::new(SessionList::new()),
            pipeline: Arc::new(ConversionPipeline::new(config)),
        }
    }

    /// Starts job `key`, or restarts it if it is already registered.
    ///
    /// The download runs in the background. An unparsable URL is logged and
    /// otherwise ignored.
    pub fn new_download(&self, key: &str, url: &str) {
        let downloader = match self.downloaders.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(job_key = key, "restarting existing download");
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                let host = match destination_host(url) {
                    Ok(host) => host,
                    Err(e) => {
                        warn!(job_key = key, error = %e, "cannot schedule download");
                        return;
                    }
                };
                let downloader = Arc::new(Downloader::new(
                    key,
                    url,
                    Arc::clone(&self.tool),
                    self.host_queue(&host),
                    Arc::clone(&self.pipeline),
                    Arc::clone(&self.sessions) as Arc<dyn SessionRegistry>,
                ));
                info!(job_key = key, host = %host, "download registered");
                entry.insert(Arc::clone(&downloader));
                downloader
            }
        };

        downloader.start();
    }

    /// Cancels job `key` and forgets it.
    ///
    /// Returns `false` only if the job is unknown. Termination of its
    /// processes is requested but not awaited.
    pub fn cancel_download(&self, key: &str) -> bool {
        let Some((_, downloader)) = self.downloaders.remove(key) else {
            return false;
        };

        let signalled = downloader.cancel();
        self.sessions.remove(key);
        info!(job_key = key, signalled, "download canceled");
        true
    }

    pub fn find_downloader(&self, key: &str) -> Option<Arc<Downloader>> {
        self.downloaders.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn post_session(&self, session: SharedSession) {
        self.sessions.post_session(session);
    }

    /// Snapshots of all live sessions, in creation order.
    pub fn sessions_info(&self) -> Vec<SessionInfo> {
        self.sessions.snapshots()
    }

    pub fn session_info(&self, key: &str) -> Option<SessionInfo> {
        self.sessions.get(key).map(|session| session.lock().snapshot())
    }

    pub fn len(&self) -> usize {
        self.downloaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloaders.is_empty()
    }

    /// The admission queue of `host`, created on first use.
    pub fn host_queue(&self, host: &str) -> AdmissionQueue {
        self.host_queues
            .entry(host.to_string())
            .or_insert_with(|| AdmissionQueue::new(host, self.per_host_limit))
            .clone()
    }

    pub fn conversion_queue(&self) -> &AdmissionQueue {
        self.pipeline.queue()
    }

    /// Cancels every job's processes without forgetting the jobs.
    pub fn shutdown(&self) {
        for entry in self.downloaders.iter() {
            entry.value().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::session::{Session, SessionStatus};

    fn manager() -> DownloadManager {
        let config = AppConfig {
            ytdlp_path: "/nonexistent/yt-dlp".to_string(),
            download_dir: std::env::temp_dir(),
            ..AppConfig::default()
        };
        DownloadManager::new(&config)
    }

    #[test]
    fn post_session_replaces_same_job() {
        let list = SessionList::new();
        list.post_session(Session::new("a", "https://a.example/1").into_shared());
        list.post_session(Session::new("b", "https://b.example/1").into_shared());

        let mut restarted = Session::new("a", "https://a.example/1");
        restarted.mark_canceled();
        list.post_session(restarted.into_shared());

        let snapshots = list.snapshots();
        let ids: Vec<_> = snapshots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(snapshots[0].status, SessionStatus::Canceled);
    }

    #[test]
    fn cancel_unknown_key_is_a_no_op() {
        let manager = manager();
        manager.post_session(Session::new("other", "https://x.example").into_shared());

        assert!(!manager.cancel_download("missing"));
        assert_eq!(manager.sessions_info().len(), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn cancel_known_key_removes_job_and_session() {
        let manager = manager();
        manager.new_download("job", "https://www.youtube.com/watch?v=1");
        assert!(manager.find_downloader("job").is_some());
        assert_eq!(manager.sessions_info().len(), 1);

        assert!(manager.cancel_download("job"));
        assert!(manager.find_downloader("job").is_none());
        assert!(manager.sessions_info().is_empty());
        assert!(!manager.cancel_download("job"));
    }

    #[tokio::test]
    async fn unparsable_url_is_not_registered() {
        let manager = manager();
        manager.new_download("job", "not a url");
        assert!(manager.find_downloader("job").is_none());
        assert!(manager.sessions_info().is_empty());
    }

    #[tokio::test]
    async fn hosts_get_separate_queues() {
        let manager = manager();
        let a = manager.host_queue("a.example");
        let again = manager.host_queue("a.example");
        let _permit = a.try_acquire().unwrap();

        assert_eq!(again.available(), 1);
        assert_eq!(manager.host_queue("b.example").available(), 2);
        assert_eq!(manager.conversion_queue().capacity(), 1);
    }

    #[tokio::test]
    async fn spawn_failure_ends_in_error() {
        let manager = manager();
        manager.new_download("job", "https://www.youtube.com/watch?v=1");

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let info = manager.session_info("job").unwrap();
                if info.finish_time.is_some() {
                    break info.status;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(status, SessionStatus::Error);
    }
}
