//! Episode workers.
//!
//! Each closed episode moves into its own task: encode, deliver, prune.
//! The frame loop never waits on a worker except during shutdown.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pancam_control::MotionEpisode;
use pancam_notify::AlertSink;
use pancam_vision::{prune_clips, ClipEncoder};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::metrics;

/// Ids of episodes whose worker has not finished.
type InFlight = Arc<Mutex<HashSet<String>>>;

pub struct EpisodeDispatcher {
    encoder: Arc<ClipEncoder>,
    sink: Arc<dyn AlertSink>,
    tasks: JoinSet<()>,
    in_flight: InFlight,
}

impl EpisodeDispatcher {
    pub fn new(encoder: ClipEncoder, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            encoder: Arc::new(encoder),
            sink,
            tasks: JoinSet::new(),
            in_flight: InFlight::default(),
        }
    }

    /// Workers still running.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Send the alert snapshot without blocking the caller.
    pub fn notify_open(&mut self, snapshot: Vec<u8>) {
        metrics::record_alert();
        let sink = Arc::clone(&self.sink);
        self.tasks.spawn(async move { sink.alert_open(snapshot).await });
        metrics::set_episode_workers(self.tasks.len());
    }

    /// Episodes still being encoded or delivered.
    pub fn pending_episodes(&self) -> Vec<String> {
        lock(&self.in_flight).iter().cloned().collect()
    }

    /// Hand a closed episode to a new worker.
    pub fn dispatch(&mut self, episode: MotionEpisode) {
        let encoder = Arc::clone(&self.encoder);
        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.in_flight);
        let id = episode.id.to_string();
        info!(
            episode_id = %id,
            frames = episode.frame_count(),
            "Dispatching motion episode"
        );
        lock(&in_flight).insert(id.clone());
        self.tasks.spawn(async move {
            deliver(encoder, sink, episode).await;
            lock(&in_flight).remove(&id);
        });
        metrics::set_episode_workers(self.tasks.len());
    }

    /// Collect finished workers. Called once per tick.
    pub fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Episode worker panicked");
            }
        }
        metrics::set_episode_workers(self.tasks.len());
    }

    /// Wait for every worker. With a `timeout`, whatever is left after it
    /// is aborted and each dropped episode is logged.
    pub async fn drain(&mut self, timeout: Option<Duration>) {
        if self.tasks.is_empty() {
            return;
        }
        info!(workers = self.tasks.len(), "Waiting for episode workers");
        let Some(timeout) = timeout else {
            join_all(&mut self.tasks).await;
            metrics::set_episode_workers(0);
            return;
        };

        if tokio::time::timeout(timeout, join_all(&mut self.tasks)).await.is_err() {
            warn!(
                workers = self.tasks.len(),
                timeout_s = timeout.as_secs_f64(),
                "Episode workers did not finish, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
            for id in lock(&self.in_flight).drain() {
                metrics::record_episode("dropped");
                error!(episode_id = %id, "Episode dropped at shutdown");
            }
        }
        metrics::set_episode_workers(0);
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Episode worker panicked");
        }
    }
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn deliver(encoder: Arc<ClipEncoder>, sink: Arc<dyn AlertSink>, episode: MotionEpisode) {
    let id = episode.id.to_string();
    let frames = episode.frame_count();

    let stored = match encoder.encode(&episode.frames, episode.opened_at, &id).await {
        Ok(path) => path,
        Err(e) => {
            error!(episode_id = %id, frames, error = %e, "Clip encoding failed");
            metrics::record_episode("failed");
            sink.alert_failed(&e.to_string()).await;
            return;
        }
    };
    drop(episode);

    match tokio::fs::read(&stored).await {
        Ok(video) => {
            sink.alert_close(video, frames).await;
            metrics::record_episode("sent");
        }
        Err(e) => {
            error!(episode_id = %id, path = %stored.display(), error = %e, "Failed to read clip");
            metrics::record_episode("failed");
            sink.alert_failed(&e.to_string()).await;
        }
    }

    let config = encoder.config();
    match prune_clips(&config.clip_dir, config.retention).await {
        Ok(removed) if !removed.is_empty() => {
            debug!(removed = removed.len(), "Pruned old clips")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to prune clips"),
    }
}
