//! Fallback watcher backend: portable notifier plus a hand-rolled settle
//! timer.
//!
//! `notify::PollWatcher` gives us raw, un-debounced create/write/remove
//! notifications on any filesystem notify's native backends don't support
//! (network mounts, some container overlays). This module owns the
//! settle-timer state machine itself rather than reaching for
//! `notify-debouncer-mini`/`-full`, because the pipeline's settle
//! semantics are specifically "stable size and mtime across a re-stat",
//! not generic event coalescing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::WatcherOptions;
use crate::error::WatchError;
use crate::models::Event;

use super::ignore::IgnorePolicy;
use super::{new_channels, WatcherBackend, WatcherOutputs};

/// Per-path settle state. `Idle` paths have no entry in the tracking map.
#[derive(Debug, Clone, Copy)]
struct Settling {
    size: u64,
    mtime: Option<SystemTime>,
    deadline: Instant,
}

pub struct PollBackend {
    ignore: IgnorePolicy,
    settle_delay: Duration,
    watcher: Option<PollWatcher>,
    raw_rx: Option<std_mpsc::Receiver<notify::Result<notify::Event>>>,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<WatchError>,
}

impl PollBackend {
    pub fn new(options: WatcherOptions) -> (Self, WatcherOutputs) {
        let (events_tx, outputs, errors_tx) = new_channels();
        let (raw_tx, raw_rx) = std_mpsc::channel();
        let settle_delay = Duration::from_millis(options.settle_delay_ms);

        let poll_config = notify::Config::default().with_poll_interval(settle_delay.min(Duration::from_millis(50)).max(Duration::from_millis(10)));
        let watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = raw_tx.send(res);
            },
            poll_config,
        )
        .ok();

        let backend = Self {
            ignore: IgnorePolicy::new(&options),
            settle_delay,
            watcher,
            raw_rx: Some(raw_rx),
            events_tx,
            errors_tx,
        };
        (backend, outputs)
    }
}

#[async_trait]
impl WatcherBackend for PollBackend {
    fn watch(&mut self, path: &Path) -> anyhow::Result<()> {
        let watcher = self
            .watcher
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("watcher failed to initialize"))?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchAdd {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }

    async fn start(&mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut watcher = self
            .watcher
            .take()
            .ok_or_else(|| anyhow::anyhow!("watcher already started or failed to initialize"))?;
        let raw_rx = self
            .raw_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("watcher read loop already started"))?;
        let ignore = std::mem::replace(&mut self.ignore, IgnorePolicy::new(&WatcherOptions::default()));
        let settle_delay = self.settle_delay;
        let events_tx = self.events_tx.clone();
        let errors_tx = self.errors_tx.clone();

        tokio::task::spawn_blocking(move || {
            run_read_loop(&mut watcher, raw_rx, ignore, settle_delay, events_tx, errors_tx, cancel)
        })
        .await?;
        Ok(())
    }

    fn stop(&mut self) {
        self.watcher = None;
        self.raw_rx = None;
    }
}

fn run_read_loop(
    watcher: &mut PollWatcher,
    raw_rx: std_mpsc::Receiver<notify::Result<notify::Event>>,
    ignore: IgnorePolicy,
    settle_delay: Duration,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<WatchError>,
    cancel: CancellationToken,
) {
    let tick = settle_delay.min(Duration::from_millis(25)).max(Duration::from_millis(5));
    let mut settling: HashMap<PathBuf, Settling> = HashMap::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match raw_rx.recv_timeout(tick) {
            Ok(Ok(raw)) => handle_raw_event(watcher, &ignore, raw, settle_delay, &mut settling, &events_tx),
            Ok(Err(source)) => {
                tracing::error!(error = %source, "fallback watcher read loop failed, stopping backend");
                let _ = errors_tx.blocking_send(WatchError::WatchRead { source });
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        fire_expired_timers(&mut settling, settle_delay, &events_tx);
    }
}

fn handle_raw_event(
    watcher: &mut PollWatcher,
    ignore: &IgnorePolicy,
    raw: notify::Event,
    settle_delay: Duration,
    settling: &mut HashMap<PathBuf, Settling>,
    events_tx: &mpsc::Sender<Event>,
) {
    for path in &raw.paths {
        if ignore.should_ignore(path) {
            continue;
        }

        match &raw.kind {
            EventKind::Create(notify::event::CreateKind::Folder) => {
                if let Err(source) = watcher.watch(path, RecursiveMode::Recursive) {
                    tracing::warn!(path = %path.display(), error = %source, "failed to watch new subdirectory, continuing with partial coverage");
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                start_or_reset_timer(path, settle_delay, settling);
            }
            EventKind::Remove(_) => {
                settling.remove(path);
                let _ = events_tx.blocking_send(Event::removed(path.clone()));
            }
            _ => {}
        }
    }
}

/// `Idle -> Settling(size, mtime, deadline)`. A repeated write inside
/// `Settling` refreshes the deadline (and updates size/mtime so the next
/// expiry compares against the latest write, not the first one).
fn start_or_reset_timer(path: &Path, settle_delay: Duration, settling: &mut HashMap<PathBuf, Settling>) {
    let (size, mtime) = stat(path);
    settling.insert(
        path.to_path_buf(),
        Settling {
            size: size.unwrap_or(0),
            mtime,
            deadline: Instant::now() + settle_delay,
        },
    );
}

/// Re-stats every path whose deadline has passed. Unchanged since the last
/// observation: `Settling -> Idle`, emit `Added`. Changed: timer restarts.
fn fire_expired_timers(settling: &mut HashMap<PathBuf, Settling>, settle_delay: Duration, events_tx: &mpsc::Sender<Event>) {
    let now = Instant::now();
    let expired: Vec<PathBuf> = settling
        .iter()
        .filter(|(_, s)| s.deadline <= now)
        .map(|(p, _)| p.clone())
        .collect();

    for path in expired {
        let prev = match settling.get(&path) {
            Some(s) => *s,
            None => continue,
        };
        let (size, mtime) = stat(&path);
        let unchanged = size == Some(prev.size) && mtime == prev.mtime;

        if unchanged {
            settling.remove(&path);
            let mut event = Event::added(path.clone());
            if let (Some(size), Some(mtime)) = (size, mtime) {
                event = event.with_stat(size, mtime);
            }
            let _ = events_tx.blocking_send(event);
        } else if let Some(entry) = settling.get_mut(&path) {
            entry.size = size.unwrap_or(prev.size);
            entry.mtime = mtime;
            entry.deadline = now + settle_delay;
        }
    }
}

fn stat(path: &Path) -> (Option<u64>, Option<SystemTime>) {
    match std::fs::metadata(path) {
        Ok(meta) => (Some(meta.len()), meta.modified().ok()),
        Err(_) => (None, None),
    }
}
