//! Primary watcher backend: close-after-write kernel signals.
//!
//! Built on the `notify` crate's native (inotify-on-Linux,
//! FSEvents-on-macOS, ReadDirectoryChanges-on-Windows) backend, filtered to
//! the subset of kinds the pipeline cares about. `notify` already decodes
//! the raw per-platform event records into a bounded, safe `notify::Event`;
//! this module just maps that vocabulary onto the pipeline's own.

use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{
    event::{AccessKind, AccessMode, CreateKind, RemoveKind},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait,
};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::WatcherOptions;
use crate::error::WatchError;
use crate::models::Event;

use super::ignore::IgnorePolicy;
use super::{new_channels, WatcherBackend, WatcherOutputs};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct InotifyBackend {
    ignore: IgnorePolicy,
    watcher: Option<RecommendedWatcher>,
    raw_rx: Option<std_mpsc::Receiver<notify::Result<notify::Event>>>,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<WatchError>,
}

impl InotifyBackend {
    pub fn new(options: WatcherOptions) -> (Self, WatcherOutputs) {
        let (events_tx, outputs, errors_tx) = new_channels();
        let (raw_tx, raw_rx) = std_mpsc::channel();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .ok();

        let backend = Self {
            ignore: IgnorePolicy::new(&options),
            watcher,
            raw_rx: Some(raw_rx),
            events_tx,
            errors_tx,
        };
        (backend, outputs)
    }
}

#[async_trait]
impl WatcherBackend for InotifyBackend {
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
        let events_tx = self.events_tx.clone();
        let errors_tx = self.errors_tx.clone();

        tokio::task::spawn_blocking(move || {
            run_read_loop(&mut watcher, raw_rx, ignore, events_tx, errors_tx, cancel)
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
    watcher: &mut RecommendedWatcher,
    raw_rx: std_mpsc::Receiver<notify::Result<notify::Event>>,
    ignore: IgnorePolicy,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<WatchError>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(raw)) => handle_raw_event(watcher, &ignore, raw, &events_tx),
            Ok(Err(source)) => {
                tracing::error!(error = %source, "watcher read loop failed, stopping backend");
                let _ = errors_tx.blocking_send(WatchError::WatchRead { source });
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_raw_event(
    watcher: &mut RecommendedWatcher,
    ignore: &IgnorePolicy,
    raw: notify::Event,
    events_tx: &mpsc::Sender<Event>,
) {
    for path in &raw.paths {
        if ignore.should_ignore(path) {
            continue;
        }

        match &raw.kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                emit_added(path, events_tx);
            }
            EventKind::Create(CreateKind::Folder) => {
                if let Err(source) = watcher.watch(path, RecursiveMode::Recursive) {
                    tracing::warn!(path = %path.display(), error = %source, "failed to watch new subdirectory, continuing with partial coverage");
                }
            }
            EventKind::Create(CreateKind::File) => {
                // Creation alone does not guarantee the writer has closed
                // the handle; wait for the close-write signal instead.
            }
            EventKind::Remove(RemoveKind::Any)
            | EventKind::Remove(RemoveKind::File)
            | EventKind::Remove(RemoveKind::Folder)
            | EventKind::Remove(RemoveKind::Other) => {
                let _ = events_tx.blocking_send(Event::removed(path.clone()));
            }
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                // Treated as move-out/move-in pairs by the underlying
                // backend on most platforms; each path in a rename event
                // is handled independently as added/removed below.
                if path.exists() {
                    emit_added(path, events_tx);
                } else {
                    let _ = events_tx.blocking_send(Event::removed(path.clone()));
                }
            }
            _ => {}
        }
    }
}

fn emit_added(path: &Path, events_tx: &mpsc::Sender<Event>) {
    let (size, mtime) = stat(path);
    let mut event = Event::added(path.to_path_buf());
    if let (Some(size), Some(mtime)) = (size, mtime) {
        event = event.with_stat(size, mtime);
    }
    let _ = events_tx.blocking_send(event);
}

fn stat(path: &Path) -> (Option<u64>, Option<std::time::SystemTime>) {
    match std::fs::metadata(path) {
        Ok(meta) => (Some(meta.len()), meta.modified().ok()),
        Err(_) => (None, None),
    }
}

