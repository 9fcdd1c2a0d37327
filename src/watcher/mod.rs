//! Platform-aware filesystem watcher.
//!
//! Two interchangeable backends implement the same contract: a primary
//! backend built on close-after-write kernel signals, and a portable
//! fallback built on a settle timer. Neither backend distinguishes Added
//! from Modified; both report "this file is now present and quiescent" as
//! [`crate::models::EventType::Added`].

pub mod backend_inotify;
pub mod backend_poll;
pub mod ignore;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::WatcherOptions;
use crate::error::WatchError;
use crate::models::Event;

/// Default bound for the events channel.
pub const EVENTS_CHANNEL_CAPACITY: usize = 100;
/// Default bound for the errors channel.
pub const ERRORS_CHANNEL_CAPACITY: usize = 10;

pub use backend_inotify::InotifyBackend;
pub use backend_poll::PollBackend;

/// The read side of a watcher: bounded channels the consumer drains.
///
/// The watcher never drops an event once accepted onto these channels; a
/// slow consumer instead blocks the emitter (backpressure is intentional).
pub struct WatcherOutputs {
    pub events: mpsc::Receiver<Event>,
    pub errors: mpsc::Receiver<WatchError>,
}

/// Shared contract implemented by both watcher backends.
#[async_trait]
pub trait WatcherBackend: Send {
    /// Registers `path` (file or directory) with the watcher. Directories
    /// are watched recursively; newly created subdirectories are added to
    /// the watch set automatically before being reported.
    fn watch(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Runs the read loop until `cancel` fires. Returns once the loop has
    /// stopped and channels are closed.
    async fn start(&mut self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Idempotent: releases OS resources and closes channels. Safe to call
    /// more than once and safe to call before `start`.
    fn stop(&mut self);
}

pub(crate) fn new_channels() -> (mpsc::Sender<Event>, WatcherOutputs, mpsc::Sender<WatchError>) {
    let (events_tx, events_rx) = mpsc::channel(EVENTS_CHANNEL_CAPACITY);
    let (errors_tx, errors_rx) = mpsc::channel(ERRORS_CHANNEL_CAPACITY);
    (
        events_tx,
        WatcherOutputs {
            events: events_rx,
            errors: errors_rx,
        },
        errors_tx,
    )
}

/// Constructs the primary backend paired with its output channels.
pub fn new_inotify_backend(options: WatcherOptions) -> (InotifyBackend, WatcherOutputs) {
    InotifyBackend::new(options)
}

/// Constructs the fallback backend paired with its output channels.
pub fn new_poll_backend(options: WatcherOptions) -> (PollBackend, WatcherOutputs) {
    PollBackend::new(options)
}
