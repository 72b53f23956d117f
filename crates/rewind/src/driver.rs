//! Playback scheduler
//!
//! Runs a [`PlaybackController`] on its tick cadence. The driver task owns
//! the controller and interleaves:
//! - Ticking on a fixed interval
//! - Awaiting the single in-flight renderer operation
//! - Processing seek commands from [`PlaybackHandle`]s
//!
//! Commands that arrive while an append or eviction is outstanding are
//! handed to the controller immediately, which stages them.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::playback::{PlaybackController, PlaybackStatus, SeekOutcome, TickAction};
use crate::primitives::Timestamp;
use crate::renderer::RendererError;

const COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("playback driver stopped")]
    Stopped,
}

enum Command {
    SeekByDelta {
        delta_secs: f64,
        reply: oneshot::Sender<SeekOutcome>,
    },
    SeekTo {
        target: Timestamp,
        reply: oneshot::Sender<SeekOutcome>,
    },
    ReturnToLive {
        reply: oneshot::Sender<SeekOutcome>,
    },
    Resume {
        reply: oneshot::Sender<Option<SeekOutcome>>,
    },
}

enum Completion {
    Append(Result<(), RendererError>),
    Evict(Result<(), RendererError>),
}

type RendererOp = Pin<Box<dyn Future<Output = Completion> + Send>>;

async fn wait_op(op: &mut Option<RendererOp>) -> Completion {
    match op {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Owns a controller and drives it from a spawned task.
pub struct PlaybackDriver {
    controller: PlaybackController,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<PlaybackStatus>,
    cancel: CancellationToken,
}

impl PlaybackDriver {
    pub fn new(controller: PlaybackController, cancel: CancellationToken) -> (Self, PlaybackHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(controller.status());
        let handle = PlaybackHandle {
            commands: tx,
            status: status_rx,
            cancel: cancel.clone(),
        };
        let driver = Self {
            controller,
            commands: rx,
            status: status_tx,
            cancel,
        };
        (driver, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.controller.config().tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight: Option<RendererOp> = None;
        let mut commands_open = true;

        info!(
            "playback driver started (tick {:?}, window {:.0}s)",
            self.controller.config().tick_interval,
            self.controller.config().max_window_secs
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if in_flight.is_some() {
                        debug!("dropping in-flight renderer operation");
                    }
                    info!("playback driver shutting down");
                    break;
                }

                cmd = self.commands.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("all playback handles dropped");
                            commands_open = false;
                        }
                    }
                }

                completion = wait_op(&mut in_flight) => {
                    in_flight = None;
                    let staged = match completion {
                        Completion::Append(result) => self.controller.complete_append(result),
                        Completion::Evict(result) => self.controller.complete_evict(result),
                    };
                    if let Some(outcome) = staged {
                        debug!("staged seek applied: {:?}", outcome);
                    }
                }

                _ = ticker.tick() => {
                    if in_flight.is_none() {
                        in_flight = self.on_tick();
                    } else {
                        trace!("tick while renderer busy");
                    }
                }
            }

            self.status.send_replace(self.controller.status());
        }
    }

    fn on_tick(&mut self) -> Option<RendererOp> {
        let renderer = self.controller.renderer().clone();
        match self.controller.tick() {
            TickAction::Append(chunk) => Some(Box::pin(async move {
                Completion::Append(renderer.append(chunk.payload).await)
            })),
            TickAction::Evict(range) => Some(Box::pin(async move {
                Completion::Evict(renderer.evict_range(range.start, range.end).await)
            })),
            TickAction::Pending(_) | TickAction::Skip(_) => None,
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SeekByDelta { delta_secs, reply } => {
                let _ = reply.send(self.controller.seek_by_delta(delta_secs));
            }
            Command::SeekTo { target, reply } => {
                let _ = reply.send(self.controller.seek_to_timestamp(target));
            }
            Command::ReturnToLive { reply } => {
                let _ = reply.send(self.controller.return_to_live());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.controller.resume_check());
            }
        }
    }
}

/// Cloneable control surface for a running [`PlaybackDriver`].
#[derive(Clone)]
pub struct PlaybackHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<PlaybackStatus>,
    cancel: CancellationToken,
}

impl PlaybackHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| DriverError::Stopped)?;
        rx.await.map_err(|_| DriverError::Stopped)
    }

    pub async fn seek_by_delta(&self, delta_secs: f64) -> Result<SeekOutcome, DriverError> {
        self.request(|reply| Command::SeekByDelta { delta_secs, reply })
            .await
    }

    pub async fn seek_to_timestamp(&self, target: Timestamp) -> Result<SeekOutcome, DriverError> {
        self.request(|reply| Command::SeekTo { target, reply }).await
    }

    pub async fn return_to_live(&self) -> Result<SeekOutcome, DriverError> {
        self.request(|reply| Command::ReturnToLive { reply }).await
    }

    /// Return to live if the paused playhead fell out of the buffered window.
    pub async fn resume(&self) -> Result<Option<SeekOutcome>, DriverError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Latest published controller status.
    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }
}
