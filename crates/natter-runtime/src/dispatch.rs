//! The dispatch loop.
//!
//! One task drains the event queue and hands each event to the
//! [`Dispatcher`](natter_framework::Dispatcher). Its lifecycle is observable
//! through a [`watch`] channel:
//!
//! ```text
//! Idle ──run()──▶ Running ──terminator / queue closed / pool error──▶ Draining ──▶ Stopped
//! ```
//!
//! `Draining` stops intake, then shuts the bot down in a fixed order: worker
//! pool, flow pool, transport disconnect, plugins.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use natter_core::{EventReceiver, QueueError};

use crate::bot::Bot;
use crate::error::RuntimeResult;

/// Where the dispatch loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

pub struct DispatchLoop {
    bot: Arc<Bot>,
    events: EventReceiver,
    state: watch::Sender<LoopState>,
}

impl DispatchLoop {
    pub fn new(bot: Arc<Bot>, events: EventReceiver) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self { bot, events, state }
    }

    /// Subscribes to state changes.
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        debug!(%state, "Dispatch loop state changed");
        self.state.send_replace(state);
    }

    /// Runs until the terminator is dequeued or the queue closes, then shuts
    /// the bot down.
    ///
    /// A pool refusing work also ends the loop; shutdown still runs before
    /// the error is returned.
    pub async fn run(mut self) -> RuntimeResult<()> {
        self.set_state(LoopState::Running);
        info!("Dispatch loop running");

        let mut dispatched: u64 = 0;
        let result = loop {
            match self.events.dequeue().await {
                Ok(event) if event.is_stop() => {
                    info!(dispatched, "Stop requested, draining");
                    break Ok(());
                }
                Ok(event) => {
                    if let Err(e) = self.bot.dispatcher().dispatch(event).await {
                        error!(error = %e, "Dispatch failed, shutting down");
                        break Err(e.into());
                    }
                    dispatched += 1;
                }
                Err(QueueError::Closed) => {
                    info!(dispatched, "Event queue closed, draining");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }
        };

        self.set_state(LoopState::Draining);
        self.events.close();
        self.bot.shutdown().await;

        self.set_state(LoopState::Stopped);
        info!("Dispatch loop stopped");
        result
    }
}
