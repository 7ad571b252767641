//! Fan-in of concurrently-streaming producers into one ordered channel.
//!
//! N producer tasks write tagged events into one bounded mpsc channel; the
//! single consuming loop drains it. Channel FIFO order is arrival order, so
//! no fragment is ever delayed behind a different producer's later
//! fragment, and the bounded send gives backpressure instead of loss.
//!
//! Each producer ends with exactly one terminal event: `agent_finished`
//! carrying its accumulated full text, or `agent_failed` if its stream
//! errored. A failed producer never stops the others.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use reverie_core::event::PipelineEvent;
use reverie_core::role::Role;
use reverie_llm::generator::FragmentStream;

/// Merges producer fragment streams into one arrival-ordered event feed.
pub struct FanIn {
    rx: mpsc::Receiver<PipelineEvent>,
    handles: Vec<JoinHandle<()>>,
    remaining: usize,
}

impl FanIn {
    /// Spawn one forwarding task per producer. `capacity` bounds the shared
    /// channel; producers block on a full channel rather than dropping.
    #[must_use]
    pub fn spawn(producers: Vec<(Role, FragmentStream)>, capacity: usize) -> Self {
        let remaining = producers.len();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut handles = Vec::with_capacity(remaining);

        for (role, mut stream) in producers {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let mut text = String::new();
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(fragment) => {
                            text.push_str(&fragment);
                            if tx
                                .send(PipelineEvent::Fragment { role, fragment })
                                .await
                                .is_err()
                            {
                                // Consumer gone; nothing left to deliver to.
                                return;
                            }
                        }
                        Err(error) => {
                            warn!(%role, %error, "producer stream failed");
                            let _ = tx
                                .send(PipelineEvent::AgentFailed {
                                    role,
                                    error: error.to_string(),
                                })
                                .await;
                            return;
                        }
                    }
                }
                debug!(%role, chars = text.len(), "producer finished");
                let _ = tx.send(PipelineEvent::AgentFinished { role, text }).await;
            }));
        }

        Self {
            rx,
            handles,
            remaining,
        }
    }

    /// The next event in true arrival order. Returns `None` once every
    /// producer has delivered its terminal event — by then all buffered
    /// fragments have already been handed out.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.remaining -= 1;
        }
        Some(event)
    }

    /// Await the producer tasks. Pure synchronization — once their terminal
    /// events have been observed the tasks are already done.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
