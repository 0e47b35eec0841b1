use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::platform::Transport;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Fetching,
    Faulted,
    Stopped,
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    /// Completed `receive_batch` calls, failed ones included.
    pub fetches: u64,
    pub faults: u64,
    pub events: u64,
}

/// Supervises long-polling: fetch, dispatch in order, back off on faults,
/// stop on the shutdown signal.
pub struct IngestionLoop {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
    backoff: Duration,
}

impl IngestionLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownSignal,
        backoff: Duration,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            shutdown,
            backoff,
        }
    }

    pub async fn run(self) -> LoopReport {
        let mut report = LoopReport::default();
        let mut state = LoopState::Idle;
        info!("Starting polling...");

        loop {
            let next = match state {
                LoopState::Idle => {
                    if self.shutdown.is_triggered() {
                        LoopState::Stopped
                    } else {
                        LoopState::Fetching
                    }
                }
                LoopState::Fetching => self.fetch_and_dispatch(&mut report).await,
                LoopState::Faulted => {
                    tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => LoopState::Stopped,
                        _ = tokio::time::sleep(self.backoff) => LoopState::Fetching,
                    }
                }
                LoopState::Stopped => break,
            };
            if next != state {
                debug!("Ingestion loop: {:?} -> {:?}", state, next);
            }
            state = next;
        }

        info!(
            fetches = report.fetches,
            faults = report.faults,
            events = report.events,
            "Polling stopped"
        );
        report
    }

    async fn fetch_and_dispatch(&self, report: &mut LoopReport) -> LoopState {
        // A pending long-poll is abandoned on shutdown. The cursor has not
        // moved past its results, so the platform redelivers them later.
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return LoopState::Stopped,
            result = self.transport.receive_batch() => result,
        };
        report.fetches += 1;

        match fetched {
            Ok(batch) => {
                if !batch.is_empty() {
                    debug!("Received {} event(s)", batch.len());
                }
                // Sequential, in platform order. Shutdown does not interrupt a batch.
                for event in batch {
                    self.dispatcher.dispatch(event).await;
                    report.events += 1;
                }
                LoopState::Idle
            }
            Err(e) => {
                report.faults += 1;
                error!(
                    "Polling crashed: {}; retrying in {}s",
                    e,
                    self.backoff.as_secs_f32()
                );
                LoopState::Faulted
            }
        }
    }
}
