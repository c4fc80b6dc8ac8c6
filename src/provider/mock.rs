//! Scripted adapter used by orchestration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::error::GatewayError;
use crate::core::event::{event_channel, EventStream, FinishReason, StreamEvent, Usage};
use crate::provider::ProviderRequest;

/// Replays pre-scripted event rounds, one per `open_stream` call, and
/// records every request it receives so tests can inspect the replayed
/// history.
#[derive(Clone, Default)]
pub struct MockAdapter {
    rounds: Arc<Mutex<VecDeque<Vec<Result<StreamEvent, GatewayError>>>>>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_round(&self, events: Vec<Result<StreamEvent, GatewayError>>) {
        self.rounds.lock().unwrap().push_back(events);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn rounds_opened(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn open_stream(&self, request: ProviderRequest, _cancel: CancellationToken) -> EventStream {
        self.requests.lock().unwrap().push(request);
        let round = self.rounds.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![Ok(StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage::default(),
            })]
        });

        let (tx, rx) = event_channel();
        tokio::spawn(async move {
            for event in round {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        rx
    }
}
