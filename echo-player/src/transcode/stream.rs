//! Audio stream handed from the transcoder to the voice adapter

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, watch};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// How a transcoder run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Process exited cleanly after writing all output
    Finished,
    /// Process failed or output could not be read
    Failed(String),
    /// Consumer went away and the process was killed
    Cancelled,
}

/// Watch on the outcome of one stream
#[derive(Clone)]
pub struct OutcomeWatch(watch::Receiver<Option<StreamOutcome>>);

impl OutcomeWatch {
    pub fn new(rx: watch::Receiver<Option<StreamOutcome>>) -> Self {
        Self(rx)
    }

    /// Outcome if the producer is done
    pub fn current(&self) -> Option<StreamOutcome> {
        self.0.borrow().clone()
    }

    /// Wait for the producer to finish
    pub async fn wait(mut self) -> StreamOutcome {
        let settled = self.0.wait_for(Option::is_some).await.map(|o| o.clone());
        match settled {
            Ok(outcome) => {
                outcome.unwrap_or_else(|| StreamOutcome::Failed("no outcome".to_string()))
            }
            Err(_) => self
                .current()
                .unwrap_or_else(|| StreamOutcome::Failed("producer vanished".to_string())),
        }
    }
}

/// Continuous stream of encoded audio chunks
///
/// Dropping the stream before it ends tells the producer to stop.
pub struct AudioStream {
    id: u64,
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    outcome: OutcomeWatch,
}

impl AudioStream {
    pub fn from_parts(
        chunks: mpsc::Receiver<io::Result<Bytes>>,
        outcome: watch::Receiver<Option<StreamOutcome>>,
    ) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            chunks,
            outcome: OutcomeWatch::new(outcome),
        }
    }

    /// Already-finished stream over fixed chunks
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.try_send(Ok(chunk));
        }
        let (_, outcome) = watch::channel(Some(StreamOutcome::Finished));
        Self::from_parts(rx, outcome)
    }

    /// Process-unique id, used to match "track ended" events to this stream
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn outcome(&self) -> OutcomeWatch {
        self.outcome.clone()
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream").field("id", &self.id).finish()
    }
}

impl Stream for AudioStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_recv(cx)
    }
}
