//! Async pump over a running [`Session`]: polls the non-blocking retrieve
//! path on a blocking worker and broadcasts completed output buffers to any
//! number of subscribers.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::device::{BUFFER_FLAG_LAST, Direction};
use crate::error::CodecError;
use crate::session::{CompletedBuffer, Session};

pub type CompletedSender = tokio::sync::broadcast::Sender<CompletedCmd>;
pub type CompletedReceiver = tokio::sync::broadcast::Receiver<CompletedCmd>;

/// Stream of completed output buffers; `None` marks end of stream.
pub type CompletedStream = Pin<Box<dyn Stream<Item = Option<CompletedBuffer>> + Send>>;

#[derive(Clone)]
pub enum CompletedCmd {
    Data(CompletedBuffer),
    Eos,
}

/// Backoff between polls when neither direction had a completion ready.
const IDLE_POLL: Duration = Duration::from_millis(1);

pub struct PumpTask {
    cancel: CancellationToken,
    chan: CompletedSender,
}

impl PumpTask {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let (sender, _) = tokio::sync::broadcast::channel(1024);
        Self {
            cancel,
            chan: sender,
        }
    }

    pub fn subscribe(&self) -> CompletedReceiver {
        self.chan.subscribe()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Spawn the blocking pump loop over `session`, which must already be
    /// Running. The loop exits on cancellation, on end of stream, when the
    /// session stops, or on a fatal device error; it always broadcasts a
    /// final `Eos`.
    pub async fn start(&self, session: Arc<Session>) {
        let cancel = self.cancel.clone();
        let sender = self.chan.clone();
        let handle = tokio::task::spawn_blocking(move || Self::pump_loop(session, cancel, sender));
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                log::error!("pump worker failed: {}", e);
            }
        });
    }

    fn pump_loop(session: Arc<Session>, cancel: CancellationToken, sender: CompletedSender) {
        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut progressed = false;

            match session.retrieve(Direction::Output) {
                Ok(Some(done)) => {
                    progressed = true;
                    let last = done.flags & BUFFER_FLAG_LAST != 0;
                    let _ = sender.send(CompletedCmd::Data(done));
                    if last {
                        break 'outer;
                    }
                }
                Ok(None) => {}
                Err(CodecError::NotRunning) => break 'outer,
                Err(e) => {
                    log::error!("retrieve output error: {}", e);
                    break 'outer;
                }
            }

            // Recycle consumed input slots so the producer side can resubmit.
            match session.retrieve(Direction::Input) {
                Ok(Some(_)) => progressed = true,
                Ok(None) => {}
                Err(CodecError::NotRunning) => break 'outer,
                Err(e) => {
                    log::error!("retrieve input error: {}", e);
                    break 'outer;
                }
            }

            if !progressed {
                std::thread::sleep(IDLE_POLL);
            }
        }
        let _ = sender.send(CompletedCmd::Eos);
    }

    /// Adapt a subscription into a stream in the bus style: `Some(Some(_))`
    /// per completion, `Some(None)` at end of stream.
    pub fn completed_stream(receiver: CompletedReceiver) -> CompletedStream {
        let stream = BroadcastStream::new(receiver).filter_map(|cmd| async move {
            match cmd {
                Ok(CompletedCmd::Data(done)) => Some(Some(done)),
                Ok(CompletedCmd::Eos) => Some(None),
                Err(e) => {
                    log::error!("completed stream lagged: {:#?}", e);
                    None
                }
            }
        });
        Box::pin(stream)
    }
}

impl Default for PumpTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PumpTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "pump_test.rs"]
mod pump_test;
