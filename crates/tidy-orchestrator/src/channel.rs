use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tidy_client::OrganizeApi;
use tidy_types::TaskNotification;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub reconnect_delay: Duration,
    /// Resubscriptions allowed over the life of the channel.
    pub max_reconnects: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(800),
            max_reconnects: 5,
        }
    }
}

/// Closes an [`EventChannel`] from anywhere. Cloneable; only the first call
/// has an effect.
#[derive(Clone, Debug)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CloseHandle {
    fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Returns `true` for the call that actually released the connection.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// Push subscription to one task's progress stream.
///
/// Delivery is at-least-once and unordered-safe only in the sense that
/// consumers must treat every notification as a hint. When the underlying
/// stream drops the channel resubscribes and emits a synthetic progress
/// wake, so a transition that happened while disconnected is still noticed.
pub struct EventChannel {
    task_id: String,
    rx: mpsc::Receiver<TaskNotification>,
    close: CloseHandle,
    pump: JoinHandle<()>,
}

impl EventChannel {
    pub fn subscribe(
        api: Arc<dyn OrganizeApi>,
        task_id: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        let task_id = task_id.into();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let close = CloseHandle::new();
        let pump = tokio::spawn(pump(api, task_id.clone(), options, tx, close.clone()));
        Self {
            task_id,
            rx,
            close,
            pump,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    pub fn close(&self) -> bool {
        self.close.close()
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// Next notification; `None` once the channel is closed or the stream
    /// is gone for good.
    pub async fn recv(&mut self) -> Option<TaskNotification> {
        if self.close.is_closed() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.close.closed() => None,
            note = self.rx.recv() => note,
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close.close();
        self.pump.abort();
    }
}

async fn pump(
    api: Arc<dyn OrganizeApi>,
    task_id: String,
    options: ChannelOptions,
    tx: mpsc::Sender<TaskNotification>,
    close: CloseHandle,
) {
    let mut reconnects_left = options.max_reconnects;
    let mut reconnecting = false;

    loop {
        let opened = tokio::select! {
            biased;
            _ = close.closed() => return,
            opened = api.subscribe_task(&task_id) => opened,
        };

        match opened {
            Ok(mut stream) => {
                if reconnecting {
                    tracing::debug!(task_id = %task_id, "task stream resubscribed");
                    if tx.send(TaskNotification::wake(task_id.clone())).await.is_err() {
                        return;
                    }
                }
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = close.closed() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(note)) => {
                            tracing::debug!(task_id = %task_id, kind = ?note.kind, "task notification");
                            if tx.send(note).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            tracing::warn!(task_id = %task_id, "task stream dropped: {}", err);
                            break;
                        }
                        None => {
                            tracing::debug!(task_id = %task_id, "task stream ended");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(task_id = %task_id, "failed to subscribe to task stream: {}", err);
            }
        }

        if reconnects_left == 0 {
            tracing::info!(task_id = %task_id, "task stream reconnect attempts exhausted");
            return;
        }
        reconnects_left -= 1;
        reconnecting = true;

        tokio::select! {
            biased;
            _ = close.closed() => return,
            _ = tokio::time::sleep(options.reconnect_delay) => {}
        }
    }
}
