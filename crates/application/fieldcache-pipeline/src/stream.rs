use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Progress updates from a background task. Dropping the stream cancels the task.
#[derive(Debug)]
pub struct ProgressStream<T> {
    rx: mpsc::Receiver<T>,
    _guard: DropGuard,
}

impl<T> ProgressStream<T> {
    pub(crate) fn channel(cancel: CancellationToken) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(fieldcache_config::PROGRESS_CHANNEL_CAPACITY);
        (
            tx,
            Self {
                rx,
                _guard: cancel.drop_guard(),
            },
        )
    }

    pub async fn next_update(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drains the stream and returns the final update.
    pub async fn last(mut self) -> Option<T> {
        let mut last = None;
        while let Some(update) = self.rx.recv().await {
            last = Some(update);
        }
        last
    }
}

impl<T> Stream for ProgressStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
