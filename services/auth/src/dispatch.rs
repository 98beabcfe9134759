//! Dispatch queue: hands verification emails to the notification channel
//! without blocking the request path.
//!
//! Producers call [`NotificationEnqueuer::enqueue`], which never waits: a full
//! buffer drops the request with a warning. A single [`DispatchWorker`] drains
//! the buffer in order and retries each request until the channel accepts
//! it, so a channel outage stalls later requests behind the oldest one.

use common::{NotificationPublisher, NotificationRequest};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;

/// Narrow producer port used by the session service
pub trait NotificationEnqueuer: Send + Sync {
    /// Hand off a request. Never blocks and never reports failure.
    fn enqueue(&self, request: NotificationRequest);
}

/// Producer handle on the bounded dispatch buffer
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<NotificationRequest>,
}

impl DispatchQueue {
    /// Create the buffer. The receiver belongs to the [`DispatchWorker`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl NotificationEnqueuer for DispatchQueue {
    fn enqueue(&self, request: NotificationRequest) {
        match self.sender.try_send(request) {
            Ok(()) => debug!("Notification queued"),
            Err(TrySendError::Full(request)) => {
                warn!(email = %request.email, "Dispatch queue full, notification dropped")
            }
            Err(TrySendError::Closed(request)) => {
                warn!(email = %request.email, "Dispatch queue closed, notification dropped")
            }
        }
    }
}

/// Single consumer forwarding buffered requests to the channel
pub struct DispatchWorker {
    receiver: mpsc::Receiver<NotificationRequest>,
    publisher: Arc<dyn NotificationPublisher>,
    retry_backoff: Duration,
}

impl DispatchWorker {
    pub fn new(
        receiver: mpsc::Receiver<NotificationRequest>,
        publisher: Arc<dyn NotificationPublisher>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            receiver,
            publisher,
            retry_backoff,
        }
    }

    /// Run until shutdown is signalled or every producer handle is dropped
    /// and the buffer is empty. Returns the number of requests that were
    /// never published.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!("Dispatch worker started");

        let mut lost = 0;
        loop {
            let request = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                next = self.receiver.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            if !self.forward(&request, &mut shutdown).await {
                lost += 1;
                break;
            }
        }

        self.receiver.close();
        lost += self.receiver.len();
        if lost > 0 {
            warn!(lost, "Dispatch worker stopped with unpublished notifications");
        } else {
            info!("Dispatch worker stopped");
        }
        lost
    }

    /// Publish one request, retrying forever. Returns `false` if shutdown
    /// interrupted it.
    async fn forward(
        &self,
        request: &NotificationRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = stop_requested(shutdown) => {
                    warn!(email = %request.email, attempt, "Shutdown before notification was published");
                    return false;
                }
                result = self.publisher.publish(request) => result,
            };

            match result {
                Ok(()) => {
                    debug!(email = %request.email, attempt, "Notification published");
                    return true;
                }
                Err(e) => {
                    warn!(
                        email = %request.email,
                        attempt,
                        error = %e,
                        "Publishing notification failed, retrying in {:?}",
                        self.retry_backoff
                    );

                    tokio::select! {
                        biased;
                        _ = stop_requested(shutdown) => {
                            warn!(email = %request.email, attempt, "Shutdown before notification was published");
                            return false;
                        }
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }
}

/// Resolves once `true` is sent or the sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Create the dispatch queue and spawn its worker
pub fn spawn(
    config: &DispatchConfig,
    publisher: Arc<dyn NotificationPublisher>,
    shutdown: watch::Receiver<bool>,
) -> (DispatchQueue, JoinHandle<usize>) {
    let (queue, receiver) = DispatchQueue::new(config.capacity);
    let worker = DispatchWorker::new(receiver, publisher, config.retry_backoff);
    let handle = tokio::spawn(worker.run(shutdown));
    (queue, handle)
}
