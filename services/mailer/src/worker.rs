//! Delivery worker: reads notification requests from the channel and sends
//! them over the email transport.
//!
//! Every message gets exactly one handling attempt and is acknowledged
//! afterwards, whether it was delivered, malformed or rejected by the SMTP
//! server. Retrying is the dispatch queue's job, not this one's.

use common::{ChannelMessage, NotificationRequest, NotificationSubscriber};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::transport::EmailTransport;

/// Result of handling a single channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Malformed,
    Failed,
}

pub struct DeliveryWorker<S> {
    subscriber: S,
    transport: Arc<dyn EmailTransport>,
    read_retry_backoff: Duration,
}

impl<S: NotificationSubscriber> DeliveryWorker<S> {
    pub fn new(subscriber: S, transport: Arc<dyn EmailTransport>, read_retry_backoff: Duration) -> Self {
        Self {
            subscriber,
            transport,
            read_retry_backoff,
        }
    }

    /// Consume the channel until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Delivery worker started");

        loop {
            let batch = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                batch = self.subscriber.next_batch() => batch,
            };

            match batch {
                Ok(messages) => {
                    for message in messages {
                        self.handle(&message).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from notification channel");
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.read_retry_backoff) => {}
                    }
                }
            }
        }

        info!("Delivery worker stopped");
    }

    /// Deliver one message, then acknowledge it
    pub async fn handle(&mut self, message: &ChannelMessage) -> Delivery {
        let delivery = match NotificationRequest::decode(&message.payload) {
            Ok(request) => {
                match self
                    .transport
                    .send(&request.email, &request.subject, &request.body())
                    .await
                {
                    Ok(()) => {
                        info!(id = %message.id, email = %request.email, "Verification email sent");
                        Delivery::Sent
                    }
                    Err(e) => {
                        error!(id = %message.id, email = %request.email, error = %e, "Email delivery failed, message dropped");
                        Delivery::Failed
                    }
                }
            }
            Err(e) => {
                warn!(id = %message.id, key = %message.key, error = %e, "Malformed notification dropped");
                Delivery::Malformed
            }
        };

        if let Err(e) = self.subscriber.ack(&message.id).await {
            error!(id = %message.id, error = %e, "Failed to acknowledge message");
        }

        delivery
    }
}

/// Resolves once `true` is sent or the sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeliveryError;
    use async_trait::async_trait;
    use common::error::{ChannelError, ChannelResult};
    use std::{
        collections::VecDeque,
        sync::Mutex,
    };
    use tokio::time::Instant;

    /// Replays scripted batches, then signals shutdown
    struct ScriptedSubscriber {
        batches: VecDeque<ChannelResult<Vec<ChannelMessage>>>,
        acked: Arc<Mutex<Vec<String>>>,
        done: watch::Sender<bool>,
    }

    #[async_trait]
    impl NotificationSubscriber for ScriptedSubscriber {
        async fn next_batch(&mut self) -> ChannelResult<Vec<ChannelMessage>> {
            match self.batches.pop_front() {
                Some(batch) => batch,
                None => {
                    let _ = self.done.send(true);
                    Ok(Vec::new())
                }
            }
        }

        async fn ack(&mut self, id: &str) -> ChannelResult<()> {
            self.acked.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    /// Never yields a batch
    struct IdleSubscriber;

    #[async_trait]
    impl NotificationSubscriber for IdleSubscriber {
        async fn next_batch(&mut self) -> ChannelResult<Vec<ChannelMessage>> {
            std::future::pending().await
        }

        async fn ack(&mut self, _id: &str) -> ChannelResult<()> {
            Ok(())
        }
    }

    /// Records sends and rejects one recipient
    #[derive(Default)]
    struct RecordingTransport {
        reject: Option<String>,
        attempts: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingTransport {
        fn attempts(&self) -> Vec<(String, String, String)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
            self.attempts
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));

            if self.reject.as_deref() == Some(to) {
                let err = "rejected".parse::<lettre::Address>().unwrap_err();
                return Err(DeliveryError::Address(err));
            }
            Ok(())
        }
    }

    fn message(id: &str, email: &str, code: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.to_string(),
            key: email.to_string(),
            payload: NotificationRequest::verification(email, code).encode().unwrap(),
        }
    }

    fn malformed(id: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.to_string(),
            key: "a@x.com".to_string(),
            payload: "{not json".to_string(),
        }
    }

    async fn run_script(
        batches: Vec<ChannelResult<Vec<ChannelMessage>>>,
        transport: Arc<RecordingTransport>,
    ) -> Vec<String> {
        let (done, shutdown) = watch::channel(false);
        let acked = Arc::new(Mutex::new(Vec::new()));
        let subscriber = ScriptedSubscriber {
            batches: batches.into(),
            acked: acked.clone(),
            done,
        };

        DeliveryWorker::new(subscriber, transport, Duration::from_secs(2))
            .run(shutdown)
            .await;

        let acked = acked.lock().unwrap().clone();
        acked
    }

    #[tokio::test]
    async fn test_delivers_and_acknowledges_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let acked = run_script(
            vec![
                Ok(vec![message("1-0", "a@x.com", "042137")]),
                Ok(vec![message("2-0", "b@x.com", "999999")]),
            ],
            transport.clone(),
        )
        .await;

        assert_eq!(acked, vec!["1-0", "2-0"]);
        assert_eq!(
            transport.attempts(),
            vec![
                (
                    "a@x.com".to_string(),
                    "Verify your account".to_string(),
                    "Your code: 042137".to_string()
                ),
                (
                    "b@x.com".to_string(),
                    "Verify your account".to_string(),
                    "Your code: 999999".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped_and_acknowledged() {
        let transport = Arc::new(RecordingTransport::default());
        let acked = run_script(
            vec![Ok(vec![malformed("1-0"), message("2-0", "b@x.com", "123456")])],
            transport.clone(),
        )
        .await;

        assert_eq!(acked, vec!["1-0", "2-0"]);
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].0, "b@x.com");
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let transport = Arc::new(RecordingTransport {
            reject: Some("a@x.com".to_string()),
            ..Default::default()
        });
        let acked = run_script(
            vec![Ok(vec![
                message("1-0", "a@x.com", "111111"),
                message("2-0", "b@x.com", "222222"),
            ])],
            transport.clone(),
        )
        .await;

        assert_eq!(acked, vec!["1-0", "2-0"]);
        let recipients: Vec<String> = transport.attempts().into_iter().map(|a| a.0).collect();
        assert_eq!(recipients, vec!["a@x.com", "b@x.com"]);
    }

    #[tokio::test]
    async fn test_handle_reports_outcome() {
        let transport = Arc::new(RecordingTransport {
            reject: Some("bad@x.com".to_string()),
            ..Default::default()
        });
        let (done, _shutdown) = watch::channel(false);
        let subscriber = ScriptedSubscriber {
            batches: VecDeque::new(),
            acked: Arc::new(Mutex::new(Vec::new())),
            done,
        };
        let mut worker = DeliveryWorker::new(subscriber, transport, Duration::from_secs(2));

        assert_eq!(worker.handle(&message("1-0", "a@x.com", "1")).await, Delivery::Sent);
        assert_eq!(worker.handle(&message("2-0", "bad@x.com", "1")).await, Delivery::Failed);
        assert_eq!(worker.handle(&malformed("3-0")).await, Delivery::Malformed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_backs_off_then_continues() {
        let transport = Arc::new(RecordingTransport::default());
        let started = Instant::now();

        let acked = run_script(
            vec![
                Err(ChannelError::NotReady { attempts: 1 }),
                Ok(vec![message("1-0", "a@x.com", "123456")]),
            ],
            transport.clone(),
        )
        .await;

        assert_eq!(acked, vec!["1-0"]);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocking_read() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = DeliveryWorker::new(
            IdleSubscriber,
            Arc::new(RecordingTransport::default()),
            Duration::from_secs(2),
        );

        let handle = tokio::spawn(worker.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
