//! "Verified" notifications.
//!
//! A verified snapshot is re-emitted from its originally ingested raw message
//! with three fields rewritten. Publishing goes through one [`Notifier`] that
//! owns the single [`Publisher`] connection for the whole run; verification
//! workers never publish themselves.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verifier_storage::ExistsSnapshot;

pub const VERIFIED_EVENT_TYPE: &str = "compute.instance.exists.verified.old";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("exists {exists_id} has no raw message")]
    MissingRaw { exists_id: u64 },

    #[error("malformed raw message: {0}")]
    MalformedRaw(String),

    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Exchange the notifications are published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: String,
    pub durable: bool,
}

/// Build the verified notification from a raw `[routing_key, body]` message.
///
/// Returns the raw routing key and the rewritten body: `event_type` becomes
/// [`VERIFIED_EVENT_TYPE`], the old `message_id` moves to
/// `original_message_id`, and a fresh `message_id` is generated.
pub fn verified_message(raw: &Value) -> Result<(String, Value), NotifyError> {
    let parts = raw
        .as_array()
        .filter(|parts| parts.len() == 2)
        .ok_or_else(|| NotifyError::MalformedRaw("expected [routing_key, body]".to_string()))?;
    let routing_key = parts[0]
        .as_str()
        .ok_or_else(|| NotifyError::MalformedRaw("routing key is not a string".to_string()))?
        .to_string();
    let mut body = parts[1].clone();
    let fields = body
        .as_object_mut()
        .ok_or_else(|| NotifyError::MalformedRaw("body is not an object".to_string()))?;

    let original_id = fields.get("message_id").cloned().unwrap_or(Value::Null);
    fields.insert("event_type".to_string(), Value::from(VERIFIED_EVENT_TYPE));
    fields.insert("original_message_id".to_string(), original_id);
    fields.insert(
        "message_id".to_string(),
        Value::from(Uuid::new_v4().to_string()),
    );
    Ok((routing_key, body))
}

/// A message-broker connection.
///
/// Methods take `&mut self`: broker connections are not safe to share, so
/// exactly one owner publishes.
#[async_trait]
pub trait Publisher: Send {
    /// Declare the exchange if it does not exist yet.
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), NotifyError>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &Value,
    ) -> Result<(), NotifyError>;
}

/// Publisher that writes one JSON envelope per line to a writer.
///
/// Stands in for a broker connection when the output is consumed by a
/// forwarding agent or inspected by an operator.
pub struct SpoolPublisher<W> {
    writer: W,
}

#[derive(Serialize)]
struct Envelope<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    body: &'a Value,
}

impl<W> SpoolPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Publisher for SpoolPublisher<W> {
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), NotifyError> {
        debug!(exchange = %exchange.name, kind = %exchange.kind, durable = exchange.durable, "declaring exchange");
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &Value,
    ) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(&Envelope {
            exchange,
            routing_key,
            body,
        })?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Single consumer of verified snapshots; owns the publisher for the run.
pub struct Notifier {
    publisher: Box<dyn Publisher>,
    exchange: ExchangeSpec,
    routing_keys: Option<Vec<String>>,
}

impl Notifier {
    /// `routing_keys: None` publishes to each message's own routing key.
    pub fn new(
        publisher: Box<dyn Publisher>,
        exchange: ExchangeSpec,
        routing_keys: Option<Vec<String>>,
    ) -> Self {
        Self {
            publisher,
            exchange,
            routing_keys,
        }
    }

    /// Publish the verified notification(s) for one snapshot.
    pub async fn send_verified(&mut self, exists: &ExistsSnapshot) -> Result<usize, NotifyError> {
        let raw = exists
            .raw
            .as_ref()
            .ok_or(NotifyError::MissingRaw { exists_id: exists.id })?;
        let (own_key, body) = verified_message(raw)?;
        let keys = match &self.routing_keys {
            Some(keys) => keys.clone(),
            None => vec![own_key],
        };
        for key in &keys {
            self.publisher
                .publish(&self.exchange.name, key, &body)
                .await?;
        }
        Ok(keys.len())
    }

    /// Consume until every sender is dropped.
    ///
    /// A snapshot whose notification cannot be built is skipped. Only a
    /// broker I/O failure ends the notifier; it is returned to whoever
    /// awaits it.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ExistsSnapshot>) -> Result<u64, NotifyError> {
        self.publisher.declare_exchange(&self.exchange).await?;
        let mut sent = 0u64;
        let mut skipped = 0u64;
        while let Some(exists) = rx.recv().await {
            match self.send_verified(&exists).await {
                Ok(published) => sent += published as u64,
                Err(err @ NotifyError::Io(_)) => return Err(err),
                Err(err) => {
                    skipped += 1;
                    warn!(exists_id = exists.id, error = %err, "skipping verified notification");
                }
            }
        }
        info!(sent, skipped, "notifier finished");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use time::macros::datetime;
    use verifier_storage::fixtures::exists_snapshot;

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<(String, String, Value)>>>,
        declared: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn declare_exchange(&mut self, _exchange: &ExchangeSpec) -> Result<(), NotifyError> {
            *self.declared.lock().unwrap() += 1;
            Ok(())
        }

        async fn publish(
            &mut self,
            exchange: &str,
            routing_key: &str,
            body: &Value,
        ) -> Result<(), NotifyError> {
            self.published.lock().unwrap().push((
                exchange.to_string(),
                routing_key.to_string(),
                body.clone(),
            ));
            Ok(())
        }
    }

    fn exchange() -> ExchangeSpec {
        ExchangeSpec {
            name: "monitor".to_string(),
            kind: "topic".to_string(),
            durable: true,
        }
    }

    #[test]
    fn verified_message_rewrites_three_fields() {
        let raw = json!(["monitor.info", {
            "event_type": "compute.instance.exists",
            "message_id": "abc",
            "payload": {"instance_id": "inst-1"}
        }]);
        let (key, body) = verified_message(&raw).unwrap();
        assert_eq!(key, "monitor.info");
        assert_eq!(body["event_type"], VERIFIED_EVENT_TYPE);
        assert_eq!(body["original_message_id"], "abc");
        assert_ne!(body["message_id"], "abc");
        assert!(Uuid::parse_str(body["message_id"].as_str().unwrap()).is_ok());
        assert_eq!(body["payload"], json!({"instance_id": "inst-1"}));
    }

    #[test]
    fn malformed_raw_is_rejected() {
        assert!(matches!(
            verified_message(&json!({"not": "an array"})),
            Err(NotifyError::MalformedRaw(_))
        ));
        assert!(matches!(
            verified_message(&json!(["key", "body"])),
            Err(NotifyError::MalformedRaw(_))
        ));
    }

    #[tokio::test]
    async fn notifier_uses_raw_routing_key_by_default() {
        let publisher = RecordingPublisher::default();
        let mut notifier = Notifier::new(Box::new(publisher.clone()), exchange(), None);
        let exists = exists_snapshot(1, "inst-1", datetime!(2026-01-05 10:00:00 UTC));

        assert_eq!(notifier.send_verified(&exists).await.unwrap(), 1);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published[0].0, "monitor");
        assert_eq!(published[0].1, "monitor.info");
        assert_eq!(published[0].2["original_message_id"], "msg-1");
    }

    #[tokio::test]
    async fn notifier_fans_out_to_configured_routing_keys() {
        let publisher = RecordingPublisher::default();
        let keys = vec!["notifications.info".to_string(), "billing.info".to_string()];
        let notifier = Notifier::new(Box::new(publisher.clone()), exchange(), Some(keys));
        let (tx, rx) = mpsc::unbounded_channel();
        let t = datetime!(2026-01-05 10:00:00 UTC);
        tx.send(exists_snapshot(1, "inst-1", t)).unwrap();
        tx.send(exists_snapshot(2, "inst-2", t)).unwrap();
        drop(tx);

        assert_eq!(notifier.run(rx).await.unwrap(), 4);
        assert_eq!(*publisher.declared.lock().unwrap(), 1);
        let routing: Vec<String> = publisher
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key, _)| key.clone())
            .collect();
        assert_eq!(
            routing,
            vec!["notifications.info", "billing.info", "notifications.info", "billing.info"]
        );
    }

    #[tokio::test]
    async fn send_verified_rejects_missing_raw() {
        let mut notifier = Notifier::new(Box::new(RecordingPublisher::default()), exchange(), None);
        let mut exists = exists_snapshot(9, "inst-9", datetime!(2026-01-05 10:00:00 UTC));
        exists.raw = None;
        assert!(matches!(
            notifier.send_verified(&exists).await,
            Err(NotifyError::MissingRaw { exists_id: 9 })
        ));
    }

    #[tokio::test]
    async fn notifier_skips_snapshots_it_cannot_describe() {
        let publisher = RecordingPublisher::default();
        let notifier = Notifier::new(Box::new(publisher.clone()), exchange(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        let t = datetime!(2026-01-05 10:00:00 UTC);
        let mut no_raw = exists_snapshot(1, "inst-1", t);
        no_raw.raw = None;
        let mut malformed = exists_snapshot(2, "inst-2", t);
        malformed.raw = Some(json!({"not": "an array"}));
        tx.send(no_raw).unwrap();
        tx.send(malformed).unwrap();
        tx.send(exists_snapshot(3, "inst-3", t)).unwrap();
        drop(tx);

        assert_eq!(notifier.run(rx).await.unwrap(), 1);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].2["original_message_id"], "msg-3");
    }

    #[tokio::test]
    async fn broker_failure_ends_the_notifier() {
        struct BrokenPublisher;

        #[async_trait]
        impl Publisher for BrokenPublisher {
            async fn declare_exchange(&mut self, _exchange: &ExchangeSpec) -> Result<(), NotifyError> {
                Ok(())
            }

            async fn publish(
                &mut self,
                _exchange: &str,
                _routing_key: &str,
                _body: &Value,
            ) -> Result<(), NotifyError> {
                Err(NotifyError::Io(std::io::Error::other("connection refused")))
            }
        }

        let notifier = Notifier::new(Box::new(BrokenPublisher), exchange(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(exists_snapshot(1, "inst-1", datetime!(2026-01-05 10:00:00 UTC)))
            .unwrap();
        drop(tx);

        assert!(matches!(notifier.run(rx).await, Err(NotifyError::Io(_))));
    }

    #[tokio::test]
    async fn spool_publisher_writes_json_lines() {
        let mut publisher = SpoolPublisher::new(Vec::new());
        publisher
            .publish("monitor", "monitor.info", &json!({"message_id": "m"}))
            .await
            .unwrap();
        let out = String::from_utf8(publisher.into_inner()).unwrap();
        let line: Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["exchange"], "monitor");
        assert_eq!(line["routing_key"], "monitor.info");
        assert_eq!(line["body"]["message_id"], "m");
    }
}
