//! Topic fan-out.
//!
//! Dispatch rules are built once at startup and read-only afterwards.
//! Producers must accept `produce` promptly (they buffer internally); the
//! engine never waits on downstream brokers here.
use std::collections::HashMap;
use std::sync::Arc;

use crate::record::Record;

/// External collaborator consuming records for one named sink.
///
/// A producer owns its own retry/backoff policy; `produce` is
/// fire-and-forget from the engine's point of view.
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;
    fn produce(&self, record: Record);
}

pub struct DispatchEngine {
    rules: HashMap<String, Vec<Arc<dyn Producer>>>,
}

impl DispatchEngine {
    pub fn new(rules: HashMap<String, Vec<Arc<dyn Producer>>>) -> Self {
        Self { rules }
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.rules.contains_key(topic)
    }

    /// Fan a record out to every producer configured for its topic, in
    /// declared order. A topic with no rule drops the record silently;
    /// that is how optional topics (connectivity) are switched off.
    pub fn dispatch(&self, record: &Record) {
        let Some(producers) = self.rules.get(record.topic()) else {
            tracing::trace!(topic = record.topic(), "no dispatch rule, record dropped");
            return;
        };
        metrics::counter!("ingress_records_dispatched_total", "topic" => record.topic().to_string())
            .increment(1);
        for producer in producers {
            producer.produce(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RequestIdentity;
    use crate::serializer::BinarySerializer;
    use drover_wire::StreamMessage;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct NamedCapture {
        name: String,
        seen: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    }

    impl Producer for NamedCapture {
        fn name(&self) -> &str {
            &self.name
        }

        fn produce(&self, record: Record) {
            self.seen
                .lock()
                .expect("capture lock")
                .push((self.name.clone(), record.txid().to_vec()));
        }
    }

    fn record(topic: &[u8], txid: &[u8]) -> Record {
        let serializer = BinarySerializer::new(
            RequestIdentity::new("vehicle_device", "VIN123"),
            Arc::new(HashSet::new()),
        );
        let frame = StreamMessage {
            txid: txid.to_vec(),
            topic: topic.to_vec(),
            ..Default::default()
        }
        .to_bytes();
        serializer.decode(frame, "conn-1", false).expect("decode")
    }

    #[test]
    fn fan_out_preserves_declared_producer_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(NamedCapture {
            name: "first".into(),
            seen: seen.clone(),
        });
        let second = Arc::new(NamedCapture {
            name: "second".into(),
            seen: seen.clone(),
        });
        let mut rules: HashMap<String, Vec<Arc<dyn Producer>>> = HashMap::new();
        rules.insert("V".to_string(), vec![first, second]);
        let engine = DispatchEngine::new(rules);

        engine.dispatch(&record(b"V", b"T1"));
        engine.dispatch(&record(b"V", b"T2"));

        let seen = seen.lock().expect("capture lock");
        let order: Vec<&str> = seen.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(order, ["first", "second", "first", "second"]);
        assert_eq!(seen[0].1, b"T1");
        assert_eq!(seen[2].1, b"T2");
    }

    #[test]
    fn unconfigured_topic_drops_silently() {
        let engine = DispatchEngine::new(HashMap::new());
        assert!(!engine.has_topic("connectivity"));
        // Must not panic or error.
        engine.dispatch(&record(b"connectivity", b"T1"));
    }
}
