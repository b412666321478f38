// In-tree log sink: emits each record as a structured tracing event.
// Broker-backed producers live outside this repository and plug in through
// the same trait.
use crate::dispatch::Producer;
use crate::record::Record;

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Producer for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, record: Record) {
        tracing::info!(
            sink = %self.name,
            topic = record.topic(),
            tx_type = record.tx_type(),
            connection_id = record.connection_id(),
            bytes = record.raw().len(),
            "record"
        );
    }
}
