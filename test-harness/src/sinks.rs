// Stub producers for exercising dispatch and the reliable-ack path.
use std::sync::Arc;
use tokio::sync::mpsc;

use drover_telemetry::{Producer, Record};

/// Captures every produced record on an unbounded channel.
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<Record>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Record>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                name: name.into(),
                tx,
            }),
            rx,
        )
    }
}

impl Producer for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, record: Record) {
        let _ = self.tx.send(record);
    }
}

/// Models a reliable sink: every ack-eligible record it accepts is
/// immediately posted back on the process-wide ack queue.
pub struct AckingSink {
    name: String,
    ack_tx: mpsc::Sender<Record>,
}

impl AckingSink {
    pub fn new(name: impl Into<String>, ack_tx: mpsc::Sender<Record>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ack_tx,
        })
    }
}

impl Producer for AckingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, record: Record) {
        if record.reply_enabled() {
            let _ = self.ack_tx.try_send(record);
        }
    }
}
