use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use drover_wire::StreamMessage;

/// Identity derived from the client certificate before upgrade.
///
/// `sender_id` is always `client_type + "." + device_id`; the pair is
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub device_id: String,
    pub sender_id: String,
}

impl RequestIdentity {
    pub fn new(client_type: &str, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            sender_id: format!("{client_type}.{device_id}"),
            device_id,
        }
    }
}

/// Reply hook attached to every decoded record.
///
/// Sinks never reach back into the connection; when a reliable sink wants
/// to confirm a record it re-emits the record on the ack queue, and the
/// router uses this hook to build the reply frame body.
pub trait AckTarget: Send + Sync {
    fn reply_payload(&self, record: &Record, error: Option<&str>) -> Bytes;
}

/// One decoded, dispatch-ready unit originating from a WebSocket frame or
/// a synthesized connectivity event. Read-only after construction.
#[derive(Clone)]
pub struct Record {
    topic: String,
    tx_type: String,
    connection_id: String,
    txid: Bytes,
    raw: Bytes,
    decoded: Option<StreamMessage>,
    reply_enabled: bool,
    produced_at: SystemTime,
    ack_target: Option<Arc<dyn AckTarget>>,
}

impl Record {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        topic: String,
        tx_type: String,
        connection_id: String,
        txid: Bytes,
        raw: Bytes,
        decoded: Option<StreamMessage>,
        reply_enabled: bool,
        ack_target: Arc<dyn AckTarget>,
    ) -> Self {
        Self {
            topic,
            tx_type,
            connection_id,
            txid,
            raw,
            decoded,
            reply_enabled,
            produced_at: SystemTime::now(),
            ack_target: Some(ack_target),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record-type label selecting the reliable-ack source.
    pub fn tx_type(&self) -> &str {
        &self.tx_type
    }

    /// UUID of the socket manager that created this record.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn txid(&self) -> &Bytes {
        &self.txid
    }

    /// The envelope bytes exactly as they arrived on the wire.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Decoded envelope, retained only when transmit-decoded mode is on.
    pub fn decoded(&self) -> Option<&StreamMessage> {
        self.decoded.as_ref()
    }

    pub fn reply_enabled(&self) -> bool {
        self.reply_enabled
    }

    pub fn produced_at(&self) -> SystemTime {
        self.produced_at
    }

    pub fn ack_target(&self) -> Option<&Arc<dyn AckTarget>> {
        self.ack_target.as_ref()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("topic", &self.topic)
            .field("tx_type", &self.tx_type)
            .field("connection_id", &self.connection_id)
            .field("raw_len", &self.raw.len())
            .field("reply_enabled", &self.reply_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_id_is_client_type_dot_device_id() {
        let identity = RequestIdentity::new("vehicle_device", "VIN123");
        assert_eq!(identity.device_id, "VIN123");
        assert_eq!(identity.sender_id, "vehicle_device.VIN123");
    }
}
