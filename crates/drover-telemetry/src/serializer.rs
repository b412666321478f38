//! Per-connection binary frame decoder.
//!
//! One serializer exists per live connection, parameterized by the
//! connection's identity and a snapshot of the reliable-ack record types.
//! Every record it produces carries a reply hook back to the serializer so
//! downstream sinks can recover the topic/tx-type tagging when they
//! acknowledge.
use bytes::Bytes;
use prost::Message;
use std::collections::HashSet;
use std::sync::Arc;

use drover_wire::{StreamAck, StreamMessage};

use crate::record::{AckTarget, Record, RequestIdentity};
use crate::Result;

pub struct BinarySerializer {
    identity: RequestIdentity,
    // Record types that have a reliable-ack source configured.
    reliable_ack_types: Arc<HashSet<String>>,
}

impl BinarySerializer {
    pub fn new(identity: RequestIdentity, reliable_ack_types: Arc<HashSet<String>>) -> Arc<Self> {
        Arc::new(Self {
            identity,
            reliable_ack_types,
        })
    }

    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Decode one inbound frame into a dispatch-ready record.
    ///
    /// Failures are per-frame: the caller counts and skips, the connection
    /// stays up.
    pub fn decode(
        self: &Arc<Self>,
        frame: Bytes,
        connection_id: &str,
        transmit_decoded: bool,
    ) -> Result<Record> {
        let envelope = StreamMessage::from_bytes(&frame)?;
        let topic = envelope.topic_str()?.to_string();
        let txid = Bytes::from(envelope.txid.clone());
        // The record type doubles as the topic on this wire format.
        let tx_type = topic.clone();
        let reply_enabled = self.reliable_ack_types.contains(&tx_type);
        let decoded = transmit_decoded.then_some(envelope);
        let ack_target: Arc<dyn AckTarget> = self.clone();
        Ok(Record::new(
            topic,
            tx_type,
            connection_id.to_string(),
            txid,
            frame,
            decoded,
            reply_enabled,
            ack_target,
        ))
    }
}

impl AckTarget for BinarySerializer {
    fn reply_payload(&self, record: &Record, error: Option<&str>) -> Bytes {
        let ack = StreamAck {
            txid: record.txid().to_vec(),
            topic: record.topic().as_bytes().to_vec(),
            error: error.map(str::to_string),
        };
        ack.encode_to_vec().into()
    }
}
