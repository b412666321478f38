// Wire-level envelope and payload types shared by the ingress and its sinks.
use bytes::Bytes;
use prost::Message;

/// Topic carrying synthetic connect/disconnect records.
pub const TOPIC_CONNECTIVITY: &str = "connectivity";
/// Device type stamped on synthesized connectivity envelopes.
pub const DEVICE_TYPE_VEHICLE: &str = "vehicle_device";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed envelope: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("envelope field `{0}` is not valid UTF-8")]
    FieldEncoding(&'static str),
}

/// Envelope carried in every binary WebSocket frame, inbound and outbound.
///
/// All identifier fields are opaque byte strings; `payload` is never
/// interpreted by the ingress.
///
/// ```
/// use drover_wire::StreamMessage;
///
/// let envelope = StreamMessage {
///     txid: b"T1".to_vec(),
///     topic: b"V".to_vec(),
///     ..Default::default()
/// };
/// let bytes = envelope.to_bytes();
/// let decoded = StreamMessage::from_bytes(&bytes).expect("decode");
/// assert_eq!(decoded, envelope);
/// ```
#[derive(Clone, PartialEq, Message)]
pub struct StreamMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub txid: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub sender_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub device_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub device_type: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub topic: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub payload: Vec<u8>,
    // Unix seconds; the envelope predates 64-bit timestamps on the wire.
    #[prost(uint32, tag = "7")]
    pub created_at: u32,
}

impl StreamMessage {
    pub fn to_bytes(&self) -> Bytes {
        self.encode_to_vec().into()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }

    /// Dispatch topic as a string; the topic selects fan-out rules and
    /// must be valid UTF-8 even though it travels as bytes.
    pub fn topic_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.topic).map_err(|_| Error::FieldEncoding("topic"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConnectivityStatus {
    Unknown = 0,
    Connected = 1,
    Disconnected = 2,
}

impl ConnectivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityStatus::Unknown => "UNKNOWN",
            ConnectivityStatus::Connected => "CONNECTED",
            ConnectivityStatus::Disconnected => "DISCONNECTED",
        }
    }
}

/// Payload of synthetic lifecycle records on the connectivity topic.
#[derive(Clone, PartialEq, Message)]
pub struct VehicleConnectivity {
    #[prost(string, tag = "1")]
    pub vin: String,
    #[prost(string, tag = "2")]
    pub connection_id: String,
    #[prost(string, tag = "3")]
    pub network_interface: String,
    #[prost(message, optional, tag = "4")]
    pub created_at: Option<prost_types::Timestamp>,
    #[prost(enumeration = "ConnectivityStatus", tag = "5")]
    pub status: i32,
}

/// Reply frame body written back to a device once a reliable sink has
/// durably accepted the original record. `error` is set only on NACK.
#[derive(Clone, PartialEq, Message)]
pub struct StreamAck {
    #[prost(bytes = "vec", tag = "1")]
    pub txid: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub topic: Vec<u8>,
    #[prost(string, optional, tag = "3")]
    pub error: Option<String>,
}
