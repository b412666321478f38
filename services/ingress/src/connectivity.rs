// Synthetic connect/disconnect records.
//
// Connectivity events reuse the normal record pipeline: payload -> envelope
// -> serializer -> dispatch, so observers see a single ordered stream and
// dispatch rules stay uniform. No retry, no persistence.
use prost::Message;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use drover_telemetry::{BinarySerializer, Record};
use drover_wire::{
    ConnectivityStatus, StreamMessage, VehicleConnectivity, DEVICE_TYPE_VEHICLE, TOPIC_CONNECTIVITY,
};

use crate::socket::SocketManager;

pub fn connectivity_record(
    socket: &Arc<SocketManager>,
    serializer: &Arc<BinarySerializer>,
    status: ConnectivityStatus,
) -> drover_telemetry::Result<Record> {
    let now = SystemTime::now();
    let unix_seconds = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    let payload = VehicleConnectivity {
        vin: socket.identity().device_id.clone(),
        connection_id: socket.uuid().to_string(),
        network_interface: socket.network_interface().to_string(),
        created_at: Some(prost_types::Timestamp {
            seconds: unix_seconds as i64,
            nanos: 0,
        }),
        status: status as i32,
    }
    .encode_to_vec();

    let envelope = StreamMessage {
        txid: socket.uuid().as_bytes().to_vec(),
        sender_id: socket.identity().sender_id.as_bytes().to_vec(),
        device_id: socket.identity().device_id.as_bytes().to_vec(),
        device_type: DEVICE_TYPE_VEHICLE.as_bytes().to_vec(),
        topic: TOPIC_CONNECTIVITY.as_bytes().to_vec(),
        payload,
        created_at: unix_seconds as u32,
    };

    socket.decode(serializer, envelope.to_bytes())
}
