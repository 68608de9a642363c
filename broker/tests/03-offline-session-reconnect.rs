// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

mod common;
use codec::{ConnectAckPacket, PacketType, PublishAckPacket, QoS};
use common::{start_broker, RawClient};

/// C1 connects with clean-session=0 and subscribes to `news`; C1
/// disconnects; C2 publishes qos=1 to `news`; C1 reconnects with the same
/// client-id and clean-session=0; the broker CONNACKs with session-present=1
/// and immediately delivers the buffered message; the handshake completes.
#[tokio::test]
async fn non_clean_session_buffers_and_replays_qos1_publish() {
    let (addr, _server) = start_broker().await;

    let mut c1 = RawClient::connect(addr).await;
    c1.connect_mqtt("c1", false, 0).await;
    c1.subscribe(1, "news", QoS::AtLeastOnce).await;
    c1.send(&[0xe0, 0x00]).await; // DISCONNECT
    drop(c1);

    let mut c2 = RawClient::connect(addr).await;
    c2.connect_mqtt("c2", true, 0).await;
    c2.publish("news", QoS::AtLeastOnce, b"headline", false, Some(1)).await;
    let (packet_type, _flags, body) = c2.recv_packet().await;
    assert_eq!(packet_type, PacketType::PublishAck);
    assert_eq!(PublishAckPacket::decode(&body).unwrap().packet_id, 1);

    let mut c1_again = RawClient::connect(addr).await;
    let packet = codec::ConnectPacket {
        flags: codec::ConnectFlags {
            clean_session: false,
            ..Default::default()
        },
        keep_alive: 0,
        client_id: "c1".to_string(),
        ..Default::default()
    };
    let mut bytes = Vec::new();
    packet.encode(&mut bytes).unwrap();
    c1_again.send(&bytes).await;
    let (packet_type, _flags, body) = c1_again.recv_packet().await;
    assert_eq!(packet_type, PacketType::ConnectAck);
    assert!(ConnectAckPacket::decode(&body).unwrap().session_present);

    let (packet_type, flags, body) = c1_again.recv_packet().await;
    assert_eq!(packet_type, PacketType::Publish);
    let publish = codec::PublishPacket::decode(flags, &body).unwrap();
    assert_eq!(publish.topic, "news");
    assert_eq!(publish.payload, b"headline");
    let mid = publish.packet_id.unwrap();

    let mut ack_bytes = Vec::new();
    PublishAckPacket::new(mid).encode(&mut ack_bytes);
    c1_again.send(&ack_bytes).await;
}
