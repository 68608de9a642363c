// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

mod common;
use codec::{PacketType, PublishAckPacket, QoS};
use common::{start_broker, RawClient};

/// C1 subscribes qos=1 to `t`; C2 publishes qos=1 payload="p"; the broker
/// PUBACKs C2 with C2's own mid, then sends C1 a PUBLISH carrying a
/// broker-assigned mid, which C1 acknowledges.
#[tokio::test]
async fn qos1_publish_round_trips_through_broker() {
    let (addr, _server) = start_broker().await;

    let mut c1 = RawClient::connect(addr).await;
    c1.connect_mqtt("c1", true, 0).await;
    c1.subscribe(1, "t", QoS::AtLeastOnce).await;

    let mut c2 = RawClient::connect(addr).await;
    c2.connect_mqtt("c2", true, 0).await;
    c2.publish("t", QoS::AtLeastOnce, b"p", false, Some(55)).await;

    let (packet_type, _flags, body) = c2.recv_packet().await;
    assert_eq!(packet_type, PacketType::PublishAck);
    assert_eq!(PublishAckPacket::decode(&body).unwrap().packet_id, 55);

    let (packet_type, flags, body) = c1.recv_packet().await;
    assert_eq!(packet_type, PacketType::Publish);
    let publish = codec::PublishPacket::decode(flags, &body).unwrap();
    assert_eq!(publish.qos, QoS::AtLeastOnce);
    assert_eq!(publish.payload, b"p");
    let broker_mid = publish.packet_id.expect("qos 1 publish carries a packet id");

    let mut ack_bytes = Vec::new();
    PublishAckPacket::new(broker_mid).encode(&mut ack_bytes);
    c1.send(&ack_bytes).await;

    // A clean-session reconnect under the same client-id starts from a
    // fresh, empty session — no redelivery of the already-acked publish.
    drop(c1);
    let mut c1_again = RawClient::connect(addr).await;
    c1_again.connect_mqtt("c1", true, 0).await;
}
