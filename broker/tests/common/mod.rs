// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared harness for end-to-end protocol tests: spins up a real broker
//! listener on an ephemeral port and drives it with a raw-socket client so
//! the tests exercise the actual wire codec, not an in-process shortcut.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use codec::{ConnectFlags, ConnectPacket, PacketType, QoS};
use hebo::offline_store::OfflineStore;
use hebo::topic_index::TopicIndex;

/// Bind a fresh broker on `127.0.0.1:0` and accept connections onto it for
/// the lifetime of the returned task. Dropping (aborting) the handle tears
/// the listener down.
pub async fn start_broker() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let topic_index = Arc::new(TopicIndex::new());
    let offline_store = Arc::new(OfflineStore::new());

    let handle = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(hebo::listener::handle_connection(
                stream,
                peer,
                Arc::clone(&topic_index),
                Arc::clone(&offline_store),
            ));
        }
    });
    (addr, handle)
}

/// A raw MQTT client used to assert on the exact bytes the broker sends,
/// independent of any client-side codec bugs.
pub struct RawClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to broker");
        Self { stream, buf: Vec::new() }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to broker");
    }

    /// Block until one complete frame is buffered, or panic after 1s.
    pub async fn recv_packet(&mut self) -> (PacketType, u8, Vec<u8>) {
        timeout(Duration::from_secs(1), self.recv_packet_inner())
            .await
            .expect("timed out waiting for a packet")
    }

    async fn recv_packet_inner(&mut self) -> (PacketType, u8, Vec<u8>) {
        loop {
            if let Some(frame) = codec::parse_frame(&self.buf).expect("malformed frame from broker") {
                let result = (frame.packet_type, frame.flags, frame.body.to_vec());
                let consumed = frame.consumed;
                self.buf.drain(0..consumed);
                return result;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.expect("read from broker");
            assert!(n > 0, "broker closed the connection unexpectedly");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// `true` if the broker closes the socket within `millis`, without
    /// sending anything first.
    pub async fn expect_close(&mut self, millis: u64) -> bool {
        let mut chunk = [0u8; 64];
        matches!(
            timeout(Duration::from_millis(millis), self.stream.read(&mut chunk)).await,
            Ok(Ok(0))
        )
    }

    pub async fn connect_mqtt(&mut self, client_id: &str, clean_session: bool, keep_alive: u16) {
        let packet = ConnectPacket {
            flags: ConnectFlags { clean_session, ..Default::default() },
            keep_alive,
            client_id: client_id.to_string(),
            ..Default::default()
        };
        let mut bytes = Vec::new();
        packet.encode(&mut bytes).expect("encode connect");
        self.send(&bytes).await;
        let (packet_type, _flags, _body) = self.recv_packet().await;
        assert_eq!(packet_type, PacketType::ConnectAck);
    }

    pub async fn subscribe(&mut self, packet_id: u16, topic: &str, qos: QoS) {
        let packet = codec::SubscribePacket {
            packet_id,
            topics: vec![codec::SubscribeTopic { topic: topic.to_string(), qos }],
        };
        let mut bytes = Vec::new();
        packet.encode(&mut bytes).expect("encode subscribe");
        self.send(&bytes).await;
        let (packet_type, _flags, _body) = self.recv_packet().await;
        assert_eq!(packet_type, PacketType::SubscribeAck);
    }

    pub async fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8], retain: bool, packet_id: Option<u16>) {
        let packet = codec::PublishPacket {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: payload.to_vec(),
        };
        let mut bytes = Vec::new();
        packet.encode(&mut bytes).expect("encode publish");
        self.send(&bytes).await;
    }
}
