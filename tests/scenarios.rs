// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios driving the simulator over real TCP sockets.

use atellica_sim::config::Config;
use atellica_sim::las::codec;
use atellica_sim::server::Simulator;
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

async fn spawn_simulator(result_delay_secs: u64) -> (Config, tokio::task::JoinHandle<()>) {
    let mut config = Config::default();
    config.las.host = "127.0.0.1".into();
    config.lis.host = "127.0.0.1".into();
    config.las.port = free_port();
    config.lis.port = free_port();
    config.lis.result_delay_secs = result_delay_secs;

    let simulator = Simulator::new(config.clone()).expect("valid config");
    let handle = tokio::spawn(async move {
        let _ = simulator.run().await;
    });

    // give the listeners a moment to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (config, handle)
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .expect("read ok");
        buf.extend_from_slice(&chunk[..n]);
        if buf.first() == Some(&codec::STX) && buf.last() == Some(&codec::ETX) {
            return buf;
        }
    }
}

#[tokio::test]
async fn handshake_scenario() {
    let (config, _handle) = spawn_simulator(1800).await;
    let mut stream = TcpStream::connect(format!("{}:{}", config.las.host, config.las.port))
        .await
        .expect("connect to LAS");

    let mut body = Vec::new();
    body.extend_from_slice(&0x0330u16.to_be_bytes());
    body.extend_from_slice(&0x0001u16.to_be_bytes());
    body.extend_from_slice(&0x0104u16.to_be_bytes());
    body.extend_from_slice(&0x0100u16.to_be_bytes());
    body.push(0xFF);
    body.push(4);
    body.extend_from_slice(b"SIMA");

    let request = codec::build(codec::MSG_TYPE_HANDSHAKE, &body, 1, 0, 0xFF);
    stream.write_all(&request).await.expect("write handshake");

    let ack = read_frame(&mut stream).await;
    let frame = codec::parse(&ack).expect("valid ack frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_ACK);
    assert_eq!(frame.body, vec![codec::ACK_OK]);
    assert_eq!(frame.return_sequence_id, 1);

    let response = read_frame(&mut stream).await;
    let frame = codec::parse(&response).expect("valid handshake response frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_HANDSHAKE);
    assert_eq!(frame.return_sequence_id, 1);

    let init_complete = read_frame(&mut stream).await;
    let frame = codec::parse(&init_complete).expect("valid init complete frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_INITIALIZATION_COMPLETE);
    assert_eq!(frame.return_sequence_id, 0);
}

#[tokio::test]
async fn health_query_scenario() {
    let (config, _handle) = spawn_simulator(1800).await;
    let mut stream = TcpStream::connect(format!("{}:{}", config.las.host, config.las.port))
        .await
        .expect("connect to LAS");

    let request = codec::build(codec::MSG_TYPE_HEALTH_REQUEST, &[], 1, 0, 0xFF);
    stream.write_all(&request).await.expect("write health request");

    let ack = read_frame(&mut stream).await;
    let frame = codec::parse(&ack).expect("valid ack frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_ACK);
    assert_eq!(frame.body, vec![codec::ACK_OK]);

    let response = read_frame(&mut stream).await;
    let frame = codec::parse(&response).expect("valid health response frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_HEALTH_RESPONSE);
    assert!(frame.body.len() >= 4);
}

#[tokio::test]
async fn unknown_las_message_type_is_nacked() {
    let (config, _handle) = spawn_simulator(1800).await;
    let mut stream = TcpStream::connect(format!("{}:{}", config.las.host, config.las.port))
        .await
        .expect("connect to LAS");

    let request = codec::build(0x9999, &[], 1, 0, 0xFF);
    stream.write_all(&request).await.expect("write unknown-type request");

    let response = read_frame(&mut stream).await;
    let frame = codec::parse(&response).expect("valid nack frame");
    assert_eq!(frame.message_type, codec::MSG_TYPE_ACK);
    assert_eq!(frame.body, vec![codec::NACK_UNSUPPORTED_TYPE]);
}

async fn read_until(stream: &mut TcpStream, expected: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if buf.len() >= expected.len() {
            return buf;
        }
        let n = timeout(Duration::from_secs(3), stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .expect("read ok");
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn lis_order_intake_and_delayed_result_scenario() {
    let (config, _handle) = spawn_simulator(1).await;
    let mut stream = TcpStream::connect(format!("{}:{}", config.lis.host, config.lis.port))
        .await
        .expect("connect to LIS");

    let message = "H|LIS|ATELLICA|20260101000000|1|1|1\r\
                    P|PID1|Doe^Jane|19800101|F\r\
                    O|SAMPLE1|TEST001\r\
                    L|1|1\r";
    stream.write_all(message.as_bytes()).await.expect("write order");

    let ack = read_until(&mut stream, &[0x06]).await;
    assert_eq!(ack, vec![0x06]);

    let result = timeout(Duration::from_secs(10), async {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.expect("read ok");
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\r') && String::from_utf8_lossy(&buf).contains("|L|") {
                return buf;
            }
        }
    })
    .await
    .expect("result pushed within result delay");

    let text = String::from_utf8_lossy(&result);
    assert!(text.contains("SAMPLE1"));
    assert!(text.contains("|R|TEST001|"));
}

#[tokio::test]
async fn duplicate_order_is_rejected_but_still_acked() {
    let (config, _handle) = spawn_simulator(1800).await;
    let mut stream = TcpStream::connect(format!("{}:{}", config.lis.host, config.lis.port))
        .await
        .expect("connect to LIS");

    let message = "H|LIS|ATELLICA|20260101000000|1|1|1\rO|SAMPLE1|TEST001\rL|1|1\r";
    stream.write_all(message.as_bytes()).await.expect("write order once");
    let _ = read_until(&mut stream, &[0x06]).await;

    stream.write_all(message.as_bytes()).await.expect("write duplicate order");
    let ack = read_until(&mut stream, &[0x06]).await;
    // Every transmission ending in L| gets exactly one ACK, whether or not
    // the sample was accepted.
    assert_eq!(ack, vec![0x06]);
}
