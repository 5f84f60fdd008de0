// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection LAS handling: frame accumulation, dispatch, and the
//! ACK/NACK-before-response ordering guarantee.

use crate::config::LasConfig;
use crate::error::ConnectionError;
use crate::las::codec::{self, Frame, SequenceAllocator};
use crate::store::StateStore;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

const READ_CHUNK: usize = 4096;

pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: Arc<StateStore>,
    config: Arc<LasConfig>,
    sequence: Arc<Mutex<SequenceAllocator>>,
    shutdown: Arc<Notify>,
) {
    tracing::info!(target: "las", %peer, "connection accepted");
    let mut buffer = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            result = stream.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        tracing::info!(target: "las", %peer, "connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        buffer.extend_from_slice(&read_buf[..n]);
                        let frames = codec::drain_frames(&mut buffer);
                        for raw in frames {
                            if let Err(e) = process_frame(&mut stream, &raw, &store, &config, &sequence).await {
                                tracing::warn!(target: "las", %peer, error = %e, "error writing response");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "las", %peer, error = %e, "read error");
                        break;
                    }
                }
            }
            _ = shutdown.notified() => {
                tracing::info!(target: "las", %peer, "shutting down connection");
                break;
            }
        }
    }
}

async fn process_frame(
    stream: &mut TcpStream,
    raw: &[u8],
    store: &Arc<StateStore>,
    config: &Arc<LasConfig>,
    sequence: &Arc<Mutex<SequenceAllocator>>,
) -> Result<(), ConnectionError> {
    let frame = match codec::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(target: "las", error = %e, "malformed frame");
            let return_seq = peek_sequence_id(raw).unwrap_or(0);
            send_ack(stream, sequence, codec::NACK_MALFORMED, return_seq, config.instrument_id).await?;
            return Ok(());
        }
    };

    match frame.message_type {
        codec::MSG_TYPE_HANDSHAKE => handle_handshake(stream, &frame, store, config, sequence).await,
        codec::MSG_TYPE_HEALTH_REQUEST => {
            send_ack(stream, sequence, codec::ACK_OK, frame.sequence_id, config.instrument_id).await?;
            let health = store.get_health();
            let body = codec::build_health_response_body(&health);
            send_message(stream, sequence, codec::MSG_TYPE_HEALTH_RESPONSE, &body, frame.sequence_id, config.instrument_id).await
        }
        codec::MSG_TYPE_TEST_INVENTORY_REQUEST => {
            send_ack(stream, sequence, codec::ACK_OK, frame.sequence_id, config.instrument_id).await?;
            let items = store.get_test_inventory();
            let body = codec::build_test_inventory_response_body(&items);
            send_message(stream, sequence, codec::MSG_TYPE_TEST_INVENTORY_RESPONSE, &body, frame.sequence_id, config.instrument_id).await
        }
        codec::MSG_TYPE_ONBOARD_SAMPLE_REQUEST => {
            send_ack(stream, sequence, codec::ACK_OK, frame.sequence_id, config.instrument_id).await?;
            let mut ids = store.get_onboard_sample_ids();
            ids.sort();
            let body = codec::build_onboard_sample_response_body(&ids);
            send_message(stream, sequence, codec::MSG_TYPE_ONBOARD_SAMPLE_RESPONSE, &body, frame.sequence_id, config.instrument_id).await
        }
        codec::MSG_TYPE_CONSUMABLE_INVENTORY_REQUEST => {
            send_ack(stream, sequence, codec::ACK_OK, frame.sequence_id, config.instrument_id).await?;
            let modules = store.get_consumable_inventory();
            let body = codec::build_consumable_inventory_response_body(&modules);
            send_message(stream, sequence, codec::MSG_TYPE_CONSUMABLE_INVENTORY_RESPONSE, &body, frame.sequence_id, config.instrument_id).await
        }
        other => {
            tracing::warn!(target: "las", message_type = format!("{:#06X}", other), "unrecognized message type");
            send_ack(stream, sequence, codec::NACK_UNSUPPORTED_TYPE, frame.sequence_id, config.instrument_id).await
        }
    }
}

async fn handle_handshake(
    stream: &mut TcpStream,
    frame: &Frame,
    _store: &Arc<StateStore>,
    config: &Arc<LasConfig>,
    sequence: &Arc<Mutex<SequenceAllocator>>,
) -> Result<(), ConnectionError> {
    let info = match codec::parse_handshake_body(&frame.body) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(target: "las", error = %e, "malformed handshake body");
            return send_ack(stream, sequence, codec::NACK_MALFORMED, frame.sequence_id, config.instrument_id).await;
        }
    };
    tracing::info!(
        target: "las",
        serial = %info.serial,
        protocol_version = info.protocol_version,
        "handshake received"
    );

    send_ack(stream, sequence, codec::ACK_OK, frame.sequence_id, config.instrument_id).await?;

    let body = codec::build_handshake_response_body(
        config.protocol_version,
        config.instrument_type,
        config.capability_version,
        config.software_version,
        config.instrument_id,
        &config.instrument_serial,
    );
    send_message(stream, sequence, codec::MSG_TYPE_HANDSHAKE, &body, frame.sequence_id, config.instrument_id).await?;
    send_message(stream, sequence, codec::MSG_TYPE_INITIALIZATION_COMPLETE, &[], 0, config.instrument_id).await
}

async fn send_ack(
    stream: &mut TcpStream,
    sequence: &Arc<Mutex<SequenceAllocator>>,
    return_code: u8,
    return_sequence_id: u16,
    instrument_id: u8,
) -> Result<(), ConnectionError> {
    let body = codec::build_ack_body(return_code);
    send_message(stream, sequence, codec::MSG_TYPE_ACK, &body, return_sequence_id, instrument_id).await
}

async fn send_message(
    stream: &mut TcpStream,
    sequence: &Arc<Mutex<SequenceAllocator>>,
    message_type: u16,
    body: &[u8],
    return_sequence_id: u16,
    instrument_id: u8,
) -> Result<(), ConnectionError> {
    let seq = sequence.lock().expect("sequence lock poisoned").allocate();
    let raw = codec::build(message_type, body, seq, return_sequence_id, instrument_id);
    stream.write_all(&raw).await?;
    stream.flush().await?;
    Ok(())
}

/// Best-effort extraction of the sequence id from an otherwise-invalid
/// frame, so NACKs can still echo something meaningful when the checksum
/// (but not the header layout) is what failed.
fn peek_sequence_id(raw: &[u8]) -> Option<u16> {
    if raw.len() < 5 {
        return None;
    }
    Some(u16::from_be_bytes([raw[3], raw[4]]))
}
