// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection LIS handling and the process-wide broadcast list used to
//! push completed-sample results out to every live LIS socket.

use crate::error::ConnectionError;
use crate::lis::codec;
use crate::store::{PatientInfo, Sample, StateStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;

const READ_CHUNK: usize = 4096;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// Live LIS sockets that the result scheduler broadcasts completed-sample
/// messages to. A socket that errors on send is pruned immediately.
pub struct BroadcastList {
    senders: Mutex<Vec<(u64, mpsc::Sender<Vec<u8>>)>>,
    next_id: AtomicU64,
}

impl BroadcastList {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn count(&self) -> usize {
        self.senders.lock().expect("broadcast list lock poisoned").len()
    }

    fn register(&self) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders.lock().expect("broadcast list lock poisoned").push((id, tx));
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.senders
            .lock()
            .expect("broadcast list lock poisoned")
            .retain(|(sender_id, _)| *sender_id != id);
    }

    pub fn send_result(&self, sample: &Sample) {
        let message = codec::build_result_message(sample).into_bytes();
        let mut dead = Vec::new();
        {
            let senders = self.senders.lock().expect("broadcast list lock poisoned");
            for (id, tx) in senders.iter() {
                match tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(target: "lis", id, "outbound channel full, dropping result push");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut senders = self.senders.lock().expect("broadcast list lock poisoned");
            senders.retain(|(id, _)| !dead.contains(id));
        }
    }
}

impl Default for BroadcastList {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode bytes the way the instrument does: ASCII with non-ASCII bytes
/// replaced rather than rejected.
fn decode_ascii_lossy(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| if b < 0x80 { b as char } else { '\u{FFFD}' }).collect()
}

pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: Arc<StateStore>,
    result_delay: Duration,
    broadcast: Arc<BroadcastList>,
    shutdown: Arc<Notify>,
) {
    tracing::info!(target: "lis", %peer, "connection accepted");
    let (conn_id, mut outbound_rx) = broadcast.register();
    let mut text_buffer = String::new();
    let mut read_buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            result = stream.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        tracing::info!(target: "lis", %peer, "connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        text_buffer.push_str(&decode_ascii_lossy(&read_buf[..n]));
                        let records = codec::drain_records(&mut text_buffer);
                        let transmissions = codec::window_transmissions(&records);
                        for tx in transmissions {
                            if let Err(e) = process_transmission(&mut stream, &tx, &store, result_delay).await {
                                tracing::warn!(target: "lis", %peer, error = %e, "write error");
                                broadcast.unregister(conn_id);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "lis", %peer, error = %e, "read error");
                        break;
                    }
                }
            }
            Some(message) = outbound_rx.recv() => {
                if let Err(e) = stream.write_all(&message).await {
                    tracing::warn!(target: "lis", %peer, error = %e, "failed to push result");
                    break;
                }
            }
            _ = shutdown.notified() => {
                tracing::info!(target: "lis", %peer, "shutting down connection");
                break;
            }
        }
    }

    broadcast.unregister(conn_id);
}

async fn process_transmission(
    stream: &mut TcpStream,
    records: &[String],
    store: &Arc<StateStore>,
    result_delay: Duration,
) -> Result<(), ConnectionError> {
    let parsed = codec::parse_transmission(records);

    if let (Some(sample_id), false) = (&parsed.sample_id, parsed.tests.is_empty()) {
        let patient: Option<PatientInfo> = parsed.patient;
        let outcome = store.receive_sample(sample_id, &parsed.tests, patient, result_delay);
        tracing::info!(target: "lis", sample_id = %sample_id, outcome = ?outcome, "order intake");
    } else {
        tracing::warn!(target: "lis", "transmission with no valid order, no sample intake");
    }

    stream.write_all(&codec::build_ack()).await?;
    stream.flush().await?;
    Ok(())
}
