// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LAS binary frame codec: checksum, timestamp, and per-message-type body
//! encoding/decoding.
//!
//! Frame layout (all multi-byte integers big-endian):
//!
//! ```text
//! STX(1) | msg_len(2) | sequence_id(2) | return_sequence_id(2)
//! | message_type(2) | timestamp(8) | instrument_id(1) | body(N)
//! | checksum(2 ascii hex) | ETX(1)
//! ```
//!
//! `msg_len` is the total frame length. The checksum covers everything
//! from just after STX through the end of the body (i.e. header fields
//! plus body, excluding STX itself and excluding the checksum/ETX bytes).

use crate::error::CodecError;
use crate::store::{ConsumableModule, HealthSnapshot, TestInventoryItem};
use chrono::{Local, TimeZone};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;

const HEADER_LEN: usize = 18;
const FOOTER_LEN: usize = 3;
const MIN_FRAME_LEN: usize = HEADER_LEN + FOOTER_LEN;

pub const MSG_TYPE_ACK: u16 = 0x0000;
pub const MSG_TYPE_HANDSHAKE: u16 = 0x0001;
pub const MSG_TYPE_HEALTH_REQUEST: u16 = 0x0201;
pub const MSG_TYPE_HEALTH_RESPONSE: u16 = 0x0202;
pub const MSG_TYPE_TEST_INVENTORY_REQUEST: u16 = 0x0203;
pub const MSG_TYPE_TEST_INVENTORY_RESPONSE: u16 = 0x0204;
pub const MSG_TYPE_ONBOARD_SAMPLE_REQUEST: u16 = 0x0207;
pub const MSG_TYPE_ONBOARD_SAMPLE_RESPONSE: u16 = 0x0208;
pub const MSG_TYPE_CONSUMABLE_INVENTORY_REQUEST: u16 = 0x020B;
pub const MSG_TYPE_CONSUMABLE_INVENTORY_RESPONSE: u16 = 0x020C;
pub const MSG_TYPE_INITIALIZATION_COMPLETE: u16 = 0x020D;

pub const ACK_OK: u8 = 0x00;
pub const NACK_MALFORMED: u8 = 0x01;
pub const NACK_UNSUPPORTED_TYPE: u8 = 0x03;

#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence_id: u16,
    pub return_sequence_id: u16,
    pub message_type: u16,
    pub timestamp: u64,
    pub instrument_id: u8,
    pub body: Vec<u8>,
}

/// Scan `buffer` for complete `STX..=ETX` frames, draining each one out
/// (including its delimiters) as it's found. Bytes preceding the first
/// STX are discarded as noise, matching the instrument's tolerance for a
/// dropped partial frame at connect time.
pub fn drain_frames(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    loop {
        let Some(stx_pos) = buffer.iter().position(|&b| b == STX) else {
            buffer.clear();
            break;
        };
        if stx_pos > 0 {
            buffer.drain(0..stx_pos);
        }
        let Some(etx_rel) = buffer.iter().skip(1).position(|&b| b == ETX) else {
            break;
        };
        let etx_pos = etx_rel + 1;
        let frame: Vec<u8> = buffer.drain(0..=etx_pos).collect();
        frames.push(frame);
    }
    frames
}

fn checksum(data: &[u8]) -> [u8; 2] {
    let sum: u32 = data.iter().map(|b| *b as u32).sum();
    let byte = (sum % 256) as u8;
    let hex = format!("{:02X}", byte);
    let bytes = hex.as_bytes();
    [bytes[0], bytes[1]]
}

pub fn parse(raw: &[u8]) -> Result<Frame, CodecError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(CodecError::FrameTooShort);
    }
    if raw[0] != STX || raw[raw.len() - 1] != ETX {
        return Err(CodecError::MissingDelimiter);
    }

    let msg_len = u16::from_be_bytes([raw[1], raw[2]]) as usize;
    if msg_len != raw.len() {
        return Err(CodecError::LengthMismatch {
            declared: msg_len,
            actual: raw.len(),
        });
    }

    let sequence_id = u16::from_be_bytes([raw[3], raw[4]]);
    let return_sequence_id = u16::from_be_bytes([raw[5], raw[6]]);
    let message_type = u16::from_be_bytes([raw[7], raw[8]]);
    let timestamp = u64::from_be_bytes(raw[9..17].try_into().expect("8 bytes"));
    let instrument_id = raw[17];

    let body_end = raw.len() - FOOTER_LEN;
    let body = raw[HEADER_LEN..body_end].to_vec();
    let received_checksum = [raw[body_end], raw[body_end + 1]];
    let computed_checksum = checksum(&raw[1..body_end]);
    if computed_checksum != received_checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    Ok(Frame {
        sequence_id,
        return_sequence_id,
        message_type,
        timestamp,
        instrument_id,
        body,
    })
}

pub fn build(
    message_type: u16,
    body: &[u8],
    sequence_id: u16,
    return_sequence_id: u16,
    instrument_id: u8,
) -> Vec<u8> {
    let msg_len = HEADER_LEN + body.len() + FOOTER_LEN;
    let mut out = Vec::with_capacity(msg_len);
    out.push(STX);
    out.extend_from_slice(&(msg_len as u16).to_be_bytes());
    out.extend_from_slice(&sequence_id.to_be_bytes());
    out.extend_from_slice(&return_sequence_id.to_be_bytes());
    out.extend_from_slice(&message_type.to_be_bytes());
    out.extend_from_slice(&current_timestamp().to_be_bytes());
    out.push(instrument_id);
    out.extend_from_slice(body);

    let cs = checksum(&out[1..]);
    out.extend_from_slice(&cs);
    out.push(ETX);
    out
}

/// Seconds since 2000-01-01 00:00:00 local time, matching the instrument's
/// epoch.
fn current_timestamp() -> u64 {
    let base = Local
        .from_local_datetime(
            &chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
                .expect("valid date")
                .and_hms_opt(0, 0, 0)
                .expect("valid time"),
        )
        .single()
        .expect("unambiguous local time");
    let delta = Local::now().signed_duration_since(base).num_seconds();
    delta.max(0) as u64
}

/// Allocates LAS sequence IDs, wrapping `0xFFFF` to `1` and never
/// producing `0`.
pub struct SequenceAllocator {
    next: u16,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> u16 {
        let id = self.next;
        self.next = if self.next == 0xFFFF { 1 } else { self.next + 1 };
        id
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub protocol_version: u16,
    pub instrument_type: u16,
    pub capability_version: u16,
    pub software_version: u16,
    pub instrument_id: u8,
    pub serial: String,
}

pub fn parse_handshake_body(body: &[u8]) -> Result<HandshakeInfo, CodecError> {
    if body.len() < 10 {
        return Err(CodecError::BodyTooShort);
    }
    let protocol_version = u16::from_be_bytes([body[0], body[1]]);
    let instrument_type = u16::from_be_bytes([body[2], body[3]]);
    let capability_version = u16::from_be_bytes([body[4], body[5]]);
    let software_version = u16::from_be_bytes([body[6], body[7]]);
    let instrument_id = body[8];
    let serial_len = body[9] as usize;
    if body.len() < 10 + serial_len {
        return Err(CodecError::BodyTooShort);
    }
    let serial = String::from_utf8_lossy(&body[10..10 + serial_len]).into_owned();

    Ok(HandshakeInfo {
        protocol_version,
        instrument_type,
        capability_version,
        software_version,
        instrument_id,
        serial,
    })
}

pub fn build_handshake_response_body(
    protocol_version: u16,
    instrument_type: u16,
    capability_version: u16,
    software_version: u16,
    instrument_id: u8,
    serial: &str,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&protocol_version.to_be_bytes());
    body.extend_from_slice(&instrument_type.to_be_bytes());
    body.extend_from_slice(&capability_version.to_be_bytes());
    body.extend_from_slice(&software_version.to_be_bytes());
    body.push(instrument_id);
    body.push(serial.len() as u8);
    body.extend_from_slice(serial.as_bytes());
    body
}

pub fn build_ack_body(return_code: u8) -> Vec<u8> {
    vec![return_code]
}

pub fn build_health_response_body(health: &HealthSnapshot) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(health.automation_interface_status);
    body.push(health.instrument_process_status);
    body.push(health.lis_connection_status);
    body.push(health.interface_positions);
    for i in 0..health.interface_positions as usize {
        body.push(*health.remote_control_status.get(i).unwrap_or(&1));
    }
    for i in 0..health.interface_positions as usize {
        body.push(*health.lock_ownership.get(i).unwrap_or(&2));
    }
    body.extend_from_slice(&health.processing_backlog.to_be_bytes());
    body.extend_from_slice(&health.sample_acquisition_delay.to_be_bytes());
    body.extend_from_slice(&health.on_board_tube_count.to_be_bytes());
    body.extend_from_slice(&health.completed_tube_count.to_be_bytes());
    body
}

pub fn build_test_inventory_response_body(items: &[TestInventoryItem]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(items.len() as u16).to_be_bytes());
    for item in items {
        body.push(item.name.len() as u8);
        body.extend_from_slice(item.name.as_bytes());
        body.extend_from_slice(&(item.count as u16).to_be_bytes());
        body.extend_from_slice(&(item.status as u16).to_be_bytes());
    }
    body
}

pub fn build_onboard_sample_response_body(ids: &[String]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(ids.len() as u16).to_be_bytes());
    for id in ids {
        body.push(id.len() as u8);
        body.extend_from_slice(id.as_bytes());
    }
    body.extend_from_slice(&0u16.to_be_bytes()); // removed_count, always 0
    body
}

pub fn build_consumable_inventory_response_body(modules: &[ConsumableModule]) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(modules.len() as u8);
    for module in modules {
        body.push(module.id.len() as u8);
        body.extend_from_slice(module.id.as_bytes());
        body.push(module.consumables.len() as u8);
        for c in &module.consumables {
            body.push(c.id);
            body.push(c.status);
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConsumableItem;

    #[test]
    fn checksum_is_sum_mod_256_as_uppercase_hex() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), *b"06");
        assert_eq!(checksum(&[0xFF, 0xFF]), *b"FE");
    }

    #[test]
    fn sequence_allocator_wraps_0xffff_to_1_never_0() {
        let mut alloc = SequenceAllocator::new();
        assert_eq!(alloc.allocate(), 1);
        alloc.next = 0xFFFF;
        assert_eq!(alloc.allocate(), 0xFFFF);
        assert_eq!(alloc.allocate(), 1);
    }

    #[test]
    fn build_then_parse_roundtrip() {
        let body = vec![0xAA, 0xBB, 0xCC];
        let raw = build(MSG_TYPE_HEALTH_RESPONSE, &body, 7, 3, 0xFF);
        let frame = parse(&raw).expect("valid frame");
        assert_eq!(frame.sequence_id, 7);
        assert_eq!(frame.return_sequence_id, 3);
        assert_eq!(frame.message_type, MSG_TYPE_HEALTH_RESPONSE);
        assert_eq!(frame.instrument_id, 0xFF);
        assert_eq!(frame.body, body);
    }

    #[test]
    fn parse_rejects_short_frame() {
        assert_eq!(parse(&[STX, 0, 1]), Err(CodecError::FrameTooShort));
    }

    #[test]
    fn parse_rejects_length_mismatch() {
        let mut raw = build(MSG_TYPE_ACK, &[0x00], 1, 0, 0xFF);
        raw[1] = 0xFF; // corrupt declared length
        assert!(matches!(parse(&raw), Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn parse_rejects_checksum_mismatch() {
        let mut raw = build(MSG_TYPE_ACK, &[0x00], 1, 0, 0xFF);
        let last = raw.len() - 2;
        raw[last] ^= 0xFF;
        assert_eq!(parse(&raw), Err(CodecError::ChecksumMismatch));
    }

    #[test]
    fn drain_frames_discards_garbage_before_first_stx() {
        let mut buf = vec![0xDE, 0xAD];
        buf.extend(build(MSG_TYPE_ACK, &[0x00], 1, 0, 0xFF));
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_frames_waits_for_incomplete_trailing_frame() {
        let mut buf = build(MSG_TYPE_ACK, &[0x00], 1, 0, 0xFF);
        buf.truncate(buf.len() - 1); // drop the ETX
        let frames = drain_frames(&mut buf);
        assert!(frames.is_empty());
        assert!(!buf.is_empty());
    }

    #[test]
    fn health_response_body_layout() {
        let snapshot = HealthSnapshot {
            automation_interface_status: 1,
            instrument_process_status: 1,
            lis_connection_status: 1,
            interface_positions: 2,
            remote_control_status: vec![4, 5],
            lock_ownership: vec![2, 2],
            processing_backlog: 0,
            sample_acquisition_delay: 0,
            on_board_tube_count: 3,
            completed_tube_count: 1,
        };
        let body = build_health_response_body(&snapshot);
        assert_eq!(body, vec![1, 1, 1, 2, 4, 5, 2, 2, 0, 0, 0, 0, 0, 3, 0, 1]);
    }

    #[test]
    fn health_response_body_does_not_interleave_remote_and_lock_arrays() {
        let snapshot = HealthSnapshot {
            automation_interface_status: 1,
            instrument_process_status: 1,
            lis_connection_status: 1,
            interface_positions: 2,
            remote_control_status: vec![4, 5],
            lock_ownership: vec![9, 9],
            processing_backlog: 0,
            sample_acquisition_delay: 0,
            on_board_tube_count: 0,
            completed_tube_count: 0,
        };
        let body = build_health_response_body(&snapshot);
        // all remote_control_status values first, then all lock_ownership values
        assert_eq!(&body[4..8], &[4, 5, 9, 9]);
    }

    #[test]
    fn consumable_inventory_response_body_layout() {
        let modules = vec![ConsumableModule {
            id: "M1".into(),
            consumables: vec![ConsumableItem { id: 1, status: 1 }],
        }];
        let body = build_consumable_inventory_response_body(&modules);
        assert_eq!(body, vec![1, 2, b'M', b'1', 1, 1, 1]);
    }
}
