// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LIS ASTM-style ASCII record codec: CR-delimited records, `|`-separated
//! fields, `^`-separated components, `~`-separated repeats.
//!
//! Incoming bytes are tokenized into complete records on CR first; only
//! then are complete `H`...`L` transmissions windowed out of the record
//! list. This deliberately avoids re-scanning the raw buffer for literal
//! `"H|"`/`"L|"` substrings, which can misfire if record data happens to
//! contain those two bytes.

use crate::store::{PatientInfo, ResultValue, Sample};
use chrono::Local;

pub const CR: u8 = 0x0D;
pub const ACK: u8 = 0x06;

const FIELD_SEP: char = '|';
const COMPONENT_SEP: char = '^';
const REPEAT_SEP: char = '~';

const MAX_PATIENT_FIELD_LEN: usize = 255;

/// Cap a patient field at 255 bytes, truncating (and logging) anything
/// longer rather than rejecting the transmission outright.
fn truncate_patient_field(value: &str) -> String {
    if value.len() <= MAX_PATIENT_FIELD_LEN {
        return value.to_string();
    }
    let mut end = MAX_PATIENT_FIELD_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    tracing::warn!(target: "lis", len = value.len(), "patient field exceeds 255 bytes, truncating");
    value[..end].to_string()
}

/// Drain complete CR-terminated records out of `buffer`, leaving any
/// trailing partial record for the next read.
pub fn drain_records(buffer: &mut String) -> Vec<String> {
    let mut records = Vec::new();
    while let Some(pos) = buffer.find(CR as char) {
        let record: String = buffer.drain(..=pos).collect();
        let record = record.trim_end_matches(CR as char).to_string();
        if !record.is_empty() {
            records.push(record);
        }
    }
    records
}

/// Window complete `H`...`L` transmissions out of a flat record list.
/// Records outside an open `H`...`L` window are discarded.
pub fn window_transmissions(records: &[String]) -> Vec<Vec<String>> {
    let mut transmissions = Vec::new();
    let mut current: Option<Vec<String>> = None;

    for record in records {
        let record_type = record.chars().next();
        match record_type {
            Some('H') => current = Some(vec![record.clone()]),
            Some('L') => {
                if let Some(mut tx) = current.take() {
                    tx.push(record.clone());
                    transmissions.push(tx);
                }
            }
            _ => {
                if let Some(tx) = current.as_mut() {
                    tx.push(record.clone());
                }
            }
        }
    }
    transmissions
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTransmission {
    pub patient: Option<PatientInfo>,
    pub sample_id: Option<String>,
    pub tests: Vec<String>,
}

pub fn parse_transmission(records: &[String]) -> ParsedTransmission {
    let mut parsed = ParsedTransmission::default();

    for record in records {
        let fields: Vec<&str> = record.split(FIELD_SEP).collect();
        match fields.first().and_then(|f| f.chars().next()) {
            Some('H') => {
                tracing::debug!(
                    target: "lis",
                    sender = fields.get(1).copied().unwrap_or(""),
                    receiver = fields.get(2).copied().unwrap_or(""),
                    datetime = fields.get(3).copied().unwrap_or(""),
                    "header record"
                );
            }
            Some('P') => {
                let mut name = fields.get(2).copied().unwrap_or("").split(COMPONENT_SEP);
                parsed.patient = Some(PatientInfo {
                    patient_id: truncate_patient_field(fields.get(1).unwrap_or(&"")),
                    last_name: truncate_patient_field(name.next().unwrap_or("")),
                    first_name: truncate_patient_field(name.next().unwrap_or("")),
                    dob: truncate_patient_field(fields.get(3).unwrap_or(&"")),
                    gender: truncate_patient_field(fields.get(4).unwrap_or(&"")),
                });
            }
            Some('O') => {
                parsed.sample_id = fields.get(1).map(|s| s.to_string());
                if let Some(test_field) = fields.get(2) {
                    parsed.tests = test_field
                        .split(REPEAT_SEP)
                        .filter_map(|repeat| {
                            let code = repeat.split(COMPONENT_SEP).next().unwrap_or("");
                            if code.is_empty() {
                                None
                            } else {
                                Some(code.to_string())
                            }
                        })
                        .collect();
                }
            }
            _ => {}
        }
    }

    parsed
}

pub fn build_ack() -> Vec<u8> {
    vec![ACK]
}

/// Build a full `H`/`P`/`O`/`R`...`L` result transmission for a completed
/// sample.
pub fn build_result_message(sample: &Sample) -> String {
    let now = Local::now();
    let mut records = Vec::new();

    records.push(join(&["H", "LIS", "ATELLICA", &now.format("%Y%m%d%H%M%S").to_string(), "1", "1", "1"]));

    if let Some(patient) = &sample.patient {
        let name = format!("{}^{}", patient.last_name, patient.first_name);
        records.push(join(&["P", &patient.patient_id, &name, &patient.dob, &patient.gender, "", "", ""]));
    }

    records.push(join(&[
        "O",
        &sample.sample_id,
        "",
        &now.format("%Y%m%d").to_string(),
        "",
        "",
        "",
        "",
        "F",
        "",
        "",
        "",
    ]));

    if let Some(results) = &sample.results {
        for result in results {
            let value_str = match result.value {
                ResultValue::Integer(n) => n.to_string(),
                ResultValue::Float(f) => format!("{:.2}", f),
            };
            records.push(join(&[
                "R",
                &result.test_code,
                "",
                &value_str,
                result.unit,
                "",
                &result.flags,
                "",
                &now.format("%Y%m%d").to_string(),
                &now.format("%H%M%S").to_string(),
                "ATL",
                "F",
                "",
                "",
            ]));
        }
    }

    records.push(join(&["L", "1", "1"]));

    let mut message = records.join("\r");
    message.push('\r');
    message
}

fn join(fields: &[&str]) -> String {
    fields.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ResultValue, SampleStatus, TestResult};
    use std::time::SystemTime;

    #[test]
    fn drain_records_splits_on_cr_and_holds_partial() {
        let mut buf = String::from("H|LIS\rP|1\rO|SAMPLE1");
        let records = drain_records(&mut buf);
        assert_eq!(records, vec!["H|LIS".to_string(), "P|1".to_string()]);
        assert_eq!(buf, "O|SAMPLE1");
    }

    #[test]
    fn window_transmissions_extracts_h_to_l_range_and_drops_stray_lines() {
        let records = vec![
            "STRAY".to_string(),
            "H|LIS".to_string(),
            "P|1".to_string(),
            "O|SAMPLE1|TEST001".to_string(),
            "L|1".to_string(),
            "ALSOSTRAY".to_string(),
        ];
        let tx = window_transmissions(&records);
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].len(), 4);
        assert_eq!(tx[0][0], "H|LIS");
        assert_eq!(tx[0][3], "L|1");
    }

    #[test]
    fn parse_transmission_extracts_patient_and_order() {
        let records = vec![
            "H|LIS".to_string(),
            "P|PID1|Doe^Jane|19800101|F".to_string(),
            "O|SAMPLE1|TEST001~TEST002^X".to_string(),
            "L|1".to_string(),
        ];
        let parsed = parse_transmission(&records);
        assert_eq!(parsed.sample_id.as_deref(), Some("SAMPLE1"));
        assert_eq!(parsed.tests, vec!["TEST001", "TEST002"]);
        let patient = parsed.patient.unwrap();
        assert_eq!(patient.last_name, "Doe");
        assert_eq!(patient.first_name, "Jane");
    }

    #[test]
    fn parse_transmission_truncates_oversized_patient_field() {
        let oversized = "A".repeat(300);
        let records = vec![format!("P|PID1|{}^Jane|19800101|F", oversized)];
        let parsed = parse_transmission(&records);
        let patient = parsed.patient.unwrap();
        assert_eq!(patient.last_name.len(), 255);
    }

    #[test]
    fn parse_transmission_skips_empty_repeat_components() {
        let records = vec!["O|SAMPLE1|~TEST002".to_string()];
        let parsed = parse_transmission(&records);
        assert_eq!(parsed.tests, vec!["TEST002"]);
    }

    #[test]
    fn build_result_message_layout() {
        let sample = Sample {
            sample_id: "SAMPLE1".into(),
            tests: vec!["TEST001".into()],
            patient: None,
            status: SampleStatus::Completed,
            results: Some(vec![TestResult {
                test_code: "TEST001".into(),
                value: ResultValue::Float(5.25),
                unit: "mmol/L",
                flags: String::new(),
            }]),
            received_time: SystemTime::now(),
            completed_time: Some(SystemTime::now()),
        };
        let msg = build_result_message(&sample);
        let records: Vec<&str> = msg.trim_end_matches('\r').split('\r').collect();
        assert_eq!(records[0].split('|').next(), Some("H"));
        assert!(records.iter().any(|r| r.starts_with("O|SAMPLE1")));
        assert!(records.iter().any(|r| r.starts_with("R|TEST001||5.25|mmol/L")));
        assert_eq!(records.last(), Some(&"L|1|1"));
        assert!(msg.ends_with('\r'));
    }
}
