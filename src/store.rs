// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared simulation state: samples, test inventory, consumable inventory,
//! and instrument health. Every operation here is synchronous and holds the
//! single internal lock only for the duration of the struct edit — callers
//! that need to notify someone of a change (e.g. pushing a completed
//! sample's results to LIS sockets) do so after the call returns, never
//! while the lock is held.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleStatus {
    Received,
    Completed,
}

#[derive(Debug, Clone)]
pub struct PatientInfo {
    pub patient_id: String,
    pub last_name: String,
    pub first_name: String,
    pub dob: String,
    pub gender: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultValue {
    Integer(i64),
    Float(f64),
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub test_code: String,
    pub value: ResultValue,
    pub unit: &'static str,
    pub flags: String,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub sample_id: String,
    pub tests: Vec<String>,
    pub patient: Option<PatientInfo>,
    pub status: SampleStatus,
    pub results: Option<Vec<TestResult>>,
    pub received_time: SystemTime,
    pub completed_time: Option<SystemTime>,
}

/// A completed sample, returned to the caller so it can push the result
/// without holding the store's lock.
#[derive(Debug, Clone)]
pub struct CompletedSample {
    pub sample: Sample,
}

#[derive(Debug, Clone)]
pub struct TestInventoryItem {
    pub name: String,
    pub count: u32,
    pub status: u8,
}

#[derive(Debug, Clone)]
pub struct ConsumableItem {
    pub id: u8,
    pub status: u8,
}

#[derive(Debug, Clone)]
pub struct ConsumableModule {
    pub id: String,
    pub consumables: Vec<ConsumableItem>,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub automation_interface_status: u8,
    pub instrument_process_status: u8,
    pub lis_connection_status: u8,
    pub interface_positions: u8,
    pub remote_control_status: Vec<u8>,
    pub lock_ownership: Vec<u8>,
    pub processing_backlog: u16,
    pub sample_acquisition_delay: u16,
    pub on_board_tube_count: u16,
    pub completed_tube_count: u16,
}

#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub on_board_tube_count: u16,
    pub completed_tube_count: u16,
    pub pending_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Accepted,
    DuplicateId,
    NoValidTests,
}

struct Inner {
    samples: HashMap<String, Sample>,
    pending_results: HashMap<String, Instant>,
    test_inventory: Vec<TestInventoryItem>,
    test_threshold: u32,
    consumable_modules: Vec<ConsumableModule>,
    automation_interface_status: u8,
    instrument_process_status: u8,
    lis_connection_status: u8,
    interface_positions: u8,
    remote_control_status: Vec<u8>,
    lock_ownership: Vec<u8>,
    processing_backlog: u16,
    sample_acquisition_delay: u16,
    on_board_tube_count: u16,
    completed_tube_count: u16,
}

type ResultListener = Box<dyn Fn(&str, &[TestResult]) + Send + Sync>;

pub struct StateStore {
    inner: Mutex<Inner>,
    listener: Mutex<Option<ResultListener>>,
}

impl StateStore {
    pub fn new(
        test_threshold: u32,
        test_inventory: Vec<TestInventoryItem>,
        consumable_modules: Vec<ConsumableModule>,
        automation_interface_status: u8,
        instrument_process_status: u8,
        lis_connection_status: u8,
        interface_positions: u8,
        remote_control_status: Vec<u8>,
        lock_ownership: Vec<u8>,
        processing_backlog: u16,
        sample_acquisition_delay: u16,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: HashMap::new(),
                pending_results: HashMap::new(),
                test_inventory,
                test_threshold,
                consumable_modules,
                automation_interface_status,
                instrument_process_status,
                lis_connection_status,
                interface_positions,
                remote_control_status,
                lock_ownership,
                processing_backlog,
                sample_acquisition_delay,
                on_board_tube_count: 0,
                completed_tube_count: 0,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Register the single result listener, invoked with `(sample_id,
    /// results)` whenever a sample completes. Registration replaces any
    /// previous listener. The listener runs outside the store's lock and
    /// must not call back into `receive_sample`.
    pub fn subscribe_result<F>(&self, listener: F)
    where
        F: Fn(&str, &[TestResult]) + Send + Sync + 'static,
    {
        *self.listener.lock().expect("listener lock poisoned") = Some(Box::new(listener));
    }

    /// Accept a new sample order, rejecting duplicates and orders with no
    /// tests recognized by the current test inventory.
    pub fn receive_sample(
        &self,
        sample_id: &str,
        requested_tests: &[String],
        patient: Option<PatientInfo>,
        result_delay: Duration,
    ) -> ReceiveOutcome {
        let mut inner = self.inner.lock().expect("state store lock poisoned");

        if inner.samples.contains_key(sample_id) {
            return ReceiveOutcome::DuplicateId;
        }

        let valid_tests: Vec<String> = requested_tests
            .iter()
            .filter(|t| inner.test_inventory.iter().any(|item| &item.name == *t))
            .cloned()
            .collect();

        if valid_tests.is_empty() {
            return ReceiveOutcome::NoValidTests;
        }

        inner.samples.insert(
            sample_id.to_string(),
            Sample {
                sample_id: sample_id.to_string(),
                tests: valid_tests,
                patient,
                status: SampleStatus::Received,
                results: None,
                received_time: SystemTime::now(),
                completed_time: None,
            },
        );
        inner.on_board_tube_count += 1;
        inner
            .pending_results
            .insert(sample_id.to_string(), Instant::now() + result_delay);

        ReceiveOutcome::Accepted
    }

    /// Drain every pending result whose due time has passed, compute
    /// results for it, and mark the sample completed. The subscribed
    /// result listener, if any, is invoked once per completed sample after
    /// the store's lock has been released. Returns the completed samples
    /// as well, so callers (and tests) can inspect them directly.
    pub fn complete_due_samples(&self) -> Vec<CompletedSample> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let now = Instant::now();

        let due_ids: Vec<String> = inner
            .pending_results
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut completed = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            inner.pending_results.remove(&id);
            let Some(sample) = inner.samples.get(&id) else {
                continue;
            };
            let results: Vec<TestResult> = sample.tests.iter().map(|t| synthesize_result(t)).collect();

            let sample_mut = inner.samples.get_mut(&id).expect("checked above");
            sample_mut.results = Some(results);
            sample_mut.status = SampleStatus::Completed;
            sample_mut.completed_time = Some(SystemTime::now());
            inner.completed_tube_count += 1;

            completed.push(CompletedSample {
                sample: sample_mut.clone(),
            });
        }
        drop(inner);

        if !completed.is_empty() {
            let listener = self.listener.lock().expect("listener lock poisoned");
            if let Some(callback) = listener.as_ref() {
                for c in &completed {
                    callback(&c.sample.sample_id, c.sample.results.as_deref().unwrap_or(&[]));
                }
            }
        }

        completed
    }

    /// Look up a single sample by id, for callers (such as the result
    /// listener) that need the full record beyond `(sample_id, results)`.
    pub fn get_sample(&self, sample_id: &str) -> Option<Sample> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .samples
            .get(sample_id)
            .cloned()
    }

    /// Update a named test's count and/or status. Returns `false` if no
    /// test with that name exists. If `count` is given and `status` is
    /// not, status is derived from the configured threshold: `0` -> red
    /// (3), below threshold -> yellow (2), otherwise green (1). An
    /// explicit `status` always wins over the derived value.
    pub fn update_test_inventory(
        &self,
        name: &str,
        count: Option<u32>,
        status: Option<u8>,
    ) -> bool {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let threshold = inner.test_threshold;
        let Some(item) = inner.test_inventory.iter_mut().find(|t| t.name == name) else {
            return false;
        };

        if let Some(count) = count {
            item.count = count;
            item.status = if count == 0 {
                3
            } else if count < threshold {
                2
            } else {
                1
            };
        }
        if let Some(status) = status {
            item.status = status;
        }
        true
    }

    pub fn update_consumable_inventory(&self, module_id: &str, consumable_id: u8, status: u8) -> bool {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let Some(module) = inner.consumable_modules.iter_mut().find(|m| m.id == module_id) else {
            return false;
        };
        let Some(item) = module.consumables.iter_mut().find(|c| c.id == consumable_id) else {
            return false;
        };
        item.status = status;
        true
    }

    pub fn update_remote_control_status(&self, index: usize, value: u8) {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        if index >= inner.remote_control_status.len() {
            tracing::warn!(target: "store", index, "remote_control_status index out of range");
            return;
        }
        inner.remote_control_status[index] = value;
    }

    pub fn update_lock_ownership(&self, index: usize, value: u8) {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        if index >= inner.lock_ownership.len() {
            tracing::warn!(target: "store", index, "lock_ownership index out of range");
            return;
        }
        inner.lock_ownership[index] = value;
    }

    pub fn update_processing_backlog(&self, value: u16) {
        self.inner.lock().expect("state store lock poisoned").processing_backlog = value;
    }

    pub fn update_sample_acquisition_delay(&self, value: u16) {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .sample_acquisition_delay = value;
    }

    pub fn get_health(&self) -> HealthSnapshot {
        let inner = self.inner.lock().expect("state store lock poisoned");
        HealthSnapshot {
            automation_interface_status: inner.automation_interface_status,
            instrument_process_status: inner.instrument_process_status,
            lis_connection_status: inner.lis_connection_status,
            interface_positions: inner.interface_positions,
            remote_control_status: inner.remote_control_status.clone(),
            lock_ownership: inner.lock_ownership.clone(),
            processing_backlog: inner.processing_backlog,
            sample_acquisition_delay: inner.sample_acquisition_delay,
            on_board_tube_count: inner.on_board_tube_count,
            completed_tube_count: inner.completed_tube_count,
        }
    }

    pub fn get_test_inventory(&self) -> Vec<TestInventoryItem> {
        self.inner.lock().expect("state store lock poisoned").test_inventory.clone()
    }

    pub fn get_consumable_inventory(&self) -> Vec<ConsumableModule> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .consumable_modules
            .clone()
    }

    /// Sample IDs not yet completed, in the order the wire protocol wants
    /// them (insertion order is not guaranteed by `HashMap`, so callers
    /// that need determinism should sort).
    pub fn get_onboard_sample_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .samples
            .values()
            .filter(|s| s.status != SampleStatus::Completed)
            .map(|s| s.sample_id.clone())
            .collect()
    }

    pub fn status_summary(&self) -> StatusSummary {
        let inner = self.inner.lock().expect("state store lock poisoned");
        StatusSummary {
            on_board_tube_count: inner.on_board_tube_count,
            completed_tube_count: inner.completed_tube_count,
            pending_count: inner.pending_results.len(),
        }
    }
}

/// Synthesize a result value for a test code. The maximal run of trailing
/// ASCII digits in the code decides the branch: even -> integer result in
/// `mg/dL`, odd -> float result in `mmol/L`, no trailing digits -> float
/// result in `U/L`.
fn synthesize_result(test_code: &str) -> TestResult {
    let digit_run: String = test_code
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    let mut rng = rand::thread_rng();

    let (value, unit) = match digit_run.parse::<u32>() {
        Ok(n) if n % 2 == 0 => (ResultValue::Integer(rng.gen_range(10..=100)), "mg/dL"),
        Ok(_) => {
            let v = (rng.gen_range(1.0..=10.0_f64) * 100.0).round() / 100.0;
            (ResultValue::Float(v), "mmol/L")
        }
        Err(_) => {
            let v = (rng.gen_range(0.0..=100.0_f64) * 100.0).round() / 100.0;
            (ResultValue::Float(v), "U/L")
        }
    };

    TestResult {
        test_code: test_code.to_string(),
        value,
        unit,
        flags: String::new(),
    }
}
