// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background task that completes pending samples once their result delay
//! has elapsed and pushes the generated results out over LIS.

use crate::lis::session::BroadcastList;
use crate::store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// How often the scheduler wakes up to scan for due results. The original
/// instrument polls once a minute; a shorter interval here keeps the
/// simulator responsive without meaningfully changing behavior.
const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Runs until `shutdown` is notified, scanning the store for samples whose
/// result delay has elapsed. The actual result push happens inside the
/// store's own result listener (registered once below), which runs outside
/// the store's lock as soon as a sample completes.
pub async fn run(store: Arc<StateStore>, broadcast: Arc<BroadcastList>, shutdown: Arc<Notify>) {
    {
        let store_for_lookup = Arc::clone(&store);
        store.subscribe_result(move |sample_id, _results| {
            tracing::info!(target: "scheduler", %sample_id, "sample result ready");
            match store_for_lookup.get_sample(sample_id) {
                Some(sample) => broadcast.send_result(&sample),
                None => tracing::warn!(target: "scheduler", %sample_id, "completed sample vanished before push"),
            }
        });
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(SCAN_INTERVAL) => {
                let _ = store.complete_due_samples();
            }
            _ = shutdown.notified() => {
                tracing::info!(target: "scheduler", "shutting down");
                break;
            }
        }
    }
}
