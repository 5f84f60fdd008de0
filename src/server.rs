// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server harness: binds the LAS and LIS listeners, owns the shared state
//! store, and coordinates cooperative shutdown across both interfaces and
//! the result scheduler.

use crate::config::Config;
use crate::error::ServerError;
use crate::las::codec::SequenceAllocator;
use crate::las::session as las_session;
use crate::lis::session::{self as lis_session, BroadcastList};
use crate::scheduler;
use crate::store::{ConsumableItem, ConsumableModule, StateStore, TestInventoryItem};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub struct Simulator {
    config: Arc<Config>,
    store: Arc<StateStore>,
    broadcast: Arc<BroadcastList>,
    sequence: Arc<Mutex<SequenceAllocator>>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Simulator {
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        let test_inventory = config
            .test_inventory
            .tests
            .iter()
            .map(|t| TestInventoryItem { name: t.name.clone(), count: t.count, status: t.status })
            .collect();

        let consumable_modules = config
            .consumable_inventory
            .modules
            .iter()
            .map(|m| ConsumableModule {
                id: m.id.clone(),
                consumables: m
                    .consumables
                    .iter()
                    .map(|c| ConsumableItem { id: c.id, status: c.status })
                    .collect(),
            })
            .collect();

        let store = StateStore::new(
            config.test_inventory.threshold,
            test_inventory,
            consumable_modules,
            config.core.automation_interface_status,
            config.core.instrument_process_status,
            config.core.lis_connection_status,
            config.core.interface_positions,
            config.core.remote_control_status.clone(),
            config.core.lock_ownership.clone(),
            config.core.processing_backlog,
            config.core.sample_acquisition_delay,
        );

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            broadcast: Arc::new(BroadcastList::new()),
            sequence: Arc::new(Mutex::new(SequenceAllocator::new())),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let las_addr = format!("{}:{}", self.config.las.host, self.config.las.port);
        let lis_addr = format!("{}:{}", self.config.lis.host, self.config.lis.port);

        let las_listener = TcpListener::bind(&las_addr).await.map_err(ServerError::Bind)?;
        let lis_listener = TcpListener::bind(&lis_addr).await.map_err(ServerError::Bind)?;
        tracing::info!(target: "server", %las_addr, %lis_addr, "listening");

        let scheduler_handle = tokio::spawn(scheduler::run(
            Arc::clone(&self.store),
            Arc::clone(&self.broadcast),
            Arc::clone(&self.shutdown),
        ));

        let las_config = Arc::new(self.config.las.clone());
        let store = Arc::clone(&self.store);
        let sequence = Arc::clone(&self.sequence);
        let shutdown = Arc::clone(&self.shutdown);
        let las_accept = tokio::spawn(accept_las(las_listener, store, las_config, sequence, shutdown));

        let result_delay = Duration::from_secs(self.config.lis.result_delay_secs);
        let max_connections = self.config.lis.max_connections;
        let store = Arc::clone(&self.store);
        let broadcast = Arc::clone(&self.broadcast);
        let shutdown = Arc::clone(&self.shutdown);
        let lis_accept = tokio::spawn(accept_lis(
            lis_listener,
            store,
            result_delay,
            max_connections,
            broadcast,
            shutdown,
        ));

        let _ = tokio::join!(scheduler_handle, las_accept, lis_accept);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ShutdownHandle {
    shutdown: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

async fn accept_las(
    listener: TcpListener,
    store: Arc<StateStore>,
    config: Arc<crate::config::LasConfig>,
    sequence: Arc<Mutex<SequenceAllocator>>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let store = Arc::clone(&store);
                        let config = Arc::clone(&config);
                        let sequence = Arc::clone(&sequence);
                        let shutdown = Arc::clone(&shutdown);
                        tokio::spawn(las_session::handle_connection(socket, peer, store, config, sequence, shutdown));
                    }
                    Err(e) => {
                        tracing::warn!(target: "las", error = %e, "accept error");
                    }
                }
            }
            _ = shutdown.notified() => {
                tracing::info!(target: "las", "accept loop shutting down");
                break;
            }
        }
    }
}

async fn accept_lis(
    listener: TcpListener,
    store: Arc<StateStore>,
    result_delay: Duration,
    max_connections: usize,
    broadcast: Arc<BroadcastList>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        if broadcast.count() >= max_connections {
                            tracing::warn!(target: "lis", %peer, max_connections, "connection limit reached, closing");
                            drop(socket);
                            continue;
                        }
                        let store = Arc::clone(&store);
                        let broadcast = Arc::clone(&broadcast);
                        let shutdown = Arc::clone(&shutdown);
                        tokio::spawn(lis_session::handle_connection(socket, peer, store, result_delay, broadcast, shutdown));
                    }
                    Err(e) => {
                        tracing::warn!(target: "lis", error = %e, "accept error");
                    }
                }
            }
            _ = shutdown.notified() => {
                tracing::info!(target: "lis", "accept loop shutting down");
                break;
            }
        }
    }
}
