// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Process entry point: parse the CLI, load config, init logging, then run
//! one acceptor loop feeding N pinned worker loops.
//!
//! Each worker owns a single-threaded Tokio runtime on its own OS thread; a
//! connection handed to a worker is `spawn`-ed onto that runtime and never
//! migrates, matching the "one event loop per I/O thread" model in the
//! concurrency design.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::LevelFilter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::{BrokerConfig, Cli};
use crate::error::Error;
use crate::listener;
use crate::log::init_log;
use crate::offline_store::OfflineStore;
use crate::topic_index::TopicIndex;

/// A channel into one worker's runtime: handing it an accepted socket pins
/// that connection to the worker for its entire lifetime.
struct WorkerHandle {
    sender: mpsc::UnboundedSender<(TcpStream, SocketAddr)>,
}

/// Parse CLI flags, load config, init logging, and run until the process is
/// killed.
///
/// # Errors
/// Returns an [`Error`] if the config file can't be read/parsed, the listen
/// address is invalid, logging can't be initialized, or the listener can't
/// bind.
pub fn run_server() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = BrokerConfig::load(&cli)?;
    init_log(&config.log_file, LevelFilter::Info)?;

    let listen_address = config.listen_address()?;
    let thread_count = config.threads.max(1);
    log::info!("hebo starting on {listen_address} with {thread_count} worker thread(s)");

    let topic_index = Arc::new(TopicIndex::new());
    let offline_store = Arc::new(OfflineStore::new());

    let workers: Vec<WorkerHandle> = (0..thread_count)
        .map(|id| spawn_worker(id, Arc::clone(&topic_index), Arc::clone(&offline_store)))
        .collect();

    run_acceptor(listen_address, &workers)
}

/// Spawn one worker thread running its own current-thread Tokio runtime.
/// Accepted sockets arrive over `sender` and are `tokio::spawn`-ed onto that
/// runtime as they come in.
fn spawn_worker(id: usize, topic_index: Arc<TopicIndex>, offline_store: Arc<OfflineStore>) -> WorkerHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<(TcpStream, SocketAddr)>();

    thread::Builder::new()
        .name(format!("hebo-worker-{id}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build worker runtime");
            runtime.block_on(async move {
                while let Some((stream, peer)) = receiver.recv().await {
                    tokio::spawn(listener::handle_connection(
                        stream,
                        peer,
                        Arc::clone(&topic_index),
                        Arc::clone(&offline_store),
                    ));
                }
            });
        })
        .expect("failed to spawn worker thread");

    WorkerHandle { sender }
}

/// Accept connections on `addr` and round-robin them across `workers` until
/// the listener errors out.
fn run_acceptor(addr: SocketAddr, workers: &[WorkerHandle]) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(accept_loop(addr, workers))
}

async fn accept_loop(addr: SocketAddr, workers: &[WorkerHandle]) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("accepting connections on {addr}");

    let mut next_worker = 0usize;
    loop {
        let (stream, peer) = listener.accept().await?;
        let worker = &workers[next_worker % workers.len()];
        if worker.sender.send((stream, peer)).is_err() {
            log::error!("worker {next_worker} is gone, dropping connection from {peer}");
        }
        next_worker = next_worker.wrapping_add(1);
    }
}
