//! Core firmware logic for a dual sub-GHz + 2.4 GHz RF security tool
//! (spec §1, §9): the CC1101 Worker state machine, the pulse-level
//! protocol engine and brute-force substrate, and the external command
//! plane that drives them over a framed byte-stream transport.
//!
//! What actually touches silicon — SPI transactions, GPIO edges, flash
//! wear-levelling, the BLE/serial transport link, the battery ADC — sits
//! behind the [`radio`], [`nrf`], [`storage`], [`transport`] and
//! [`dispatcher::PowerMonitor`] seams (spec §1's external collaborators).
//! Everything above those seams is plain, hosted, testable Rust.

pub mod bruteforce;
pub mod bytes;
pub mod chunker;
pub mod dispatcher;
pub mod error;
pub mod fileio;
pub mod framing;
pub mod hid;
pub mod isr;
mod log;
pub mod notify;
pub mod nrf;
pub mod protocol;
pub mod pulsefile;
pub mod radio;
pub mod settings;
pub mod storage;
pub mod transport;
pub mod types;
pub mod worker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bruteforce::BruteForceEngine;
use crate::chunker::ChunkEmitter;
use crate::dispatcher::{Dispatcher, PowerMonitor};
use crate::fileio::FileIo;
use crate::notify::{Notification, NotificationSender};
use crate::protocol::{fixed, rolling, Router};
use crate::radio::{BusArbiter, RadioFactory};
use crate::settings::SettingsStore;
use crate::storage::StorageBackend;
use crate::transport::Transport;
use crate::worker::{Task, Worker};

/// Registers every decoder this build knows about with a fresh [`Router`]
/// (spec §4.7: fixed-code menu protocols plus the automotive rolling-code
/// family). One [`Worker`] owns exactly one of these.
pub fn default_router() -> Router {
    let mut decoders = fixed::all_decoders();
    decoders.extend(rolling::all_decoders());
    Router::new(decoders)
}

/// Everything [`Service::start`] needs handed to it. Each field is an
/// external-collaborator seam (spec §1): the caller supplies real
/// hardware-backed implementations in a deployed build and the `Mock*`/
/// in-memory stand-ins under test.
#[allow(clippy::too_many_arguments)]
pub struct ServiceConfig {
    pub radio_a: Box<dyn crate::radio::SubGhzRadio>,
    pub radio_b: Box<dyn crate::radio::SubGhzRadio>,
    pub radios: Arc<dyn RadioFactory>,
    pub storage: Arc<dyn StorageBackend>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub transport: Arc<dyn Transport>,
    pub power: Option<Arc<dyn PowerMonitor>>,
}

/// The running service: every long-lived task plus the [`Dispatcher`]
/// inbound frames are handed to. Built in the dependency order spec §9
/// lays out ("settings -> storage -> notification queue -> worker task ->
/// command dispatcher -> transport"); [`Service::shutdown`] tears down in
/// the reverse order.
pub struct Service {
    pub dispatcher: Arc<Dispatcher>,
    worker_task: Option<tokio::task::JoinHandle<()>>,
    sender_task: Option<tokio::task::JoinHandle<()>>,
}

impl Service {
    /// Builds every collaborator and spawns the Worker and notification
    /// sender as background tasks. The dispatcher is returned already
    /// wired to both; the caller only has to feed it inbound frames (via
    /// [`Dispatcher::handle_frame`]) as they arrive off `transport`.
    pub fn start(config: ServiceConfig) -> Self {
        // settings
        let settings_store = config.settings_store;

        // storage
        let storage = config.storage;

        // notification queue
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<Notification>();
        let emitter = Arc::new(ChunkEmitter::new());
        let sender = NotificationSender::new(notify_rx, emitter.clone(), config.transport.clone());
        let sender_task = tokio::spawn(sender.run());

        // worker task
        let (task_tx, task_rx) = mpsc::channel::<Task>(64);
        let bus = Arc::new(BusArbiter::new());
        let is_executing = Arc::new(AtomicBool::new(false));
        let worker = Worker::new(
            config.radio_a,
            config.radio_b,
            default_router(),
            notify_tx.clone(),
            task_rx,
            bus.clone(),
            storage.clone(),
            is_executing.clone(),
        );
        let mode_mirror = worker.mode_mirror();
        let worker_task = tokio::spawn(worker.run());

        // command dispatcher
        let file_io = Arc::new(FileIo::new(storage.clone(), notify_tx.clone(), emitter, config.transport));
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let bruteforce = Arc::new(BruteForceEngine::new(notify_tx.clone(), storage.clone(), cancel, running));
        let dispatcher = Arc::new(Dispatcher::new(
            task_tx,
            mode_mirror,
            file_io,
            storage,
            settings_store,
            bruteforce,
            config.radios,
            bus,
            notify_tx,
            is_executing,
            config.power,
        ));

        Service { dispatcher, worker_task: Some(worker_task), sender_task: Some(sender_task) }
    }

    /// Drops the dispatcher's inbound senders, which closes the task and
    /// notification channels and lets both background tasks exit on
    /// their own, then waits for them (reverse construction order:
    /// dispatcher first, worker and notification sender after).
    pub async fn shutdown(mut self) {
        drop(self.dispatcher);
        if let Some(t) = self.worker_task.take() {
            let _ = t.await;
        }
        if let Some(t) = self.sender_task.take() {
            let _ = t.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::MockRadio;
    use crate::radio::MockRadioFactory;
    use crate::storage::MemBackend;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn service_starts_and_answers_get_state() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let settings_store: Arc<dyn SettingsStore> =
            Arc::new(crate::settings::StorageSettingsStore::new(storage.clone(), "settings.txt"));
        let (transport, mut rx) = ChannelTransport::new();
        let config = ServiceConfig {
            radio_a: Box::new(MockRadio::new()),
            radio_b: Box::new(MockRadio::new()),
            radios: Arc::new(MockRadioFactory),
            storage,
            settings_store,
            transport: Arc::new(transport),
            power: None,
        };
        let service = Service::start(config);

        let mut frame = Vec::new();
        crate::framing::encode_frame(1, 1, 1, &[crate::dispatcher::opcode::GET_STATE], &mut frame);
        service.dispatcher.handle_frame(&frame).await;

        let chunk = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("a notification chunk should arrive")
            .expect("channel should stay open");
        assert_eq!(chunk[0], crate::framing::MAGIC);

        service.shutdown().await;
    }
}
