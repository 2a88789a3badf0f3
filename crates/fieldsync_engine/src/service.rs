//! Background service that turns connectivity and lifecycle events into cycles.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteSyncApi;
use crate::state::Trigger;
use crate::store::LocalEntityStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of reporting a connectivity reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityTransition {
    /// Offline to online.
    CameOnline,
    /// Online to offline.
    WentOffline,
    /// Same as the previous reading.
    Unchanged,
}

/// Last known network state.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial reading.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Returns the last reading.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a reading and reports how it differs from the last one.
    pub fn set_online(&self, online: bool) -> ConnectivityTransition {
        match (self.online.swap(online, Ordering::SeqCst), online) {
            (false, true) => ConnectivityTransition::CameOnline,
            (true, false) => ConnectivityTransition::WentOffline,
            _ => ConnectivityTransition::Unchanged,
        }
    }
}

enum Command {
    Sync(Trigger),
    Shutdown,
}

struct Worker {
    sender: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Runs sync cycles on a worker thread.
///
/// Cycles start when connectivity returns, when the app is foregrounded while
/// online, on explicit request, and on the configured interval while online.
/// Triggers arriving while a cycle runs are dropped.
pub struct SyncService<R: RemoteSyncApi + 'static, S: LocalEntityStore + 'static> {
    engine: Arc<SyncEngine<R, S>>,
    connectivity: Arc<ConnectivityMonitor>,
    worker: Mutex<Option<Worker>>,
}

impl<R: RemoteSyncApi + 'static, S: LocalEntityStore + 'static> SyncService<R, S> {
    /// Creates a stopped service.
    pub fn new(engine: Arc<SyncEngine<R, S>>, online: bool) -> Self {
        Self {
            engine,
            connectivity: Arc::new(ConnectivityMonitor::new(online)),
            worker: Mutex::new(None),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<R, S>> {
        &self.engine
    }

    /// Returns the connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Returns true while the worker runs.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Starts the worker thread.
    pub fn start(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let (sender, receiver) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let connectivity = Arc::clone(&self.connectivity);
        let interval = self.engine.config().sync_interval;
        let handle = std::thread::Builder::new()
            .name("fieldsync-worker".into())
            .spawn(move || run_worker(&engine, &connectivity, &receiver, interval))?;

        *worker = Some(Worker { sender, handle });
        info!(
            interval_ms = interval.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "sync service started"
        );
        Ok(())
    }

    /// Stops the worker, waiting for a running cycle to finish.
    pub fn stop(&self) -> SyncResult<()> {
        let worker = self.worker.lock().take().ok_or(SyncError::NotRunning)?;
        // A send failure means the worker already exited.
        let _ = worker.sender.send(Command::Shutdown);
        if worker.handle.join().is_err() {
            warn!("sync worker panicked");
        }
        info!("sync service stopped");
        Ok(())
    }

    /// Reports a connectivity reading. Returns true if a cycle was requested.
    pub fn connectivity_changed(&self, online: bool) -> bool {
        match self.connectivity.set_online(online) {
            ConnectivityTransition::CameOnline => {
                info!("connectivity restored");
                self.send(Trigger::ConnectivityRestored)
            }
            ConnectivityTransition::WentOffline => {
                info!("connectivity lost, automatic sync paused");
                false
            }
            ConnectivityTransition::Unchanged => false,
        }
    }

    /// Reports that the app came to the foreground. Returns true if a cycle was requested.
    pub fn app_foregrounded(&self) -> bool {
        if !self.connectivity.is_online() {
            debug!("foregrounded while offline, no sync");
            return false;
        }
        self.send(Trigger::AppForegrounded)
    }

    /// Requests a cycle regardless of the connectivity reading.
    pub fn request_sync(&self) -> SyncResult<()> {
        if self.send(Trigger::Requested) {
            Ok(())
        } else {
            Err(SyncError::NotRunning)
        }
    }

    fn send(&self, trigger: Trigger) -> bool {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.sender.send(Command::Sync(trigger)).is_ok(),
            None => {
                debug!(trigger = %trigger, "service stopped, trigger ignored");
                false
            }
        }
    }
}

impl<R: RemoteSyncApi + 'static, S: LocalEntityStore + 'static> Drop for SyncService<R, S> {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn run_worker<R: RemoteSyncApi, S: LocalEntityStore>(
    engine: &SyncEngine<R, S>,
    connectivity: &ConnectivityMonitor,
    receiver: &Receiver<Command>,
    interval: Option<Duration>,
) {
    loop {
        let command = match interval {
            Some(period) => match receiver.recv_timeout(period) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) if connectivity.is_online() => {
                    Command::Sync(Trigger::Periodic)
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        let trigger = match command {
            Command::Sync(trigger) => trigger,
            Command::Shutdown => return,
        };

        if let Err(err) = engine.sync(trigger) {
            warn!(trigger = %trigger, error = %err, "sync cycle failed");
        }

        // Triggers that queued up during the cycle are covered by it.
        loop {
            match receiver.try_recv() {
                Ok(Command::Sync(dropped)) => {
                    debug!(trigger = %dropped, "trigger arrived during cycle, dropped");
                }
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
    }
}
