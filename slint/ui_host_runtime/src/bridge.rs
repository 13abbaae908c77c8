//! Bridge worker: one thread that owns the [`ScriptSession`] and runs
//! commands for the rest of the process in submission order.

use crate::dispatch::UiDispatcher;
use crate::error::BridgeError;
use crate::session::{HostServices, InvocationOutcome, PendingCommand, ScriptSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

type Reply = Box<dyn FnOnce(Result<InvocationOutcome, BridgeError>) + Send + 'static>;

enum BridgeRequest {
    Invoke { command: PendingCommand, reply: Reply },
    Shutdown,
}

/// Cloneable, `Send` access to the bridge worker.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: SyncSender<BridgeRequest>,
    dispatcher: Arc<dyn UiDispatcher>,
    queue_capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl BridgeHandle {
    /// Runs `command` and waits for its outcome.
    ///
    /// Refused on the UI thread: a command that creates UI objects waits for
    /// the UI thread, so blocking it here would deadlock.
    pub fn invoke(&self, command: PendingCommand) -> Result<InvocationOutcome, BridgeError> {
        if self.dispatcher.is_ui_thread() {
            return Err(BridgeError::BlockingOnUiThread);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let reply: Reply = Box::new(move |result| {
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(BridgeRequest::Invoke { command, reply })
            .map_err(|_| BridgeError::WorkerStopped)?;
        reply_rx.recv().map_err(|_| BridgeError::WorkerStopped)?
    }

    /// Queues `command` without waiting. `on_complete` runs on the bridge
    /// thread once the command finishes.
    pub fn submit<F>(&self, command: PendingCommand, on_complete: F) -> Result<(), BridgeError>
    where
        F: FnOnce(Result<InvocationOutcome, BridgeError>) + Send + 'static,
    {
        let name = command.name.clone();
        let request = BridgeRequest::Invoke {
            command,
            reply: Box::new(on_complete),
        };

        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_request)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped.is_power_of_two() {
                    tracing::warn!(
                        "bridge queue full (cap={}); dropped {dropped} command(s), latest {name}",
                        self.queue_capacity
                    );
                }
                Err(BridgeError::QueueFull(self.queue_capacity))
            }
            Err(TrySendError::Disconnected(_request)) => {
                tracing::error!("failed to queue bridge command: {name}");
                Err(BridgeError::WorkerStopped)
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct BridgeWorker {
    handle: BridgeHandle,
    thread: JoinHandle<()>,
}

impl BridgeWorker {
    /// Starts the bridge thread, opens its session and imports the command
    /// module. Returns once the import has finished; an import failure is
    /// returned here and the thread exits.
    pub fn spawn(
        descriptor_path: PathBuf,
        host: HostServices,
        queue_capacity: usize,
    ) -> Result<Self, BridgeError> {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::sync_channel(queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel();
        let dispatcher = Arc::clone(&host.dispatcher);

        let thread = thread::Builder::new()
            .name("scriptui-bridge".to_string())
            .spawn(move || {
                let opened = ScriptSession::open(host).and_then(|mut session| {
                    session.initialize(&descriptor_path)?;
                    Ok(session)
                });

                match opened {
                    Ok(mut session) => {
                        let _ = ready_tx.send(Ok(()));
                        serve(&mut session, rx);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|err| BridgeError::Engine(format!("failed to spawn bridge thread: {err}")))?;

        ready_rx.recv().map_err(|_| BridgeError::WorkerStopped)??;

        Ok(Self {
            handle: BridgeHandle {
                tx,
                dispatcher,
                queue_capacity,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            thread,
        })
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Asks the worker to stop after the commands already queued.
    ///
    /// Never blocks: a full queue or a stopped worker is logged and the
    /// worker is left to exit once every handle is dropped.
    pub fn shutdown(self) {
        match self.handle.tx.try_send(BridgeRequest::Shutdown) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "bridge queue full (cap={}) during shutdown; worker stops when handles drop",
                    self.handle.queue_capacity
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("bridge worker already stopped");
            }
        }
        drop(self.handle);

        if self.thread.is_finished() {
            if let Err(err) = self.thread.join() {
                tracing::error!("bridge thread join failed: {err:?}");
            }
        } else {
            // A command may still be waiting on the UI thread that is tearing down.
            tracing::warn!("bridge thread still active during shutdown; skipping join");
        }
    }

    /// Stops the worker and waits for it to exit.
    pub fn join(self) -> thread::Result<()> {
        let _ = self.handle.tx.send(BridgeRequest::Shutdown);
        drop(self.handle);
        self.thread.join()
    }
}

fn serve(session: &mut ScriptSession, rx: Receiver<BridgeRequest>) {
    for request in rx {
        match request {
            BridgeRequest::Invoke { command, reply } => reply(session.invoke_command(command)),
            BridgeRequest::Shutdown => break,
        }
    }

    tracing::debug!("bridge worker stopped");
}
