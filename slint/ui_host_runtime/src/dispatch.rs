//! Marshaling work onto the UI thread.
//!
//! UI objects may only be created and touched on the thread that runs the
//! toolkit event loop. Script commands run on the bridge thread, so every
//! piece of UI work goes through [`run_on_ui_thread`], which posts it to the
//! event loop and blocks until it has run.

use crate::error::BridgeError;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, ThreadId};

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

pub trait UiDispatcher: Send + Sync + 'static {
    fn is_ui_thread(&self) -> bool;

    /// Queues `task` on the UI event loop without waiting for it.
    fn post(&self, task: UiTask) -> Result<(), BridgeError>;
}

/// Proof that the current code runs on the UI thread.
///
/// Not `Send`, and only obtainable through [`UiThread::current`], so APIs
/// that take `&UiThread` cannot be reached from another thread.
#[derive(Debug)]
pub struct UiThread {
    _not_send: PhantomData<*const ()>,
}

impl UiThread {
    pub fn current(dispatcher: &dyn UiDispatcher) -> Result<Self, BridgeError> {
        if dispatcher.is_ui_thread() {
            Ok(Self {
                _not_send: PhantomData,
            })
        } else {
            Err(BridgeError::CrossThreadViolation(format!(
                "UI work on thread {:?}",
                thread::current().name().unwrap_or("<unnamed>")
            )))
        }
    }
}

/// Runs `work` on the UI thread and returns its result.
///
/// Called on the UI thread, `work` runs inline. Anywhere else it is posted
/// to the event loop and the caller blocks until it completes.
pub fn run_on_ui_thread<R, F>(dispatcher: &Arc<dyn UiDispatcher>, work: F) -> Result<R, BridgeError>
where
    F: FnOnce(&UiThread) -> R + Send + 'static,
    R: Send + 'static,
{
    if dispatcher.is_ui_thread() {
        let ui = UiThread::current(dispatcher.as_ref())?;
        return Ok(work(&ui));
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let on_ui = Arc::clone(dispatcher);
    dispatcher.post(Box::new(move || {
        let result = UiThread::current(on_ui.as_ref()).map(|ui| work(&ui));
        let _ = tx.send(result);
    }))?;

    rx.recv()
        .map_err(|_| BridgeError::UiUnavailable("UI task dropped before it ran".to_string()))?
}

/// Dispatcher backed by the Slint event loop.
#[derive(Debug, Clone)]
pub struct EventLoopDispatcher {
    ui_thread: ThreadId,
}

impl EventLoopDispatcher {
    /// Must be created on the thread that will run the event loop.
    pub fn for_current_thread() -> Self {
        Self {
            ui_thread: thread::current().id(),
        }
    }
}

impl UiDispatcher for EventLoopDispatcher {
    fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.ui_thread
    }

    fn post(&self, task: UiTask) -> Result<(), BridgeError> {
        slint::invoke_from_event_loop(move || task())
            .map_err(|err| BridgeError::UiUnavailable(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::shell::{UiShell, WindowRequest};
    use std::sync::Mutex;
    use std::thread::JoinHandle;

    /// Stand-in UI thread that runs posted tasks in order.
    pub(crate) struct QueueDispatcher {
        ui_thread: ThreadId,
        tx: Mutex<Option<mpsc::Sender<UiTask>>>,
    }

    impl QueueDispatcher {
        pub(crate) fn spawn() -> (Arc<Self>, JoinHandle<()>) {
            let (tx, rx) = mpsc::channel::<UiTask>();
            let handle = thread::Builder::new()
                .name("test-ui".to_string())
                .spawn(move || {
                    for task in rx {
                        task();
                    }
                })
                .expect("spawn test UI thread");

            let dispatcher = Arc::new(Self {
                ui_thread: handle.thread().id(),
                tx: Mutex::new(Some(tx)),
            });
            (dispatcher, handle)
        }

        pub(crate) fn ui_thread(&self) -> ThreadId {
            self.ui_thread
        }

        /// Stops accepting tasks so the UI thread can exit.
        pub(crate) fn close(&self) {
            self.tx.lock().expect("dispatcher lock").take();
        }
    }

    impl UiDispatcher for QueueDispatcher {
        fn is_ui_thread(&self) -> bool {
            thread::current().id() == self.ui_thread
        }

        fn post(&self, task: UiTask) -> Result<(), BridgeError> {
            let guard = self.tx.lock().expect("dispatcher lock");
            let tx = guard
                .as_ref()
                .ok_or_else(|| BridgeError::UiUnavailable("event loop closed".to_string()))?;
            tx.send(task)
                .map_err(|_| BridgeError::UiUnavailable("event loop closed".to_string()))
        }
    }

    /// Runs posted work inline on the caller's thread, which is never the
    /// UI thread.
    pub(crate) struct InlineDispatcher;

    impl UiDispatcher for InlineDispatcher {
        fn is_ui_thread(&self) -> bool {
            false
        }

        fn post(&self, task: UiTask) -> Result<(), BridgeError> {
            task();
            Ok(())
        }
    }

    /// Accepts tasks and never runs them, like an event loop that has
    /// stopped pumping.
    #[derive(Default)]
    pub(crate) struct StalledDispatcher {
        pub(crate) posted: Mutex<Vec<UiTask>>,
    }

    impl UiDispatcher for StalledDispatcher {
        fn is_ui_thread(&self) -> bool {
            false
        }

        fn post(&self, task: UiTask) -> Result<(), BridgeError> {
            self.posted.lock().expect("dispatcher lock").push(task);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingShell {
        pub(crate) created: Mutex<Vec<(ThreadId, WindowRequest)>>,
    }

    impl UiShell for RecordingShell {
        fn create_window(&self, _ui: &UiThread, request: &WindowRequest) -> Result<(), String> {
            if request.title.is_empty() {
                return Err("window title must not be empty".to_string());
            }
            self.created
                .lock()
                .expect("shell lock")
                .push((thread::current().id(), request.clone()));
            Ok(())
        }
    }
}
