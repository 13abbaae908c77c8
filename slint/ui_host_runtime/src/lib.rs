pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod module;
pub mod session;
pub mod shell;

use crate::bridge::{BridgeHandle, BridgeWorker};
use crate::config::RuntimeConfig;
use crate::dispatch::{EventLoopDispatcher, UiDispatcher};
use crate::session::{HostServices, InvocationOutcome, PendingCommand};
use slint::ComponentHandle;
use std::sync::Arc;

pub use crate::dispatch::{UiThread, run_on_ui_thread};
pub use crate::error::{BridgeError, CommandExecutionError};
pub use crate::logging::init_tracing;
pub use crate::session::{Parameters, ScriptSession, SessionState};
pub use crate::shell::{OpenWindows, UiShell, WindowRequest};

/// Command the main window's "create window" action runs.
pub const CREATE_WINDOW_COMMAND: &str = "New-ScriptUiWindow";

pub trait HostBindings: 'static {
    type Ui: ComponentHandle + 'static;
    type Shell: UiShell;

    fn new_ui() -> Result<Self::Ui, slint::PlatformError>;

    fn new_shell() -> Self::Shell;

    fn bind_create_window<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(String, String) + 'static;

    fn set_status(ui: &Self::Ui, status: &str);
}

pub fn run<B: HostBindings>() -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::from_env();
    let ui = B::new_ui()?;

    let dispatcher: Arc<dyn UiDispatcher> = Arc::new(EventLoopDispatcher::for_current_thread());
    let host = HostServices {
        dispatcher,
        shell: Arc::new(B::new_shell()),
    };

    let descriptor_path = config.module_descriptor_path();
    tracing::info!(module = %descriptor_path.display(), "starting script bridge");
    let worker = BridgeWorker::spawn(descriptor_path, host, config.queue_capacity)?;

    install_callbacks::<B>(&ui, worker.handle());

    ui.run()?;

    // Drop UI first so callback closures release their bridge handles.
    drop(ui);
    worker.shutdown();

    Ok(())
}

fn install_callbacks<B: HostBindings>(ui: &B::Ui, bridge: BridgeHandle) {
    let ui_weak = ui.as_weak();
    B::bind_create_window(ui, move |title, message| {
        let command = PendingCommand::new(CREATE_WINDOW_COMMAND)
            .parameter("Title", title)
            .parameter("Message", message);

        let status_ui = ui_weak.clone();
        let submitted = bridge.submit(command, move |result| {
            let status = describe_outcome(CREATE_WINDOW_COMMAND, &result);
            let _ = status_ui.upgrade_in_event_loop(move |ui| B::set_status(&ui, &status));
        });

        if let Err(err) = submitted {
            tracing::error!("failed to submit {CREATE_WINDOW_COMMAND}: {err}");
            if let Some(ui) = ui_weak.upgrade() {
                B::set_status(&ui, &err.to_string());
            }
        }
    });
}

/// Status line text for a finished command. Logs failures as a side effect.
fn describe_outcome(command: &str, result: &Result<InvocationOutcome, BridgeError>) -> String {
    match result {
        Ok(outcome) if !outcome.had_errors => format!("{command} completed"),
        Ok(outcome) => {
            for error in &outcome.errors {
                tracing::warn!(command, "script error: {error}");
            }
            match outcome.errors.first() {
                Some(error) => format!("{command} failed: {error}"),
                None => format!("{command} reported errors"),
            }
        }
        Err(err) => {
            tracing::error!(command, "bridge error: {err}");
            format!("{command} failed: {err}")
        }
    }
}

/// Generates the host `main`, the Slint bindings and a window-per-request
/// shell from the generated main and message window components.
#[macro_export]
macro_rules! host_main {
    ($window:ty, $message_window:ty) => {
        struct ScriptUiHostBindings;

        struct ScriptUiShell;

        std::thread_local! {
            static OPEN_WINDOWS: std::cell::RefCell<$crate::OpenWindows<$message_window>> =
                const { std::cell::RefCell::new($crate::OpenWindows::new()) };
        }

        fn release_closed_windows() {
            use slint::ComponentHandle;

            let closed = OPEN_WINDOWS.with(|windows| {
                windows
                    .borrow_mut()
                    .prune(|window| window.window().is_visible())
            });
            if closed > 0 {
                tracing::debug!(closed, "released closed windows");
            }
        }

        impl $crate::UiShell for ScriptUiShell {
            fn create_window(
                &self,
                _ui: &$crate::UiThread,
                request: &$crate::WindowRequest,
            ) -> Result<(), String> {
                use slint::ComponentHandle;

                release_closed_windows();

                let window = <$message_window>::new().map_err(|err| err.to_string())?;
                window.set_window_title(request.title.as_str().into());
                window.set_message(request.message.as_str().into());
                window.window().on_close_requested(|| {
                    // Release after the window has been hidden.
                    let _ = slint::invoke_from_event_loop(release_closed_windows);
                    slint::CloseRequestResponse::HideWindow
                });
                window.show().map_err(|err| err.to_string())?;
                OPEN_WINDOWS.with(|windows| windows.borrow_mut().push(window));
                Ok(())
            }
        }

        impl $crate::HostBindings for ScriptUiHostBindings {
            type Ui = $window;
            type Shell = ScriptUiShell;

            fn new_ui() -> Result<Self::Ui, slint::PlatformError> {
                <Self::Ui>::new()
            }

            fn new_shell() -> Self::Shell {
                ScriptUiShell
            }

            fn bind_create_window<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(String, String) + 'static,
            {
                ui.on_create_window(move |title, message| {
                    handler(title.to_string(), message.to_string());
                });
            }

            fn set_status(ui: &Self::Ui, status: &str) {
                ui.set_status(status.into());
            }
        }

        fn main() {
            $crate::init_tracing();

            if let Err(err) = $crate::run::<ScriptUiHostBindings>() {
                tracing::error!("scriptui host fatal error: {err}");
                std::process::exit(1);
            }
        }
    };
}
