//! The embedded script session.
//!
//! A [`ScriptSession`] owns one QuickJS runtime and context plus a single
//! pending-command slot. It is not `Send`: the thread that opens it is the
//! only one that can run commands, which is what keeps invocations strictly
//! ordered. [`crate::bridge`] puts a session on its own thread for hosts
//! that need to reach it from elsewhere.

use crate::dispatch::{self, UiDispatcher};
use crate::error::{BridgeError, CommandExecutionError};
use crate::module::ModuleDescriptor;
use crate::shell::{UiShell, WindowRequest};
use rquickjs::{Context, Ctx, Exception, Function, Object, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

const HOST_GLOBAL: &str = "host";
const COMMANDS_GLOBAL: &str = "__scriptui_commands";

pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Services the script side reaches through the `host` global.
#[derive(Clone)]
pub struct HostServices {
    pub dispatcher: Arc<dyn UiDispatcher>,
    pub shell: Arc<dyn UiShell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Engine is up, no command module imported yet.
    Opened,
    Ready,
    /// Module import failed; the session never runs commands.
    Broken(String),
    /// UI work escaped the UI thread; the session stops running commands.
    Faulted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub name: String,
    pub parameters: Parameters,
}

impl PendingCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationOutcome {
    pub results: Vec<serde_json::Value>,
    pub had_errors: bool,
    pub errors: Vec<CommandExecutionError>,
}

#[derive(Default)]
struct HostStreams {
    importing: Cell<bool>,
    errors: RefCell<Vec<CommandExecutionError>>,
    violation: RefCell<Option<String>>,
}

enum Execution {
    NotFound,
    Completed(Vec<serde_json::Value>),
    Failed(CommandExecutionError),
}

pub struct ScriptSession {
    context: Context,
    _runtime: Runtime,
    streams: Rc<HostStreams>,
    state: SessionState,
    pending: Option<PendingCommand>,
    commands: Vec<String>,
}

impl ScriptSession {
    pub fn open(host: HostServices) -> Result<Self, BridgeError> {
        let runtime = Runtime::new().map_err(|err| BridgeError::Engine(err.to_string()))?;
        let context = Context::full(&runtime).map_err(|err| BridgeError::Engine(err.to_string()))?;
        let streams = Rc::new(HostStreams::default());

        context
            .with(|ctx| install_host(&ctx, &host, &streams))
            .map_err(|err| BridgeError::Engine(format!("failed to install host bindings: {err}")))?;

        Ok(Self {
            context,
            _runtime: runtime,
            streams,
            state: SessionState::Opened,
            pending: None,
            commands: Vec::new(),
        })
    }

    /// Imports the command module described by `descriptor_path`.
    ///
    /// Allowed once per session. On failure the session is left
    /// [`SessionState::Broken`] and every later invocation fails fast.
    pub fn initialize(&mut self, descriptor_path: &Path) -> Result<(), BridgeError> {
        match &self.state {
            SessionState::Opened => {}
            SessionState::Ready => return Err(BridgeError::AlreadyInitialized),
            SessionState::Broken(reason) | SessionState::Faulted(reason) => {
                return Err(BridgeError::SessionUnavailable(reason.clone()));
            }
        }

        let imported = self.import_module(descriptor_path);
        self.clear_commands();

        match imported {
            Ok(commands) => {
                tracing::info!(
                    module = %descriptor_path.display(),
                    commands = ?commands,
                    "command module imported"
                );
                self.commands = commands;
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                tracing::error!("{err}");
                self.state = SessionState::Broken(err.to_string());
                Err(err)
            }
        }
    }

    pub fn invoke(
        &mut self,
        command: &str,
        parameters: Parameters,
    ) -> Result<InvocationOutcome, BridgeError> {
        self.invoke_command(PendingCommand {
            name: command.to_string(),
            parameters,
        })
    }

    /// Runs `command` synchronously on the calling thread.
    ///
    /// A command that throws or reports errors through `host.writeError`
    /// still returns `Ok` with `had_errors` set. The pending slot is empty
    /// when this returns, whatever the outcome.
    pub fn invoke_command(
        &mut self,
        command: PendingCommand,
    ) -> Result<InvocationOutcome, BridgeError> {
        if let Err(err) = self.ensure_ready() {
            self.clear_commands();
            return Err(err);
        }
        self.pending = Some(command);
        self.run_pending()
    }

    /// Starts a new pending command, replacing any command not yet invoked.
    pub fn add_command(&mut self, name: impl Into<String>) -> &mut Self {
        self.pending = Some(PendingCommand::new(name));
        self
    }

    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<&mut Self, BridgeError> {
        let pending = self.pending.as_mut().ok_or(BridgeError::NoPendingCommand)?;
        pending.parameters.insert(name.into(), value.into());
        Ok(self)
    }

    /// Runs the command built with [`add_command`](Self::add_command).
    pub fn invoke_pending(&mut self) -> Result<InvocationOutcome, BridgeError> {
        if self.pending.is_none() {
            return Err(BridgeError::NoPendingCommand);
        }
        if let Err(err) = self.ensure_ready() {
            self.clear_commands();
            return Err(err);
        }
        self.run_pending()
    }

    pub fn clear_commands(&mut self) {
        self.pending = None;
    }

    pub fn pending_command(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Commands registered by the imported module.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    fn ensure_ready(&self) -> Result<(), BridgeError> {
        match &self.state {
            SessionState::Ready => Ok(()),
            SessionState::Opened => Err(BridgeError::SessionUnavailable(
                "command module has not been imported".to_string(),
            )),
            SessionState::Broken(reason) | SessionState::Faulted(reason) => {
                Err(BridgeError::SessionUnavailable(reason.clone()))
            }
        }
    }

    fn run_pending(&mut self) -> Result<InvocationOutcome, BridgeError> {
        // Taking the command empties the slot before anything can fail.
        let Some(command) = self.pending.take() else {
            return Ok(InvocationOutcome::default());
        };

        let arguments = serde_json::to_string(&command.parameters)
            .map_err(|err| BridgeError::Engine(format!("cannot encode parameters: {err}")))?;

        tracing::debug!(command = %command.name, "invoking script command");
        self.streams.errors.borrow_mut().clear();
        let execution = self
            .context
            .with(|ctx| execute(&ctx, &command.name, &arguments));
        let mut errors = std::mem::take(&mut *self.streams.errors.borrow_mut());

        let violation = self.streams.violation.borrow_mut().take();
        if let Some(operation) = violation {
            let err = BridgeError::CrossThreadViolation(operation);
            tracing::error!(command = %command.name, "{err}; session faulted");
            self.state = SessionState::Faulted(err.to_string());
            return Err(err);
        }

        match execution {
            Execution::NotFound => Err(BridgeError::CommandNotFound(command.name)),
            Execution::Completed(results) => Ok(InvocationOutcome {
                results,
                had_errors: !errors.is_empty(),
                errors,
            }),
            Execution::Failed(error) => {
                tracing::warn!(command = %command.name, "script command failed: {error}");
                errors.push(error);
                Ok(InvocationOutcome {
                    results: Vec::new(),
                    had_errors: true,
                    errors,
                })
            }
        }
    }

    fn import_module(&mut self, descriptor_path: &Path) -> Result<Vec<String>, BridgeError> {
        let descriptor = ModuleDescriptor::load(descriptor_path)?;
        let root = descriptor.root_module_path(descriptor_path);
        let source = fs::read_to_string(&root).map_err(|err| BridgeError::ImportFailure {
            path: descriptor_path.to_path_buf(),
            reason: format!("cannot read root module {}: {err}", root.display()),
        })?;

        self.streams.importing.set(true);
        let imported = self
            .context
            .with(|ctx| register_exports(&ctx, &descriptor, &source));
        self.streams.importing.set(false);
        self.streams.errors.borrow_mut().clear();

        imported.map_err(|reason| BridgeError::ImportFailure {
            path: descriptor_path.to_path_buf(),
            reason,
        })
    }
}

fn install_host(
    ctx: &Ctx<'_>,
    host: &HostServices,
    streams: &Rc<HostStreams>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let registry: Object = ctx.eval("Object.create(null)")?;
    globals.set(COMMANDS_GLOBAL, registry)?;

    let object = Object::new(ctx.clone())?;

    {
        let services = host.clone();
        let streams = Rc::clone(streams);
        let create_window = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, title: String, message: String| -> rquickjs::Result<()> {
                create_window(&ctx, &services, &streams, WindowRequest { title, message })
            },
        )?
        .with_name("createWindow")?;
        object.set("createWindow", create_window)?;
    }

    {
        let streams = Rc::clone(streams);
        let write_error = Function::new(ctx.clone(), move |message: String| {
            streams
                .errors
                .borrow_mut()
                .push(CommandExecutionError::new(message));
        })?
        .with_name("writeError")?;
        object.set("writeError", write_error)?;
    }

    {
        let log = Function::new(ctx.clone(), |message: String| {
            tracing::info!(target: "scriptui::script", "{message}");
        })?
        .with_name("log")?;
        object.set("log", log)?;
    }

    globals.set(HOST_GLOBAL, object)?;
    Ok(())
}

fn create_window(
    ctx: &Ctx<'_>,
    services: &HostServices,
    streams: &HostStreams,
    request: WindowRequest,
) -> rquickjs::Result<()> {
    if streams.importing.get() {
        return Err(Exception::throw_message(
            ctx,
            "UI commands are unavailable while the command module is being imported",
        ));
    }

    tracing::debug!(title = %request.title, "marshaling window creation to the UI thread");
    let shell = Arc::clone(&services.shell);
    let created = dispatch::run_on_ui_thread(&services.dispatcher, move |ui| {
        shell.create_window(ui, &request)
    });

    match created {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(Exception::throw_message(
            ctx,
            &format!("window creation failed: {reason}"),
        )),
        Err(BridgeError::CrossThreadViolation(operation)) => {
            let message = format!("UI object touched off the UI thread during {operation}");
            streams.violation.borrow_mut().get_or_insert(operation);
            Err(Exception::throw_message(ctx, &message))
        }
        Err(err) => Err(Exception::throw_message(ctx, &err.to_string())),
    }
}

fn register_exports(
    ctx: &Ctx<'_>,
    descriptor: &ModuleDescriptor,
    source: &str,
) -> Result<Vec<String>, String> {
    let exports =
        evaluate_module(ctx, source).map_err(|err| describe_engine_error(ctx, err).to_string())?;
    let registry: Object = ctx
        .globals()
        .get(COMMANDS_GLOBAL)
        .map_err(|err| describe_engine_error(ctx, err).to_string())?;

    let mut registered = Vec::new();
    for entry in exports.props::<String, Value>() {
        let (name, value) = entry.map_err(|err| describe_engine_error(ctx, err).to_string())?;
        if !value.is_function() || !descriptor.exports(&name) {
            continue;
        }

        registry
            .set(name.as_str(), value)
            .map_err(|err| describe_engine_error(ctx, err).to_string())?;
        registered.push(name);
    }

    if let Some(missing) = descriptor
        .commands
        .iter()
        .find(|command| !registered.contains(command))
    {
        return Err(format!(
            "module {} does not define exported command {missing}",
            descriptor.name
        ));
    }

    Ok(registered)
}

/// Evaluates a command module with `module`, `exports` and `host` in scope
/// and returns `module.exports`.
fn evaluate_module<'js>(ctx: &Ctx<'js>, source: &str) -> rquickjs::Result<Object<'js>> {
    let factory: Function =
        ctx.eval(format!("(function (module, exports, host) {{\n{source}\n}})"))?;

    let module = Object::new(ctx.clone())?;
    module.set("exports", Object::new(ctx.clone())?)?;
    let exports: Object = module.get("exports")?;
    let host: Value = ctx.globals().get(HOST_GLOBAL)?;

    factory.call::<_, ()>((module.clone(), exports, host))?;
    module.get("exports")
}

fn execute(ctx: &Ctx<'_>, name: &str, arguments: &str) -> Execution {
    let function = match lookup_command(ctx, name) {
        Ok(Some(function)) => function,
        Ok(None) => return Execution::NotFound,
        Err(err) => return Execution::Failed(describe_engine_error(ctx, err)),
    };

    match call_command(ctx, &function, arguments) {
        Ok(results) => Execution::Completed(results),
        Err(err) => Execution::Failed(describe_engine_error(ctx, err)),
    }
}

fn lookup_command<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Option<Function<'js>>> {
    let registry: Object = ctx.globals().get(COMMANDS_GLOBAL)?;
    let value: Value = registry.get(name)?;
    Ok(value.into_function())
}

fn call_command<'js>(
    ctx: &Ctx<'js>,
    function: &Function<'js>,
    arguments: &str,
) -> rquickjs::Result<Vec<serde_json::Value>> {
    let arguments = ctx.json_parse(arguments)?;
    let returned: Value = function.call((arguments,))?;

    if returned.is_undefined() {
        return Ok(Vec::new());
    }

    if let Some(items) = returned.as_array() {
        return items
            .iter::<Value>()
            .map(|item| item.and_then(|item| to_json(ctx, item)))
            .collect();
    }

    Ok(vec![to_json(ctx, returned)?])
}

fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<serde_json::Value> {
    let Some(text) = ctx.json_stringify(value)? else {
        return Ok(serde_json::Value::Null);
    };
    let text = text.to_string()?;
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
}

fn describe_engine_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> CommandExecutionError {
    if !matches!(err, rquickjs::Error::Exception) {
        return CommandExecutionError::new(err.to_string());
    }

    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return CommandExecutionError {
            message: exception
                .message()
                .unwrap_or_else(|| "uncaught exception".to_string()),
            stack: exception.stack().filter(|stack| !stack.is_empty()),
        };
    }

    match thrown.as_string().and_then(|text| text.to_string().ok()) {
        Some(text) => CommandExecutionError::new(text),
        None => CommandExecutionError::new(format!("uncaught exception: {thrown:?}")),
    }
}
