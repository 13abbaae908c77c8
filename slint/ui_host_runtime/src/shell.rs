use crate::dispatch::UiThread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub title: String,
    pub message: String,
}

/// Toolkit side of the bridge. Implementations build real windows and keep
/// them alive; they are only ever called with a [`UiThread`] token.
pub trait UiShell: Send + Sync + 'static {
    /// Builds a window showing `request.message` centered and activates it.
    fn create_window(&self, ui: &UiThread, request: &WindowRequest) -> Result<(), String>;
}

/// Windows a shell keeps alive after showing them. Closed windows are
/// released by [`OpenWindows::prune`].
#[derive(Debug)]
pub struct OpenWindows<W> {
    windows: Vec<W>,
}

impl<W> OpenWindows<W> {
    pub const fn new() -> Self {
        Self {
            windows: Vec::new(),
        }
    }

    pub fn push(&mut self, window: W) {
        self.windows.push(window);
    }

    /// Drops every window `is_open` reports as closed. Returns how many were
    /// released.
    pub fn prune(&mut self, mut is_open: impl FnMut(&W) -> bool) -> usize {
        let before = self.windows.len();
        self.windows.retain(|window| is_open(window));
        before - self.windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl<W> Default for OpenWindows<W> {
    fn default() -> Self {
        Self::new()
    }
}
