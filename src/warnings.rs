//! Non-fatal diagnostics.
//!
//! Conversions and deserialization report recoverable problems (lossy
//! conversions, skipped textures, truncated names) through a
//! [`WarningSink`].  The engine implements it on top of a stack of
//! [`WarningManager`]s; with none installed, warnings go to `log::warn!`.

use std::cell::RefCell;
use std::rc::Rc;

/// Receives warnings routed by the engine.
pub trait WarningManager {
    fn on_warning(&mut self, message: &str);
}

/// Anything that accepts warnings while work is in progress.
pub trait WarningSink {
    /// A condition that changed or dropped data.
    fn warn(&self, message: String);

    /// An informational condition with no data loss.
    fn notice(&self, message: String) {
        self.warn(message)
    }
}

/// Standalone sink that forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWarnings;

impl WarningSink for LogWarnings {
    fn warn(&self, message: String) {
        log::warn!("{message}");
    }

    fn notice(&self, message: String) {
        log::info!("{message}");
    }
}

/// Collects warnings into a shared list.  Clones share the same list, so
/// one clone can be installed on an engine while another is read back.
#[derive(Debug, Clone, Default)]
pub struct WarningCollector {
    messages: Rc<RefCell<Vec<String>>>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|m| m.contains(needle))
    }
}

impl WarningManager for WarningCollector {
    fn on_warning(&mut self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

impl WarningSink for WarningCollector {
    fn warn(&self, message: String) {
        self.messages.borrow_mut().push(message);
    }
}
