//! Change dispatcher: the two-phase "mark, then fire" protocol.
//!
//! A refresh of one cache list only **marks** the handlers it is relevant
//! to; a later, separate **fire** sweep invokes each marked handler exactly
//! once and clears the mark. This is what gives `process_event` its
//! fire-at-most-once-per-pump guarantee even when a single pump drains
//! several messages of the same class.

use crate::netlink::error::{Error, Result};
use crate::team::cache::{OptionList, PortList};

/// Caller-supplied identity of a registered change handler.
///
/// Unlike an auto-generated token, this is supplied by the caller (mirroring
/// the C API's use of the handler struct's own address as its identity),
/// which is what makes duplicate registration detectable and `-EEXIST`
/// meaningful.
pub type HandlerId = u64;

/// The class of change a handler wants to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Port,
    Option,
    All,
}

impl ChangeType {
    fn matches(self, refreshed: ChangeType) -> bool {
        self == ChangeType::All || self == refreshed
    }
}

type Callback = Box<dyn FnMut(&PortList, &OptionList, ChangeType)>;

struct Registration {
    class: ChangeType,
    callback: Callback,
    pending: bool,
}

/// Registry of change handlers and the mark/fire bookkeeping for them.
#[derive(Default)]
pub struct Dispatcher {
    registrations: Vec<(HandlerId, Registration)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handler. Fails with `HandlerExists` if `id` is
    /// already registered.
    pub fn register(
        &mut self,
        id: HandlerId,
        class: ChangeType,
        callback: Callback,
    ) -> Result<()> {
        if self.registrations.iter().any(|(existing, _)| *existing == id) {
            return Err(Error::HandlerExists);
        }
        self.registrations.push((
            id,
            Registration {
                class,
                callback,
                pending: false,
            },
        ));
        Ok(())
    }

    /// Unregister a handler. A no-op if `id` is not registered.
    pub fn unregister(&mut self, id: HandlerId) {
        self.registrations.retain(|(existing, _)| *existing != id);
    }

    /// Mark every handler whose class matches `refreshed` as pending.
    pub fn mark(&mut self, refreshed: ChangeType) {
        for (_, reg) in &mut self.registrations {
            if reg.class.matches(refreshed) {
                reg.pending = true;
            }
        }
    }

    /// Fire every pending handler whose class matches `refreshed`, in
    /// registration order, clearing its pending flag as it fires.
    ///
    /// `refreshed == All` fires every pending handler regardless of its own
    /// class. `mark` only ever narrows (does this handler want class C);
    /// `fire(All, ...)` is the opposite direction, used by `process_event`'s
    /// "fire sweep with class ALL" so a Port/Option handler left pending by
    /// an earlier refresh still gets invoked.
    pub fn fire(&mut self, refreshed: ChangeType, ports: &PortList, options: &OptionList) {
        for (_, reg) in &mut self.registrations {
            if reg.pending && (refreshed == ChangeType::All || reg.class.matches(refreshed)) {
                (reg.callback)(ports, options, reg.class);
                reg.pending = false;
            }
        }
    }

    /// Number of currently registered handlers (used by tests and `free`).
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Drop all registrations, releasing every callback closure.
    ///
    /// The reference C implementation's `team_free` never frees its
    /// `change_handler_list`; this crate frees it explicitly on teardown.
    pub fn clear(&mut self) {
        self.registrations.clear();
    }
}
