//! Per-message-type callback registration tables (SPEC_FULL.md §9: "Callback
//! registration tables").
//!
//! The source holds per-message-type lists of handlers and walks them
//! serially, isolating one handler's failure from the rest. Modeled here as
//! a mapping from message-type code to a list of callable objects; embedders
//! register through the role engine's `on_*` methods (e.g.
//! `HubEngine::on_device_joined`), which thread through to a `msg_type` key
//! here so one table serves every named callback a role exposes.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::error;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A registration table keyed by SHDC message-type code. `E` is the typed
/// event payload delivered to every handler registered for that code.
pub struct CallbackTable<E> {
    handlers: RwLock<HashMap<u8, Vec<Handler<E>>>>,
}

impl<E> CallbackTable<E> {
    pub fn new() -> Self {
        Self { handlers: RwLock::new(HashMap::new()) }
    }

    /// Register a handler for `msg_type`. Multiple handlers may be
    /// registered for the same type; all run on dispatch.
    pub fn register(&self, msg_type: u8, handler: impl Fn(&E) + Send + Sync + 'static) {
        self.handlers
            .write()
            .expect("callback table lock poisoned")
            .entry(msg_type)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Walk every handler registered for `msg_type` serially. A handler that
    /// panics is caught and logged; it does not stop the remaining handlers
    /// from running (spec's "individual error isolation").
    pub fn dispatch(&self, msg_type: u8, event: &E) {
        let handlers = {
            let table = self.handlers.read().expect("callback table lock poisoned");
            match table.get(&msg_type) {
                Some(hs) => hs.clone(),
                None => return,
            }
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(msg_type = format!("0x{msg_type:02X}"), "callback panicked — isolated, continuing");
            }
        }
    }
}

impl<E> Default for CallbackTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_runs_every_handler_for_the_type() {
        let table: CallbackTable<u32> = CallbackTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();
        table.register(0x01, move |_| { c1.fetch_add(1, Ordering::SeqCst); });
        table.register(0x01, move |_| { c2.fetch_add(1, Ordering::SeqCst); });
        table.dispatch(0x01, &7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispatch_is_scoped_to_message_type() {
        let table: CallbackTable<u32> = CallbackTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        table.register(0x01, move |_| { c1.fetch_add(1, Ordering::SeqCst); });
        table.dispatch(0x02, &7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_panicking_handler_does_not_block_the_rest() {
        let table: CallbackTable<u32> = CallbackTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        table.register(0x01, |_| panic!("boom"));
        table.register(0x01, move |_| { c1.fetch_add(1, Ordering::SeqCst); });
        table.dispatch(0x01, &7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
