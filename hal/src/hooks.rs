//! # Peripheral Hooks
//!
//! Direction-specific enable toggles on the peripheral side of a channel
//! (e.g. the FPGA's TX/RX datapath enable bits). The engine treats them as
//! opaque callbacks and fires the one matching a channel's direction exactly
//! once, right after that channel's first hardware submission is issued.

use std::fmt;

use iqdma_core::Direction;

/// Enable callback; receives the channel slot
pub type EnableHook = Box<dyn Fn(usize) + Send + Sync>;

/// Pair of enable callbacks keyed by direction
#[derive(Default)]
pub struct PeripheralHooks {
    send: Option<EnableHook>,
    receive: Option<EnableHook>,
}

impl PeripheralHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the send-direction hook
    pub fn with_send(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.send = Some(Box::new(hook));
        self
    }

    /// Set the receive-direction hook
    pub fn with_receive(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.receive = Some(Box::new(hook));
        self
    }

    /// Invoke the hook for `direction`, if any
    pub fn fire(&self, direction: Direction, slot: usize) {
        let hook = match direction {
            Direction::Send => self.send.as_ref(),
            Direction::Receive => self.receive.as_ref(),
        };
        if let Some(hook) = hook {
            log::trace!("Hooks: enable {} for slot {}", direction, slot);
            hook(slot);
        }
    }
}

impl fmt::Debug for PeripheralHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralHooks")
            .field("send", &self.send.is_some())
            .field("receive", &self.receive.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fire_by_direction() {
        let tx = Arc::new(AtomicUsize::new(0));
        let rx = Arc::new(AtomicUsize::new(0));
        let (tx2, rx2) = (tx.clone(), rx.clone());
        let hooks = PeripheralHooks::new()
            .with_send(move |slot| {
                tx2.fetch_add(slot + 1, Ordering::SeqCst);
            })
            .with_receive(move |slot| {
                rx2.fetch_add(slot + 1, Ordering::SeqCst);
            });

        hooks.fire(Direction::Send, 2);
        assert_eq!(tx.load(Ordering::SeqCst), 3);
        assert_eq!(rx.load(Ordering::SeqCst), 0);

        hooks.fire(Direction::Receive, 0);
        assert_eq!(rx.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_hook_is_noop() {
        PeripheralHooks::new().fire(Direction::Send, 0);
    }
}
