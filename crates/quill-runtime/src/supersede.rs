//! One in-flight request per action kind.

use std::collections::HashMap;

use parking_lot::Mutex;
use quill_protocol::ActionKind;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle for one admitted request.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub kind: ActionKind,
    generation: u64,
    token: CancellationToken,
}

impl Ticket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct SupersedeGate {
    slots: Mutex<HashMap<ActionKind, Slot>>,
    next_generation: Mutex<u64>,
}

impl SupersedeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a request of `kind`, cancelling whichever one it replaces.
    pub fn begin(&self, kind: ActionKind) -> Ticket {
        let generation = {
            let mut next = self.next_generation.lock();
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        let previous = self.slots.lock().insert(
            kind,
            Slot {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(%kind, superseded = previous.generation, generation, "superseding request");
            previous.token.cancel();
        }
        Ticket {
            kind,
            generation,
            token,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.slots
            .lock()
            .get(&ticket.kind)
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Release the slot if `ticket` still owns it.
    pub fn finish(&self, ticket: &Ticket) {
        let mut slots = self.slots.lock();
        if slots
            .get(&ticket.kind)
            .is_some_and(|slot| slot.generation == ticket.generation)
        {
            slots.remove(&ticket.kind);
        }
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_cancels_older_of_same_kind() {
        let gate = SupersedeGate::new();
        let first = gate.begin(ActionKind::Completion);
        let refactor = gate.begin(ActionKind::Refactor);
        let second = gate.begin(ActionKind::Completion);

        assert!(first.token().is_cancelled());
        assert!(!gate.is_current(&first));
        assert!(gate.is_current(&second));
        assert!(!refactor.token().is_cancelled());

        gate.finish(&first);
        assert!(gate.is_current(&second));
        gate.finish(&second);
        assert!(!gate.is_current(&second));
    }

    #[test]
    fn cancel_all_releases_every_slot() {
        let gate = SupersedeGate::new();
        let completion = gate.begin(ActionKind::Completion);
        let diagnosis = gate.begin(ActionKind::Diagnosis);
        gate.cancel_all();
        assert!(completion.token().is_cancelled());
        assert!(diagnosis.token().is_cancelled());
        assert!(!gate.is_current(&completion));
    }
}
