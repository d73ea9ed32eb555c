// src/command/stream.rs - Shared priority admission queue
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Command, CommandAction, PriorityClass, monotonic_ms};

/// Snapshot of the command most recently handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub id: String,
    pub action: CommandAction,
    pub dequeued_at: u64,
}

/// Heap entry keyed by `(class, sequence)`; the heap pops the smallest key.
#[derive(Debug)]
struct Pending {
    class: PriorityClass,
    sequence: u64,
    command: Command,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.sequence == other.sequence
    }
}
impl Eq for Pending {}
impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        (other.class, other.sequence).cmp(&(self.class, self.sequence))
    }
}

#[derive(Debug, Default)]
struct StreamInner {
    queue: BinaryHeap<Pending>,
    next_sequence: u64,
    current: Option<InFlight>,
}

/// Multi-producer, single-consumer command queue.
///
/// Every handle shares one lock. `enqueue`, `get_next` and `clear` each run
/// entirely under it, so an emergency clear-then-admit can never interleave
/// with another producer's enqueue.
#[derive(Debug, Clone, Default)]
pub struct CommandStream {
    inner: Arc<Mutex<StreamInner>>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a command. Emergency-class commands first discard everything
    /// pending; the in-flight command is not affected.
    pub fn enqueue(&self, command: Command) {
        let class = command.priority_class();
        let mut inner = self.inner.lock();
        if class.is_emergency() {
            let discarded = inner.queue.len();
            inner.queue.clear();
            tracing::warn!(
                "Emergency command '{}' admitted, discarded {} pending command(s)",
                command.id,
                discarded
            );
        } else {
            tracing::debug!(
                "Enqueued {} '{}' (class {})",
                command.action,
                command.id,
                class.value()
            );
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.queue.push(Pending {
            class,
            sequence,
            command,
        });
    }

    /// Remove and return the most urgent pending command, oldest first within
    /// a class. Never blocks.
    pub fn get_next(&self) -> Option<Command> {
        let mut inner = self.inner.lock();
        let pending = inner.queue.pop()?;
        inner.current = Some(InFlight {
            id: pending.command.id.clone(),
            action: pending.command.action,
            dequeued_at: monotonic_ms(),
        });
        Some(pending.command)
    }

    /// Mark the in-flight command as handled.
    pub fn finish_current(&self) {
        self.inner.lock().current = None;
    }

    pub fn current(&self) -> Option<InFlight> {
        self.inner.lock().current.clone()
    }

    /// Discard all pending commands, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.queue.len();
        inner.queue.clear();
        if discarded > 0 {
            tracing::info!("Cleared {} pending command(s)", discarded);
        }
        discarded
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
