use std::sync::atomic::{AtomicU16, Ordering};

use crate::protocol::PacketId;

/// Lock-free source of packet identifiers for one session.
///
/// Ids start at 1, increase by one per allocation and wrap from 65535 back
/// to 1. Zero is never handed out.
#[derive(Debug, Default)]
pub struct PacketIdCounter {
    last: AtomicU16,
}

impl PacketIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments and returns the next identifier.
    pub fn next_id(&self) -> PacketId {
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(advance(last))
            })
            .unwrap_or_else(|last| last);
        advance(prev)
    }

    /// The most recently allocated identifier, or 0 if none yet.
    pub fn last(&self) -> PacketId {
        self.last.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn starting_after(last: PacketId) -> Self {
        Self {
            last: AtomicU16::new(last),
        }
    }
}

fn advance(id: PacketId) -> PacketId {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
