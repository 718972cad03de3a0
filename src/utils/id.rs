use std::sync::atomic::{AtomicU32, Ordering};

/// Source of ids for surfaces, buffers, workspaces and outputs.
///
/// Ids are never 0, so that a zeroed id in logs always means a bug. The counter wraps around
/// after `u32::MAX` ids.
pub struct IdCounter {
    value: AtomicU32,
}

impl IdCounter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(1),
        }
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.value.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
