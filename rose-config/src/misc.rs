use std::time::Duration;

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transactions {
    #[knuffel(child)]
    pub off: bool,
    #[knuffel(child, unwrap(argument), default = DEFAULT_TRANSACTION_TIMEOUT_MS)]
    pub timeout_ms: u32,
    #[knuffel(child, unwrap(argument), default = DEFAULT_FATAL_TIMEOUT_MS)]
    pub fatal_timeout_ms: u32,
}

/// Long enough for a client to redraw at a new size, short enough to not feel laggy.
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u32 = 300;
pub const DEFAULT_FATAL_TIMEOUT_MS: u32 = 1000;

impl Default for Transactions {
    fn default() -> Self {
        Self {
            off: false,
            timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            fatal_timeout_ms: DEFAULT_FATAL_TIMEOUT_MS,
        }
    }
}

impl Transactions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }

    pub fn fatal_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.fatal_timeout_ms))
    }
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Damage {
    #[knuffel(child, unwrap(argument), default = DEFAULT_MAX_BUFFER_AGE)]
    pub max_buffer_age: u8,
    #[knuffel(child)]
    pub disable: bool,
}

pub const DEFAULT_MAX_BUFFER_AGE: u8 = 3;

impl Default for Damage {
    fn default() -> Self {
        Self {
            max_buffer_age: DEFAULT_MAX_BUFFER_AGE,
            disable: false,
        }
    }
}

impl Damage {
    /// Number of slots in an output's damage ring.
    pub fn ring_len(&self) -> usize {
        usize::from(self.max_buffer_age) + 1
    }
}
