//! Process-wide default creation parameters.
//!
//! The only state shared across threads is the packed `(stack_size, flags)`
//! word below; everything else a strand touches is thread-local (see
//! [`crate::runtime`]).

use std::sync::atomic::{AtomicU64, Ordering};

/// Smallest stack a strand may be created with.
pub const STACK_MIN: u32 = 16 * 1024;
/// Largest stack a strand may be created with.
pub const STACK_MAX: u32 = 1024 * STACK_MIN;
/// Stack size used by [`crate::configure`] until overridden.
pub const STACK_DEFAULT: u32 = 8 * STACK_MIN;

bitflags::bitflags! {
    /// Bits packed into a [`Strand`](crate::Strand)'s `flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Enable verbose diagnostics and extra defensive checks.
        const DEBUG = 1 << 0;
        /// Install a no-access guard page at the stack's growth extreme.
        const PROTECT = 1 << 1;
        /// Capture a backtrace at creation time.
        const CAPTURE = 1 << 2;
        /// Internal marker: body was supplied as a heap closure, not a bare `fn`.
        const CLOSURE = 1 << 3;
    }
}

/// Creation parameters: stack size in bytes and the [`Flags`] bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub stack_size: u32,
    pub flags: Flags,
}

impl Config {
    /// Clamps `stack_size` into `[STACK_MIN, STACK_MAX]` and masks the
    /// reserved high bit out of `flags`, exactly as the original `config_make`.
    pub fn new(stack_size: u32, flags: Flags) -> Config {
        let stack_size = stack_size.clamp(STACK_MIN, STACK_MAX);
        let flags = Flags::from_bits_truncate(flags.bits() & 0x7fff_ffff);
        Config { stack_size, flags }
    }

    fn pack(self) -> u64 {
        (u64::from(self.stack_size) << 32) | u64::from(self.flags.bits())
    }

    fn unpack(word: u64) -> Config {
        let stack_size = (word >> 32) as u32;
        let flags = Flags::from_bits_truncate(word as u32);
        Config { stack_size, flags }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new(STACK_DEFAULT, Flags::empty())
    }
}

static CONFIG: AtomicU64 = AtomicU64::new(0);

fn initial() -> u64 {
    Config::new(STACK_DEFAULT, Flags::empty()).pack()
}

/// Publishes new default creation parameters.
///
/// Readers observe either the previous value or this one, never a torn mix
/// of the two halves: the pair is packed into a single word and updated with
/// a compare-and-swap loop, so strands already created are unaffected and
/// only strands created after this call see the new defaults.
pub fn configure(stack_size: u32, flags: Flags) {
    let next = Config::new(stack_size, flags).pack();
    let mut cur = CONFIG.load(Ordering::Relaxed);
    loop {
        match CONFIG.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => {
                log::debug!(
                    "configure: stack_size={} flags={:?}",
                    (next >> 32) as u32,
                    Flags::from_bits_truncate(next as u32)
                );
                return;
            }
            Err(observed) => cur = observed,
        }
    }
}

/// Reads the current default creation parameters with a single aligned load.
pub fn current() -> Config {
    let word = CONFIG.load(Ordering::Acquire);
    if word == 0 {
        // Never configured: the packed zero word is indistinguishable from
        // "not yet initialized", so fall back to the documented defaults.
        return Config::unpack(initial());
    }
    Config::unpack(word)
}
