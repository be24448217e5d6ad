//! Symmetric stackful coroutines for a single OS thread.
//!
//! A [`Strand`] is a coroutine: it owns its own call stack, can be
//! [`resume`]d from a parent context and can [`Strand::yield_now`] back to
//! whichever context most recently resumed it, exchanging one machine word
//! on each transfer. Strands are thread-confined -- a [`Strand`] handle is
//! `!Send`/`!Sync` -- and every allocation a thread makes (its stack
//! mappings, its dead-list, its defer-node pool) lives entirely in that
//! thread's own state; the only thing shared across threads is the packed
//! default-configuration word published by [`configure`].
//!
//! ```
//! use strand::{resume, Strand};
//!
//! // A strand that counts up from whatever the first resume passes in,
//! // yielding once per step and echoing the running total back out.
//! let s = Strand::new(|strand, start| {
//!     let mut total = start;
//!     loop {
//!         total = strand.yield_now(total) + total;
//!     }
//! })
//! .unwrap();
//!
//! assert_eq!(resume(&s, 1), 1);
//! assert_eq!(resume(&s, 1), 2);
//! assert_eq!(resume(&s, 2), 4);
//! ```
//!
//! See the crate's `demos/fib.rs` for a runnable generator example and
//! `tests/` for the fibonacci, defer, reuse, configure and illegal-resume
//! scenarios this crate is tested against.

mod config;
mod defer;
mod detail;
mod error;
mod reg_context;
mod runtime;
mod stack;
mod strand;

pub use config::{configure, current, Config, Flags, STACK_DEFAULT, STACK_MAX, STACK_MIN};
pub use error::Error;
pub use runtime::{resume, yield_ as yield_now};
pub use strand::{alive, free, print, Strand};
