//! The coroutine object itself: a header co-located with its own stack.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::ptr::NonNull;

use crate::config::{Config, Flags};
use crate::defer::DeferList;
use crate::error::Error;
use crate::reg_context::ArchContext;
use crate::runtime;
use crate::stack::{self, StackMap};

/// Where a strand sits relative to the thread's resume chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Resumable; not on any resume chain.
    Suspended,
    /// Holds the live machine context. Exactly one per thread.
    Current,
    /// On the resume chain above `Current`: has been resumed, is awaiting
    /// its child to yield or return.
    Active,
    /// The user function has returned; the mapping is retained pending
    /// recycling or unmap.
    Dead,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Suspended => "SUSPENDED",
            State::Current => "CURRENT",
            State::Active => "ACTIVE",
            State::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

pub(crate) type Body = Box<dyn FnOnce(&Strand, usize) -> usize>;

/// Header co-located with its own stack at the high end of a [`StackMap`].
/// Never constructed on the ordinary heap: always placed by pointer
/// arithmetic into a freshly mapped or recycled region (see
/// [`StrandInner::place`]).
#[repr(C, align(16))]
pub(crate) struct StrandInner {
    pub ctx: ArchContext,
    pub parent: Cell<Option<NonNull<StrandInner>>>,
    pub value: Cell<usize>,
    pub defer: DeferList,
    pub backtrace: Option<String>,
    pub map_base: *mut u8,
    pub map_size: usize,
    pub state: Cell<State>,
    pub flags: Flags,
    // Taken (`Option::take`) by the trampoline on first entry; never
    // touched again afterwards.
    pub body: Cell<Option<*mut Body>>,
}

/// Bytes required for a `StrandInner`, rounded up to the next 16.
fn strand_size() -> usize {
    let size = mem::size_of::<StrandInner>();
    (size + 15) & !15
}

impl StrandInner {
    /// Builds a strand inside `map`, which must be large enough to hold a
    /// `StrandInner` plus the requested usable stack.
    ///
    /// # Safety
    /// `map` must not be referenced by anything else; its lifetime becomes
    /// the returned `StrandInner`'s.
    unsafe fn place(map: &StackMap, cfg: Config, body: Body) -> NonNull<StrandInner> {
        let addr = map.base as usize + map.size - strand_size();
        debug_assert_eq!(addr % 16, 0);
        let ptr = addr as *mut StrandInner;

        let backtrace = if cfg.flags.contains(Flags::CAPTURE) {
            Some(format!("{:?}", backtrace::Backtrace::new()))
        } else {
            None
        };

        let body_ptr = Box::into_raw(Box::new(body));

        ptr.write(StrandInner {
            ctx: ArchContext::empty(),
            parent: Cell::new(None),
            value: Cell::new(0),
            defer: DeferList::new(),
            backtrace,
            map_base: map.base,
            map_size: map.size,
            state: Cell::new(State::Suspended),
            flags: cfg.flags,
            body: Cell::new(Some(body_ptr)),
        });

        let usable_base = map.base;
        let usable_len = map.size - strand_size();
        (*ptr)
            .ctx
            .init(usable_base, usable_len, runtime::trampoline as usize, addr, body_ptr as usize);

        NonNull::new_unchecked(ptr)
    }

    pub fn stack_used(&self, current: bool) -> usize {
        let usable_len = self.map_size - strand_size();
        self.ctx.stack_used(self.map_base, usable_len, current)
    }
}

impl fmt::Display for StrandInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#<Strand:{:012x} state={}, stack={}>",
            self as *const _ as usize,
            self.state.get(),
            self.stack_used(false),
        )
    }
}

/// A handle to a coroutine. Thread-confined: never `Send` or `Sync`, since
/// its stack and parent link live entirely in this thread's state.
pub struct Strand {
    pub(crate) inner: NonNull<StrandInner>,
}

impl Strand {
    pub(crate) fn from_inner(inner: NonNull<StrandInner>) -> Strand {
        Strand { inner }
    }

    pub(crate) fn inner(&self) -> &StrandInner {
        unsafe { self.inner.as_ref() }
    }

    /// Creates a strand with the process-wide default [`Config`], running
    /// `f(strand, value)` as its body. Returns `None` on resource failure;
    /// see [`Strand::new_checked`] for the cause.
    pub fn new<F>(f: F) -> Option<Strand>
    where
        F: FnOnce(&Strand, usize) -> usize + 'static,
    {
        Strand::new_checked(f).ok()
    }

    /// As [`Strand::new`], returning the [`Error`] on resource failure.
    pub fn new_checked<F>(f: F) -> Result<Strand, Error>
    where
        F: FnOnce(&Strand, usize) -> usize + 'static,
    {
        Strand::new_config_checked(crate::config::current(), f)
    }

    /// Creates a strand with explicit creation parameters.
    pub fn new_config(cfg: Config, f: impl FnOnce(&Strand, usize) -> usize + 'static) -> Option<Strand> {
        Strand::new_config_checked(cfg, f).ok()
    }

    /// As [`Strand::new_config`], returning the [`Error`] on resource failure.
    pub fn new_config_checked(
        cfg: Config,
        f: impl FnOnce(&Strand, usize) -> usize + 'static,
    ) -> Result<Strand, Error> {
        let cfg = Config::new(cfg.stack_size, cfg.flags);
        let protect = cfg.flags.contains(Flags::PROTECT);
        let map_size = stack::map_size_for(cfg.stack_size, protect);

        let recycled = runtime::take_dead_head();
        let map = match stack::recycle(recycled, map_size) {
            Some(mut map) => {
                // A recycled region only already carries a guard page if the
                // strand that last lived there was itself created with
                // `Flags::PROTECT`; a protect-requesting strand reusing an
                // unprotected region must install one now (see §4.4 step 5).
                if protect && !map.protected {
                    if let Err(e) = map.protect_guard() {
                        map.free();
                        return Err(e);
                    }
                }
                map
            }
            None => StackMap::alloc(map_size, protect)?,
        };

        // Every strand in this port is constructed from a closure (the host
        // language's natural stand-in for the original's separate
        // fn-pointer + data-pointer pair), so the internal "allocated via
        // closure shim" marker from §3 is always set here rather than only
        // on a second, convenience constructor.
        let stored_flags = Config::new(cfg.stack_size, cfg.flags | Flags::CLOSURE);
        let body: Body = Box::new(f);
        let inner = unsafe { StrandInner::place(&map, stored_flags, body) };
        log::debug!(
            "created strand at {:p} ({} byte stack, flags={:?})",
            inner.as_ptr(),
            cfg.stack_size,
            cfg.flags
        );
        Ok(Strand::from_inner(inner))
    }

    /// `false` once the strand's body has returned.
    pub fn alive(&self) -> bool {
        self.inner().state.get() != State::Dead
    }

    /// Bytes of stack used as of the strand's last suspension (or right now,
    /// if this handle refers to the strand calling `stack_used` on itself).
    pub fn stack_used(&self) -> usize {
        let current = runtime::is_current(self.inner);
        self.inner().stack_used(current)
    }

    /// Registers `thunk` to run, LIFO, when this strand's body returns.
    pub fn defer(&self, thunk: impl FnOnce() + 'static) {
        unsafe { (*self.inner.as_ptr()).defer.push(thunk) };
    }

    /// Transfers control from this strand (which must be the one currently
    /// running) back to whoever resumed it, returning the value passed to
    /// the next matching [`crate::resume`]. Only meaningful when called
    /// from within the strand's own body.
    pub fn yield_now(&self, val: usize) -> usize {
        debug_assert!(runtime::is_current(self.inner), "yield_now called on a non-current strand");
        runtime::yield_(val)
    }

    /// Boxes `value`, registers a defer that drops it when this strand's
    /// body returns, and hands back a non-owning pointer for use until then.
    /// The counterpart of the original's `malloc_scoped`: the box's lifetime
    /// is the whole strand, not the enclosing block, so ordinary `Drop`
    /// would free it too early. The `Box` stays the sole owner, living only
    /// inside the defer closure; the caller only ever sees a raw pointer
    /// derived from it, never a second `Box` aliasing the same allocation.
    pub fn scoped_alloc<T: 'static>(&self, value: T) -> NonNull<T> {
        let ptr = Box::into_raw(Box::new(value));
        self.defer(move || drop(unsafe { Box::from_raw(ptr) }));
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// As [`Strand::scoped_alloc`], zero-initialized via `T::default()` -
    /// the counterpart of the original's `calloc_scoped`.
    pub fn scoped_calloc<T: Default + 'static>(&self) -> NonNull<T> {
        self.scoped_alloc(T::default())
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Drop for Strand {
    fn drop(&mut self) {
        runtime::retire(self.inner);
    }
}

/// Retires `opt`, nulling it -- a thin wrapper over `Option::take` and
/// `Strand`'s `Drop` impl, kept for parity with the C-shaped `free(&Strand?)`
/// call some callers may expect from the original API.
pub fn free(opt: &mut Option<Strand>) {
    opt.take();
}

/// `false` if `s` is `None` or its strand is [`State::Dead`]. The
/// null-safe counterpart of [`Strand::alive`], matching the C API's
/// `strand_alive(strand_t *)` taking a possibly-null handle.
pub fn alive(s: Option<&Strand>) -> bool {
    s.is_some_and(Strand::alive)
}

/// Prints a diagnostic dump of `s`'s state and register file to `out`, or
/// to stdout if `out` is `None`. Mirrors the C API's optional-handle,
/// optional-sink `strand_print`.
pub fn print(s: Option<&Strand>, out: Option<&mut dyn Write>) {
    let mut stdout;
    let out: &mut dyn Write = match out {
        Some(w) => w,
        None => {
            stdout = io::stdout();
            &mut stdout
        }
    };
    match s {
        Some(s) => {
            let _ = writeln!(out, "{s} {{");
            let _ = s.inner().ctx.dump(out);
            let _ = writeln!(out, "}}");
            if let Some(bt) = &s.inner().backtrace {
                let _ = writeln!(out, "{bt}");
            }
        }
        None => {
            let _ = writeln!(out, "#<Strand:(null)>");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_state() {
        let s = Strand::new(|_s, val| val).unwrap();
        let text = format!("{s}");
        assert!(text.contains("SUSPENDED"));
    }

    #[test]
    fn print_dumps_the_register_file() {
        let s = Strand::new(|_s, val| val).unwrap();
        let mut buf = Vec::new();
        print(Some(&s), Some(&mut buf));
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("SUSPENDED"));
        assert!(text.contains("rsp") || text.contains("sp"));
    }

    #[test]
    fn print_handles_a_null_handle() {
        let mut buf = Vec::new();
        print(None, Some(&mut buf));
        assert_eq!(String::from_utf8(buf).unwrap(), "#<Strand:(null)>\n");
    }
}
