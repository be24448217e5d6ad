//! Thread-local roots and the resume/yield/free orchestration.
//!
//! Every other module in this crate is free of thread-local state; it all
//! lives here. Each OS thread gets its own implicit "top" context (which is
//! `Current` whenever no coroutine is running), a `current` pointer tracking
//! whichever strand actually holds the machine context right now, and a
//! single-slot dead list threaded through retired strands' own `parent`
//! fields -- exactly the structure [`crate::strand::StrandInner`] already
//! carries, so recycling costs nothing beyond a pointer swap.

use std::cell::Cell;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crate::config::Flags;
use crate::reg_context::ArchContext;
use crate::stack::StackMap;
use crate::strand::{Body, Strand, StrandInner, State};

thread_local! {
    /// Register file belonging to the implicit thread-root strand. Never
    /// initialized by `ctx_init`: it is only ever a *save* target, filled in
    /// the first time this thread resumes away from it.
    static TOP_CTX: Cell<ArchContext> = Cell::new(ArchContext::root());

    /// The top context's own state slot. Conceptually `Current` whenever no
    /// coroutine is running on this thread, `Active` while a child is.
    static TOP_STATE: Cell<State> = Cell::new(State::Current);

    /// `None` means the thread-root is the one holding the machine context;
    /// `Some` points at whichever strand does.
    static CURRENT: Cell<Option<NonNull<StrandInner>>> = const { Cell::new(None) };

    /// Head of the thread-local freelist of retired strands, threaded
    /// through their own `parent` field. See `take_dead_head`/`retire`.
    static DEAD_HEAD: Cell<Option<NonNull<StrandInner>>> = const { Cell::new(None) };
}

fn current_ptr() -> Option<NonNull<StrandInner>> {
    CURRENT.with(Cell::get)
}

fn peer_ctx(peer: Option<NonNull<StrandInner>>) -> *mut ArchContext {
    match peer {
        Some(p) => unsafe { ptr::addr_of_mut!((*p.as_ptr()).ctx) },
        None => TOP_CTX.with(|c| c.as_ptr()),
    }
}

fn peer_state(peer: Option<NonNull<StrandInner>>) -> State {
    match peer {
        Some(p) => unsafe { p.as_ref().state.get() },
        None => TOP_STATE.with(Cell::get),
    }
}

fn peer_set_state(peer: Option<NonNull<StrandInner>>, state: State) {
    match peer {
        Some(p) => unsafe { p.as_ref().state.set(state) },
        None => TOP_STATE.with(|c| c.set(state)),
    }
}

/// `true` if `inner` is the strand currently holding the machine context.
pub(crate) fn is_current(inner: NonNull<StrandInner>) -> bool {
    current_ptr() == Some(inner)
}

/// Pops the dead-list head, returning its mapping for reuse. Never looks
/// past the head, so creation stays O(1); see [`crate::stack::recycle`].
pub(crate) fn take_dead_head() -> Option<StackMap> {
    DEAD_HEAD.with(|cell| {
        let head = cell.get()?;
        let head_ref = unsafe { head.as_ref() };
        cell.set(head_ref.parent.get());
        Some(StackMap {
            base: head_ref.map_base,
            size: head_ref.map_size,
            protected: head_ref.flags.contains(Flags::PROTECT),
        })
    })
}

/// Emits a fatal-precondition diagnostic and aborts the process. Never
/// returns; matches the original `fprintf(stderr, ...); abort();` shape but
/// routed through `log` so an embedding application can redirect it.
fn fatal(strand: Option<&StrandInner>, reason: &str) -> ! {
    match strand {
        Some(s) => {
            log::error!("{reason}: {s}");
            if let Some(bt) = &s.backtrace {
                log::error!("capture-time backtrace:\n{bt}");
            }
        }
        None => log::error!("{reason}"),
    }
    std::process::abort();
}

fn fatal_resume(sp: NonNull<StrandInner>, state: State) -> ! {
    let s = unsafe { sp.as_ref() };
    let reason = match state {
        State::Dead => "cannot resume a dead strand",
        State::Current => "cannot resume the currently running strand",
        State::Active => "cannot resume an already-active strand (would cycle the parent chain)",
        State::Suspended => unreachable!("fatal_resume called on a resumable strand"),
    };
    fatal(Some(s), reason)
}

fn fatal_yield_outside() -> ! {
    fatal(None, "yield called outside any strand")
}

fn fatal_free(sp: NonNull<StrandInner>, state: State) -> ! {
    let s = unsafe { sp.as_ref() };
    let reason = match state {
        State::Current => "cannot free the currently running strand",
        State::Active => "cannot free an active strand (awaiting a child's yield)",
        State::Suspended | State::Dead => unreachable!("fatal_free called on a retireable strand"),
    };
    fatal(Some(s), reason)
}

/// Transfers control to `s`, which must be [`State::Suspended`]. Returns the
/// value `s` next yields, or its terminal return value if it runs to
/// completion without another yield.
pub fn resume(s: &Strand, val: usize) -> usize {
    let sp = s.inner;
    let state = unsafe { sp.as_ref().state.get() };
    if state != State::Suspended {
        fatal_resume(sp, state);
    }

    let parent = current_ptr();
    debug_assert_eq!(
        peer_state(parent),
        State::Current,
        "resume called from a context that is not itself Current"
    );
    let s_ref = unsafe { sp.as_ref() };
    s_ref.parent.set(parent);
    s_ref.value.set(val);
    s_ref.state.set(State::Current);
    peer_set_state(parent, State::Active);
    CURRENT.with(|c| c.set(Some(sp)));

    let save = peer_ctx(parent);
    let load = unsafe { ptr::addr_of!((*sp.as_ptr()).ctx) };
    unsafe { ArchContext::swap(&mut *save, &*load) };

    unsafe { sp.as_ref().value.get() }
}

/// Transfers control from the currently running strand back to whichever
/// strand (or the thread-root) most recently resumed it. Returns the value
/// passed to the matching [`resume`]. Aborts if called with no strand
/// current.
pub fn yield_(val: usize) -> usize {
    let sp = match current_ptr() {
        Some(sp) => sp,
        None => fatal_yield_outside(),
    };
    let s_ref = unsafe { sp.as_ref() };
    let parent = s_ref.parent.get();

    s_ref.parent.set(None);
    s_ref.value.set(val);
    s_ref.state.set(State::Suspended);
    peer_set_state(parent, State::Current);
    CURRENT.with(|c| c.set(parent));

    let save = unsafe { ptr::addr_of_mut!((*sp.as_ptr()).ctx) };
    let load = peer_ctx(parent);
    unsafe { ArchContext::swap(&mut *save, &*load) };

    s_ref.value.get()
}

/// The machine-context entry point for every freshly created strand. Seen
/// only by the architecture swap primitive; never called from ordinary Rust
/// control flow. Runs the user body, then performs the terminal transition
/// back to the resumer described in §4.5: parent restored to `Current`,
/// `self` marked `Dead`, defers drained while this strand's own stack is
/// still live, then a final one-way swap.
pub(crate) unsafe extern "C" fn trampoline(self_addr: usize, body_addr: usize) -> ! {
    let sp = NonNull::new_unchecked(self_addr as *mut StrandInner);
    let s_ref = sp.as_ref();

    let body = Box::from_raw(body_addr as *mut Body);
    s_ref.body.set(None);
    let value = s_ref.value.get();
    let handle = ManuallyDrop::new(Strand::from_inner(sp));
    let ret = body(&handle, value);

    let parent = s_ref.parent.get();
    s_ref.parent.set(None);
    s_ref.value.set(ret);
    s_ref.state.set(State::Dead);
    peer_set_state(parent, State::Current);
    CURRENT.with(|c| c.set(parent));

    (*sp.as_ptr()).defer.run();

    let save = ptr::addr_of_mut!((*sp.as_ptr()).ctx);
    let load = peer_ctx(parent);
    ArchContext::swap(&mut *save, &*load);
    unreachable!("a dead strand's context was swapped back into");
}

/// Retires `sp`: verifies it is neither `Current` nor `Active`, drains any
/// remaining defer, reclaims its captured backtrace and (if never run) its
/// boxed body, then pushes it onto the dead list by threading the current
/// head through `sp.parent`.
pub(crate) fn retire(sp: NonNull<StrandInner>) {
    let s_ref = unsafe { sp.as_ref() };
    let state = s_ref.state.get();
    if matches!(state, State::Current | State::Active) {
        fatal_free(sp, state);
    }

    unsafe { (*sp.as_ptr()).defer.run() };

    unsafe {
        let raw = sp.as_ptr();
        if let Some(body_ptr) = (*raw).body.take() {
            drop(Box::from_raw(body_ptr));
        }
        ptr::drop_in_place(ptr::addr_of_mut!((*raw).backtrace));
    }

    DEAD_HEAD.with(|cell| {
        s_ref.parent.set(cell.get());
        cell.set(Some(sp));
    });
    log::debug!("retired strand at {:p}", sp.as_ptr());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strand::Strand;

    #[test]
    fn resume_yield_roundtrip_carries_the_word() {
        let s = Strand::new(|strand, v| {
            let back = strand.yield_now(v + 1);
            back + 100
        })
        .unwrap();

        assert_eq!(resume(&s, 41), 42);
        assert_eq!(resume(&s, 1), 101);
        assert!(!s.alive());
    }

    #[test]
    fn nested_resume_unwinds_one_link_per_yield() {
        let inner = Strand::new(|strand, v| strand.yield_now(v * 2)).unwrap();
        let outer = Strand::new(move |strand, v| {
            let doubled = resume(&inner, v);
            strand.yield_now(doubled)
        })
        .unwrap();

        assert_eq!(resume(&outer, 5), 10);
    }
}
