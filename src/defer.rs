//! LIFO list of scope-exit actions, with a thread-local node pool so the
//! steady-state cost of registering a defer is a pointer swap rather than
//! an allocation.

use std::cell::RefCell;

struct DeferNode {
    next: Option<Box<DeferNode>>,
    thunk: Option<Box<dyn FnOnce() + 'static>>,
}

/// A LIFO chain of deferred actions. Each [`crate::Strand`] owns one; the
/// runtime also keeps a free-standing one for actions registered outside
/// any strand (see [`crate::runtime`]).
#[derive(Default)]
pub struct DeferList {
    head: Option<Box<DeferNode>>,
}

thread_local! {
    /// Recycled node shells, keyed only by the fact that they're empty
    /// `DeferNode` boxes; their `thunk` is always `None` between uses.
    static POOL: RefCell<Vec<Box<DeferNode>>> = const { RefCell::new(Vec::new()) };
}

impl DeferList {
    pub const fn new() -> DeferList {
        DeferList { head: None }
    }

    /// Chains `thunk` at the head of the list, reusing a pooled node shell
    /// when one is available.
    pub fn push(&mut self, thunk: impl FnOnce() + 'static) {
        let mut node = POOL.with(|pool| pool.borrow_mut().pop()).unwrap_or_else(|| {
            Box::new(DeferNode {
                next: None,
                thunk: None,
            })
        });
        node.thunk = Some(Box::new(thunk));
        node.next = self.head.take();
        self.head = Some(node);
    }

    /// `true` if no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Detaches the whole list and runs it front-to-back, i.e. in reverse
    /// registration order. Each executed node's shell is returned to the
    /// pool. A thunk that itself calls [`DeferList::push`] on some *other*
    /// list (its own strand's, mid-run) is unaffected -- only `self`'s head
    /// is drained here.
    pub fn run(&mut self) {
        let mut node = self.head.take();
        while let Some(mut n) = node {
            let next = n.next.take();
            if let Some(thunk) = n.thunk.take() {
                thunk();
            }
            POOL.with(|pool| pool.borrow_mut().push(n));
            node = next;
        }
    }
}

impl Drop for DeferList {
    fn drop(&mut self) {
        // A strand's defer list is always drained explicitly before the
        // strand is retired (see `strand::free`); this only fires for
        // lists abandoned without that call, e.g. on a panic unwind.
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn runs_in_lifo_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut list = DeferList::new();
        for i in 0..3 {
            let order = order.clone();
            list.push(move || order.borrow_mut().push(i));
        }
        list.run();
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn empty_after_run() {
        let mut list = DeferList::new();
        list.push(|| {});
        assert!(!list.is_empty());
        list.run();
        assert!(list.is_empty());
    }

    #[test]
    fn defers_added_during_run_do_not_rerun_in_same_pass() {
        let count = Rc::new(Cell::new(0));
        let mut list = DeferList::new();
        let mut other = DeferList::new();

        let other_ptr: *mut DeferList = &mut other;
        let count_clone = count.clone();
        list.push(move || {
            count_clone.set(count_clone.get() + 1);
            // simulate a defer registered on a *different* list mid-run
            unsafe { (*other_ptr).push(|| {}) };
        });

        list.run();
        assert_eq!(count.get(), 1);
        assert!(list.is_empty());
        assert!(!other.is_empty());
    }
}
