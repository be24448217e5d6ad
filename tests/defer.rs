//! Scenario 2: defers run in LIFO order, exactly once, before the strand
//! that registered them is observed to be dead.

use std::cell::Cell;
use std::rc::Rc;

use strand::{free, resume, Strand};

#[test]
fn defers_run_once_before_death_is_observable() {
    let n = Rc::new(Cell::new(0));

    let mut s = {
        let n = n.clone();
        Some(
            Strand::new(move |strand, val| {
                for _ in 0..3 {
                    let n = n.clone();
                    strand.defer(move || n.set(n.get() + 1));
                }
                val
            })
            .unwrap(),
        )
    };

    let strand = s.as_ref().unwrap();
    assert_eq!(resume(strand, 7), 7);
    assert!(!strand.alive());
    assert_eq!(n.get(), 3);

    free(&mut s);
    assert!(s.is_none());
}

#[test]
fn defers_execute_in_reverse_registration_order() {
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    let s = {
        let order = order.clone();
        Strand::new(move |strand, val| {
            for i in 0..3 {
                let order = order.clone();
                strand.defer(move || order.borrow_mut().push(i));
            }
            val
        })
        .unwrap()
    };

    resume(&s, 0);
    assert_eq!(*order.borrow(), vec![2, 1, 0]);
}
