//! Mirrors the worked example from the original C source: a strand that
//! yields successive squares, driven from a loop that resumes until the
//! strand is no longer alive.

use strand::{free, resume, Strand};

fn main() {
    env_logger::init();

    let mut s = Some(
        Strand::new(|strand, _first| {
            let mut n: usize = 1;
            while n < 10 {
                let _ = strand.yield_now(n * n);
                n += 1;
            }
            n * n
        })
        .expect("strand creation failed"),
    );

    while strand::alive(s.as_ref()) {
        let val = resume(s.as_ref().unwrap(), 0);
        println!("val: {val}");
    }

    free(&mut s);
}
