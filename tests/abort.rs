//! Scenario 5: resuming a dead strand is a programmer error and aborts the
//! process. An abort cannot be caught in-process, so this spawns the test
//! binary itself and asserts the child died by signal with a diagnostic
//! mentioning the dead strand.

use std::process::Command;

use strand::{resume, Strand};

const CHILD_ENV: &str = "STRAND_ABORT_TEST_CHILD";

#[test]
fn resuming_a_dead_strand_aborts_the_process() {
    if std::env::var_os(CHILD_ENV).is_some() {
        let _ = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Error)
            .try_init();

        let s = Strand::new(|_strand, val| val).unwrap();
        assert_eq!(resume(&s, 0), 0);
        assert!(!s.alive());
        resume(&s, 0);
        unreachable!("resume of a dead strand should have aborted the process");
    }

    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args(["--exact", "resuming_a_dead_strand_aborts_the_process", "--nocapture"])
        .env(CHILD_ENV, "1")
        .output()
        .expect("failed to spawn child test process");

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert!(
            output.status.signal().is_some(),
            "expected the child to be killed by a signal, got status {:?}",
            output.status
        );
    }
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    assert!(
        stderr.contains("dead"),
        "expected the abort diagnostic to mention the dead strand, got: {stderr}"
    );
}
