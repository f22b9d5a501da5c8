//! End-to-end executor scenarios against a real interpreter.
//!
//! Each test skips itself when `python3` is not on PATH.

use forge_sandbox::prelude::*;
use std::time::{Duration, Instant};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::new())
}

#[tokio::test]
async fn test_print_ok_succeeds() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let outcome = sandbox().execute("print(\"ok\")", &limits).await;

    assert_eq!(outcome.exit_code(), Some(0));
    assert_eq!(outcome.stdout().trim(), "ok");
    assert!(outcome.failure().is_none());
}

#[tokio::test]
async fn test_unmatched_parenthesis_is_syntax_failure() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let outcome = sandbox().execute("print(\"Test\"", &limits).await;

    assert_ne!(outcome.exit_code(), Some(0));
    let failure = outcome.failure().expect("syntax error must be classified");
    assert_eq!(failure.category, FailureCategory::Runtime);
    assert_eq!(failure.label(), "SyntaxError");
    assert!(failure.diagnostic.contains("SyntaxError"));
}

#[tokio::test]
async fn test_sleep_forever_times_out_and_child_is_gone() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits =
        SandboxLimits::new(Duration::from_secs(1), 256).with_poll_interval(Duration::from_millis(100));
    let started = Instant::now();
    let outcome = sandbox()
        .execute("import time\nwhile True:\n    time.sleep(1)\n", &limits)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.category(), Some(FailureCategory::Timeout));
    assert!(outcome.failure().unwrap().diagnostic.starts_with("TimeoutError"));
    // timeout + poll interval, plus generous scheduling slack for CI.
    assert!(elapsed < Duration::from_millis(1_100 + 900), "took {elapsed:?}");

    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let pid = outcome.pid().expect("child was spawned");
        let alive = kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok();
        assert!(!alive, "child {pid} still running after timeout");
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_hog_is_terminated() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits =
        SandboxLimits::new(Duration::from_secs(10), 64).with_poll_interval(Duration::from_millis(50));
    let code = "import time\nblob = bytearray(400 * 1024 * 1024)\nfor i in range(0, len(blob), 4096):\n    blob[i] = 1\ntime.sleep(30)\n";
    let outcome = sandbox().execute(code, &limits).await;

    assert_eq!(outcome.category(), Some(FailureCategory::MemoryExceeded));
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.label(), "MemoryError");
    // The sampled size varies between runs; the diagnostic must not.
    assert_eq!(failure.diagnostic, "MemoryError: exceeded memory ceiling 64 MB");
}

/// Tenet: the same failing code yields byte-identical stderr on every run.
#[tokio::test]
async fn test_identical_failures_have_identical_stderr() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let code = "def add(a, b):\n    return ad\n\nadd(1, 2)\n";
    let first = sandbox().execute(code, &limits).await;
    let second = sandbox().execute(code, &limits).await;

    assert_eq!(first.failure().unwrap().label(), "NameError");
    assert_eq!(first.stderr(), second.stderr());
    assert_eq!(first.failure(), second.failure());
    assert!(!first.stderr().contains("forge-exec-"), "{}", first.stderr());
    assert!(first.stderr().contains("File \"candidate.py\""), "{}", first.stderr());
}

/// Tenet: concurrent executions leave the process umask as they found it.
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_restore_umask() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let before = forge_sandbox::umask::current();
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let sandbox = sandbox();
    let code = "import time\ntime.sleep(0.3)\nprint('done')\n";

    let (a, b, c) = tokio::join!(
        sandbox.execute(code, &limits),
        sandbox.execute(code, &limits),
        sandbox.execute(code, &limits),
    );
    for outcome in [&a, &b, &c] {
        assert!(outcome.is_success(), "{:?}", outcome.failure());
    }
    assert_eq!(forge_sandbox::umask::current(), before);
}

/// Tenet: background processes started by a candidate die when it exits.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_background_children_are_killed_on_normal_exit() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let code = "import subprocess\np = subprocess.Popen(['sleep', '30'])\nprint(p.pid, flush=True)\n";
    let outcome = sandbox().execute(code, &limits).await;
    assert!(outcome.is_success(), "{:?}", outcome.failure());
    let orphan: u32 = outcome.stdout().trim().parse().unwrap();

    // Gone, or a zombie waiting on a non-reaping init.
    let running = || match std::fs::read_to_string(format!("/proc/{orphan}/stat")) {
        Ok(stat) => stat
            .rsplit(") ")
            .next()
            .and_then(|rest| rest.chars().next())
            .is_some_and(|state| !matches!(state, 'Z' | 'X')),
        Err(_) => false,
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while running() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!running(), "background child {orphan} survived the candidate");
}

#[tokio::test]
async fn test_invalid_utf8_is_replaced_not_raised() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let code = "import sys\nsys.stdout.buffer.write(b'ok\\xff\\xfe\\n')\n";
    let outcome = sandbox().execute(code, &limits).await;

    assert!(outcome.is_success());
    assert!(outcome.stdout().starts_with("ok"));
    assert!(outcome.stdout().contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_scoped_directory_is_removed() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(SandboxConfig::new().with_work_root(root.path()));
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);

    let outcome = sandbox
        .execute("import os\nprint(os.getcwd())\nopen('scratch.txt', 'w').write('x')\n", &limits)
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.failure());
    assert!(outcome.stdout().contains("forge-exec-"));

    let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "scoped dir not cleaned: {leftovers:?}");
}

#[tokio::test]
async fn test_runtime_exception_keeps_stdout() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let limits = SandboxLimits::new(Duration::from_secs(5), 256);
    let outcome = sandbox()
        .execute("print('before')\nundefined_name()\n", &limits)
        .await;

    assert_eq!(outcome.stdout().trim(), "before");
    assert_eq!(outcome.exit_code(), Some(1));
    assert_eq!(outcome.failure().unwrap().label(), "NameError");
}

#[tokio::test]
async fn test_outcome_serializes_for_reporting() {
    let outcome = ExecutionOutcome::setup_failure("boom", Duration::from_millis(3));
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["failure"]["category"], "executor_setup");
    assert_eq!(json["elapsed"], 3);
}
