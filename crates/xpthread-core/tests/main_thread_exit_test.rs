//! Exit and cancellation on the main thread end the process with status 0,
//! and only after every created context has terminated.
//!
//! Runs without the libtest harness so that `main` is the process's main
//! thread. Each scenario re-executes this binary and checks its exit status
//! and the marker its worker writes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use xpthread_core::pthread::{
    ThreadAttr, create, detach, exit, request_cancel, self_handle, test_cancel,
};

const SCENARIO_ENV: &str = "XPTHREAD_MAIN_EXIT_SCENARIO";
const MARKER_ENV: &str = "XPTHREAD_MAIN_EXIT_MARKER";
const SCENARIOS: [&str; 3] = ["exit", "exit-detached", "cancel"];

fn spawn_slow_worker(marker: PathBuf, detached: bool) {
    let h = create(&ThreadAttr::default(), move || {
        std::thread::sleep(Duration::from_millis(300));
        fs::write(&marker, "worker_done").expect("write marker");
        0
    })
    .expect("create worker");
    if detached {
        detach(h).expect("detach worker");
    }
}

fn run_scenario(name: &str, marker: PathBuf) -> ! {
    match name {
        "exit" => {
            spawn_slow_worker(marker, false);
            exit(0)
        }
        "exit-detached" => {
            spawn_slow_worker(marker, true);
            exit(0)
        }
        "cancel" => {
            spawn_slow_worker(marker, false);
            request_cancel(self_handle()).expect("cancel main");
            test_cancel();
            panic!("checkpoint returned on a cancelled main thread")
        }
        other => panic!("unknown scenario {other}"),
    }
}

fn check_scenario(exe: &Path, dir: &Path, scenario: &str) {
    let marker = dir.join(format!("{scenario}.marker"));
    let _ = fs::remove_file(&marker);

    let output = Command::new(exe)
        .env(SCENARIO_ENV, scenario)
        .env(MARKER_ENV, &marker)
        .output()
        .expect("run scenario");

    assert!(
        output.status.success(),
        "scenario {scenario}: status={:?}\nstderr={}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        fs::read_to_string(&marker).unwrap_or_default(),
        "worker_done",
        "scenario {scenario}: process ended before its worker"
    );
}

fn main() {
    if let Ok(name) = std::env::var(SCENARIO_ENV) {
        let marker = std::env::var_os(MARKER_ENV).expect("marker path");
        run_scenario(&name, PathBuf::from(marker));
    }

    let exe = std::env::current_exe().expect("current exe");
    let dir = std::env::temp_dir().join(format!("xpthread-main-exit-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create scratch dir");

    for scenario in SCENARIOS {
        check_scenario(&exe, &dir, scenario);
        println!("test main_thread_exit::{scenario} ... ok");
    }
    let _ = fs::remove_dir_all(&dir);
}
