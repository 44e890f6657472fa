//! End-to-end supervision scenarios against real child processes
//!
//! `waitpid(-1)` reaps any child of the test process, so every test that
//! forks holds `FORK_LOCK` for its whole duration.

use daemond::reaper::{self, Exit, Outcome, Reaped};
use daemond::scanner::Scanner;
use daemond::spawn::{Spawner, EXEC_FAILURE, PRE_EXEC_FAILURE};
use daemond::{Config, Layout, Registry, Service, Supervisor};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

static FORK_LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

const LONG_RUNNING: &str = "#!/bin/sh\nexec sleep 30\n";

fn install(path: &Path, script: &str) {
    fs::write(path, script).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn setup() -> (tempfile::TempDir, Layout) {
    let root = tempfile::tempdir().unwrap();
    let layout = Layout::new(root.path());
    fs::create_dir_all(layout.source_dir()).unwrap();
    (root, layout)
}

fn quick_config(layout: &Layout) -> Config {
    Config {
        timeout: Some(Duration::from_millis(20)),
        successor: Vec::new(),
        layout: layout.clone(),
    }
}

/// Reap repeatedly until `want` matches one of the reaped children
fn reap_until(
    registry: &mut Registry,
    spawner: &Spawner,
    want: impl Fn(&Reaped) -> bool,
) -> Reaped {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(hit) = reaper::reap(registry, spawner).into_iter().find(|r| want(r)) {
            return hit;
        }
        assert!(Instant::now() < deadline, "child never reaped");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Iterate the supervisor until `want` matches a reaped child
fn run_until(supervisor: &mut Supervisor, want: impl Fn(&Reaped) -> bool) -> Reaped {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(hit) = supervisor.run_once().reaped.into_iter().find(|r| want(r)) {
            return hit;
        }
        assert!(Instant::now() < deadline, "child never reaped");
    }
}

/// Remove every executable and kill the services so nothing outlives the test
fn teardown(layout: &Layout, registry: &mut Registry, spawner: &Spawner) {
    for name in registry.names().iter().map(|s| s.to_string()).collect::<Vec<_>>() {
        let _ = fs::remove_file(layout.canonical_executable(&name));
        let _ = fs::remove_file(layout.override_executable(&name));
    }
    while !registry.is_empty() {
        for service in registry.iter() {
            if let Some(pid) = service.pid() {
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
        reap_until(registry, spawner, |r| matches!(r.outcome, Outcome::Removed { .. }));
    }
}

fn pid_of(supervisor: &Supervisor, name: &str) -> Pid {
    supervisor.registry().get(name).and_then(Service::pid).unwrap()
}

#[test]
fn test_scan_registers_and_starts_service() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("web"), LONG_RUNNING);

    let spawner = Spawner::new(layout.clone());
    let mut registry = Registry::new();
    let report = Scanner::new().scan(&mut registry, &spawner);

    assert_eq!(report.added, vec!["web".to_string()]);
    assert_eq!(registry.len(), 1);
    let pid = registry.get("web").and_then(Service::pid).unwrap();
    assert!(pid.as_raw() > 0);
    assert_eq!(fs::read_to_string(layout.pidfile("web")).unwrap(), format!("{pid}\n"));
    assert!(fs::metadata(layout.fifo("web")).unwrap().file_type().is_fifo());

    teardown(&layout, &mut registry, &spawner);
}

#[test]
fn test_rescan_without_changes_does_not_list_again() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("web"), LONG_RUNNING);

    let spawner = Spawner::new(layout.clone());
    let mut registry = Registry::new();
    let mut scanner = Scanner::new();

    assert!(scanner.scan(&mut registry, &spawner).listed);
    let again = scanner.scan(&mut registry, &spawner);
    assert!(!again.listed);
    assert!(again.added.is_empty());
    assert_eq!(registry.names(), vec!["web"]);

    thread::sleep(Duration::from_millis(20));
    install(&layout.canonical_executable("db"), LONG_RUNNING);
    let third = scanner.scan(&mut registry, &spawner);
    assert!(third.listed);
    assert_eq!(third.added, vec!["db".to_string()]);
    assert_eq!(registry.names(), vec!["web", "db"]);

    teardown(&layout, &mut registry, &spawner);
}

#[test]
fn test_exiting_service_is_respawned() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("flaky"), "#!/bin/sh\nexit 3\n");

    let spawner = Spawner::new(layout.clone());
    let mut registry = Registry::new();
    Scanner::new().scan(&mut registry, &spawner);
    let first = registry.get("flaky").and_then(Service::pid).unwrap();

    let reaped = reap_until(&mut registry, &spawner, |r| r.pid == first);
    assert_eq!(reaped.exit, Exit::Code(3));
    let Outcome::Respawned { service, pid } = reaped.outcome else {
        panic!("expected respawn, got {:?}", reaped.outcome);
    };
    assert_eq!(service, "flaky");
    assert_ne!(pid, first);
    assert_eq!(registry.get("flaky").and_then(Service::pid), Some(pid));
    assert!(layout.service_dir("flaky").is_dir());

    teardown(&layout, &mut registry, &spawner);
}

#[test]
fn test_override_runs_in_service_directory() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("web"), LONG_RUNNING);
    fs::create_dir_all(layout.service_dir("web")).unwrap();
    install(
        &layout.override_executable("web"),
        "#!/bin/sh\necho override > marker\nexec sleep 30\n",
    );

    let spawner = Spawner::new(layout.clone());
    let mut registry = Registry::new();
    Scanner::new().scan(&mut registry, &spawner);

    let marker = layout.service_dir("web").join("marker");
    let deadline = Instant::now() + Duration::from_secs(10);
    while fs::read_to_string(&marker).map_or(true, |s| s.is_empty()) {
        assert!(Instant::now() < deadline, "override never ran");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(fs::read_to_string(&marker).unwrap(), "override\n");

    teardown(&layout, &mut registry, &spawner);
}

#[test]
fn test_kill_request_on_fifo_signals_service() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("web"), LONG_RUNNING);

    let mut supervisor = Supervisor::new(quick_config(&layout));
    let iteration = supervisor.run_once();
    assert_eq!(iteration.scan.added, vec!["web".to_string()]);
    let victim = pid_of(&supervisor, "web");

    let mut fifo = fs::OpenOptions::new().write(true).open(layout.fifo("web")).unwrap();
    fifo.write_all(b"KILL\n").unwrap();

    let reaped = run_until(&mut supervisor, |r| r.pid == victim);
    assert_eq!(reaped.exit, Exit::Signal(Signal::SIGKILL as i32));
    assert!(matches!(reaped.outcome, Outcome::Respawned { .. }));
    assert_ne!(pid_of(&supervisor, "web"), victim);

    fs::remove_file(layout.canonical_executable("web")).unwrap();
    let current = pid_of(&supervisor, "web");
    fifo.write_all(b"term\n").unwrap();
    let reaped = run_until(&mut supervisor, |r| r.pid == current);
    assert_eq!(reaped.exit, Exit::Signal(Signal::SIGTERM as i32));
}

#[test]
#[cfg(target_os = "linux")]
fn test_realtime_signal_death_is_respawned() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("web"), LONG_RUNNING);

    let mut supervisor = Supervisor::new(quick_config(&layout));
    supervisor.run_once();
    let victim = pid_of(&supervisor, "web");

    // Realtime signals have no name in the table, so ask by number
    let rtmin = libc::SIGRTMIN();
    let mut fifo = fs::OpenOptions::new().write(true).open(layout.fifo("web")).unwrap();
    fifo.write_all(format!("{rtmin}\n").as_bytes()).unwrap();

    let reaped = run_until(&mut supervisor, |r| r.pid == victim);
    assert_eq!(reaped.exit, Exit::Signal(rtmin));
    assert!(matches!(reaped.outcome, Outcome::Respawned { .. }));
    assert_ne!(pid_of(&supervisor, "web"), victim);

    fs::remove_file(layout.canonical_executable("web")).unwrap();
    let current = pid_of(&supervisor, "web");
    fifo.write_all(b"KILL\n").unwrap();
    let reaped = run_until(&mut supervisor, |r| r.pid == current);
    assert!(matches!(reaped.outcome, Outcome::Removed { .. }));
}

#[test]
fn test_queued_requests_are_each_delivered() {
    let _guard = serialize();
    let (_root, layout) = setup();
    // Counts SIGUSR1 deliveries, exits on SIGTERM with the count
    install(
        &layout.canonical_executable("counter"),
        "#!/bin/sh\nn=0\ntrap 'n=$((n+1))' USR1\ntrap 'exit $n' TERM\nwhile :; do sleep 0.01; done\n",
    );

    let mut supervisor = Supervisor::new(quick_config(&layout));
    supervisor.run_once();
    let pid = pid_of(&supervisor, "counter");
    // Give the shell time to install its traps
    thread::sleep(Duration::from_millis(300));

    fs::remove_file(layout.canonical_executable("counter")).unwrap();
    let mut fifo = fs::OpenOptions::new().write(true).open(layout.fifo("counter")).unwrap();
    fifo.write_all(b"USR1\n").unwrap();
    supervisor.run_once();
    thread::sleep(Duration::from_millis(100));
    fifo.write_all(format!("{}\n", Signal::SIGUSR1 as i32).as_bytes()).unwrap();
    supervisor.run_once();
    thread::sleep(Duration::from_millis(100));
    fifo.write_all(b"bogus\nTERM\n").unwrap();

    let reaped = run_until(&mut supervisor, |r| r.pid == pid);
    assert_eq!(reaped.exit, Exit::Code(2));
    assert!(matches!(reaped.outcome, Outcome::Removed { .. }));
}

#[test]
fn test_vanished_executable_removes_service() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("job"), LONG_RUNNING);

    let mut supervisor = Supervisor::new(quick_config(&layout));
    supervisor.run_once();
    let pid = pid_of(&supervisor, "job");

    fs::remove_file(layout.canonical_executable("job")).unwrap();
    kill(pid, Signal::SIGTERM).unwrap();

    let reaped = run_until(&mut supervisor, |r| r.pid == pid);
    assert_eq!(reaped.outcome, Outcome::Removed { service: "job".to_string() });
    assert!(supervisor.registry().is_empty());
    assert!(!layout.service_dir("job").exists());
    assert!(!layout.fifo("job").exists());
    assert!(!layout.pidfile("job").exists());
}

#[test]
fn test_unowned_child_is_reaped_as_orphan() {
    let _guard = serialize();
    let (_root, layout) = setup();
    let spawner = Spawner::new(layout);
    let mut registry = Registry::new();

    let child = std::process::Command::new("/bin/sh").args(["-c", "exit 7"]).spawn().unwrap();
    let pid = Pid::from_raw(child.id() as i32);

    let reaped = reap_until(&mut registry, &spawner, |r| r.pid == pid);
    assert_eq!(reaped.exit, Exit::Code(7));
    assert_eq!(reaped.outcome, Outcome::Orphan);
}

#[test]
fn test_pre_exec_failure_exits_with_reserved_status() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("homeless"), LONG_RUNNING);

    let spawner = Spawner::new(layout.clone());
    let mut service = Service::create(&layout, "homeless").unwrap();
    // Without its directory the child cannot chdir
    fs::remove_dir_all(layout.service_dir("homeless")).unwrap();
    let pid = spawner.spawn(&mut service).unwrap();

    let mut registry = Registry::new();
    fs::remove_file(layout.canonical_executable("homeless")).unwrap();
    let reaped = reap_until(&mut registry, &spawner, |r| r.pid == pid);
    assert_eq!(reaped.exit, Exit::Code(PRE_EXEC_FAILURE));
}

#[test]
fn test_exec_failure_exits_with_reserved_status() {
    let _guard = serialize();
    let (_root, layout) = setup();
    install(&layout.canonical_executable("garbage"), "\x7fnot really an executable");

    let spawner = Spawner::new(layout.clone());
    let mut registry = Registry::new();
    Scanner::new().scan(&mut registry, &spawner);
    let pid = registry.get("garbage").and_then(Service::pid).unwrap();

    fs::remove_file(layout.canonical_executable("garbage")).unwrap();
    let reaped = reap_until(&mut registry, &spawner, |r| r.pid == pid);
    assert_eq!(reaped.exit, Exit::Code(EXEC_FAILURE));
    assert!(matches!(reaped.outcome, Outcome::Removed { .. }));
    assert!(registry.is_empty());
}
