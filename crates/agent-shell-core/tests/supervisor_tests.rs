//! Integration tests for the backend supervisor.
//!
//! Fake backends are small `sh` scripts launched the same way the real
//! interpreter is (`<program> -u <entry>`).

#![cfg(unix)]

use agent_shell_core::platform::is_process_alive;
use agent_shell_core::{
    LaunchPlan, OutputEvent, OutputParser, ShellError, Supervisor, SupervisorEvent,
    SupervisorOptions, SupervisorState,
};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn fast_supervisor() -> Supervisor {
    Supervisor::new(SupervisorOptions {
        grace_period: Duration::from_secs(2),
        kill_wait: Duration::from_secs(2),
    })
}

fn write_backend(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("agent_backend.sh");
    std::fs::write(&path, body).unwrap();
    path
}

fn plan_for(dir: &TempDir, body: &str) -> LaunchPlan {
    LaunchPlan::new("sh", write_backend(dir, body), dir.path())
}

async fn next_event(rx: &mut UnboundedReceiver<SupervisorEvent>) -> SupervisorEvent {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for supervisor event")
        .expect("Event channel closed")
}

/// Concatenate output until `needle` shows up.
async fn wait_for_output(rx: &mut UnboundedReceiver<SupervisorEvent>, needle: &str) -> String {
    let mut output = String::new();
    while !output.contains(needle) {
        match next_event(rx).await {
            SupervisorEvent::Output { text } => output.push_str(&text),
            SupervisorEvent::Exited(report) => {
                panic!("Backend exited before printing {needle:?}: {report:?}")
            }
            _ => {}
        }
    }
    output
}

/// Collect output and events up to and including the exit.
async fn collect_until_exit(
    rx: &mut UnboundedReceiver<SupervisorEvent>,
) -> (String, Vec<SupervisorEvent>) {
    let mut output = String::new();
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        if let SupervisorEvent::Output { text } = &event {
            output.push_str(text);
        }
        let exited = matches!(event, SupervisorEvent::Exited(_));
        events.push(event);
        if exited {
            break;
        }
    }
    // Anything emitted alongside the exit is already queued
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (output, events)
}

async fn wait_until_dead(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !is_process_alive(pid)
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "echo up\nexec sleep 30\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    let pid = supervisor.start(&plan).await.unwrap();
    wait_for_output(&mut events, "up").await;

    let err = supervisor.start(&plan).await.unwrap_err();
    assert!(matches!(err, ShellError::AlreadyRunning { pid: Some(p) } if p == pid));
    assert_eq!(supervisor.pid(), Some(pid));
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert!(is_process_alive(pid));

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_send_only_writes_while_running() {
    let dir = TempDir::new().unwrap();
    let received = dir.path().join("received.txt");
    let plan = plan_for(
        &dir,
        "while IFS= read -r line; do\n  echo \"$line\" >> received.txt\n  echo ack\ndone\n",
    );
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    // Not started yet
    assert!(!supervisor.send("ls").await.unwrap());

    supervisor.start(&plan).await.unwrap();
    assert!(supervisor.send("first").await.unwrap());
    wait_for_output(&mut events, "ack").await;

    supervisor.stop().await.unwrap();
    assert!(!supervisor.send("second").await.unwrap());

    let content = std::fs::read_to_string(&received).unwrap();
    assert_eq!(content, "first\n");
}

#[tokio::test]
async fn test_stop_twice_kills_whole_tree() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "sleep 30 &\necho \"child:$!\"\nwait\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    let pid = supervisor.start(&plan).await.unwrap();
    let output = wait_for_output(&mut events, "\n").await;
    let grandchild: u32 = output
        .trim()
        .strip_prefix("child:")
        .and_then(|pid| pid.parse().ok())
        .expect("grandchild pid");
    assert!(is_process_alive(grandchild));

    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();

    let margin = supervisor.options().grace_period + Duration::from_secs(1);
    assert!(wait_until_dead(pid, margin).await, "backend survived stop");
    assert!(
        wait_until_dead(grandchild, margin).await,
        "grandchild survived stop"
    );
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.pid(), None);
}

#[tokio::test]
async fn test_stop_escalates_when_term_is_ignored() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "trap '' TERM\necho armed\nwhile :; do sleep 1; done\n");
    let supervisor = Supervisor::new(SupervisorOptions {
        grace_period: Duration::from_millis(500),
        kill_wait: Duration::from_secs(2),
    });
    let mut events = supervisor.subscribe();

    let pid = supervisor.start(&plan).await.unwrap();
    wait_for_output(&mut events, "armed").await;

    supervisor.stop().await.unwrap();
    assert!(!is_process_alive(pid));

    let report = loop {
        if let SupervisorEvent::Exited(report) = next_event(&mut events).await {
            break report;
        }
    };
    assert!(report.stop_requested);
    assert_eq!(report.code, None);
    assert_eq!(report.state, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_output_order_is_preserved() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "printf A\nprintf B\nprintf C\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    let pid = supervisor.start(&plan).await.unwrap();
    let (output, events) = collect_until_exit(&mut events).await;

    assert_eq!(output, "ABC");
    assert_eq!(events[0], SupervisorEvent::Started { pid });
}

#[tokio::test]
async fn test_end_of_task_marker_through_relay() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "printf 'result text<END_OF_TASK>'\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let (output, _) = collect_until_exit(&mut events).await;

    let mut parser = OutputParser::default();
    let mut parsed = parser.feed(&output);
    parsed.extend(parser.flush());
    assert_eq!(
        parsed,
        vec![
            OutputEvent::Text("result text".into()),
            OutputEvent::TaskCompleted
        ]
    );
}

#[tokio::test]
async fn test_crash_emits_one_fatal_exit() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "echo starting\nexit 1\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let (_, events) = collect_until_exit(&mut events).await;

    let fatal: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, SupervisorEvent::FatalExit(_)))
        .collect();
    assert_eq!(fatal.len(), 1);
    match fatal[0] {
        SupervisorEvent::FatalExit(report) => {
            assert_eq!(report.code, Some(1));
            assert!(!report.stop_requested);
            assert!(matches!(
                report.to_error(),
                Some(ShellError::UnexpectedExit { code: Some(1) })
            ));
        }
        _ => unreachable!(),
    }
    assert_eq!(supervisor.state(), SupervisorState::Failed);

    // A failed backend may be started again
    let mut events = supervisor.subscribe();
    let plan = plan_for(&dir, "echo again\nexit 0\n");
    let pid = supervisor.start(&plan).await.unwrap();
    let (output, events) = collect_until_exit(&mut events).await;

    assert_eq!(output, "again\n");
    assert_eq!(events[0], SupervisorEvent::Started { pid });
    let report = events
        .iter()
        .find_map(|event| match event {
            SupervisorEvent::Exited(report) => Some(report.clone()),
            _ => None,
        })
        .expect("exit report");
    assert_eq!(report.pid, pid);
    assert!(report.is_clean());
    assert!(!events
        .iter()
        .any(|event| matches!(event, SupervisorEvent::FatalExit(_))));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_stop_after_crash_keeps_failure() {
    let dir = TempDir::new().unwrap();
    // The grandchild holds stdout open, so the exit is published only
    // after the drain timeout
    let plan = plan_for(&dir, "sleep 30 &\necho \"child:$!\"\nexit 1\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let output = wait_for_output(&mut events, "\n").await;
    let grandchild: u32 = output
        .trim()
        .strip_prefix("child:")
        .and_then(|pid| pid.parse().ok())
        .expect("grandchild pid");

    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while supervisor.state() != SupervisorState::Failed {
        assert!(tokio::time::Instant::now() < deadline, "crash not observed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Shutdown races with the exit report
    supervisor.stop().await.unwrap();
    let (_, events) = collect_until_exit(&mut events).await;

    let fatal = events
        .iter()
        .filter(|event| matches!(event, SupervisorEvent::FatalExit(_)))
        .count();
    assert_eq!(fatal, 1);
    let report = events
        .iter()
        .find_map(|event| match event {
            SupervisorEvent::Exited(report) => Some(report.clone()),
            _ => None,
        })
        .expect("exit report");
    assert!(!report.stop_requested);
    assert_eq!(report.code, Some(1));
    assert_eq!(report.state, SupervisorState::Failed);
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert!(
        wait_until_dead(grandchild, Duration::from_secs(2)).await,
        "grandchild survived stop"
    );
}

#[tokio::test]
async fn test_start_waits_for_previous_exit_report() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "sleep 30 &\nexit 1\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    let pid = supervisor.start(&plan).await.unwrap();
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while supervisor.state() != SupervisorState::Failed {
        assert!(tokio::time::Instant::now() < deadline, "crash not observed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Exit not published yet
    let err = supervisor.start(&plan).await.unwrap_err();
    assert!(matches!(err, ShellError::AlreadyRunning { pid: Some(p) } if p == pid));

    supervisor.stop().await.unwrap();
    collect_until_exit(&mut events).await;
    assert_eq!(supervisor.pid(), None);
}

#[tokio::test]
async fn test_send_after_backend_closed_stdin_is_an_error() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "exec 0<&-\necho closed\nexec sleep 30\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    wait_for_output(&mut events, "closed").await;
    assert_eq!(supervisor.state(), SupervisorState::Running);

    let err = supervisor.send("hello").await.unwrap_err();
    assert!(matches!(err, ShellError::Io { .. }));

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_clean_exit_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "echo bye\nexit 0\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let (output, events) = collect_until_exit(&mut events).await;

    assert_eq!(output, "bye\n");
    assert!(!events
        .iter()
        .any(|event| matches!(event, SupervisorEvent::FatalExit(_))));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_stderr_is_not_relayed() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "echo oops >&2\necho out\n");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let (output, _) = collect_until_exit(&mut events).await;
    assert_eq!(output, "out\n");
}

#[tokio::test]
async fn test_environment_and_working_dir() {
    let dir = TempDir::new().unwrap();
    let plan = plan_for(&dir, "echo \"$PYTHONIOENCODING\"\necho \"$EXTRA\"\npwd\n")
        .with_env("EXTRA", "from-plan");
    let supervisor = fast_supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(&plan).await.unwrap();
    let (output, _) = collect_until_exit(&mut events).await;

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "utf-8");
    assert_eq!(lines[1], "from-plan");
    let cwd = std::fs::canonicalize(lines[2]).unwrap();
    assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
}

#[tokio::test]
async fn test_spawn_failure_leaves_supervisor_restartable() {
    let dir = TempDir::new().unwrap();
    let plan = LaunchPlan::new(
        "definitely-not-an-interpreter-7f3a",
        write_backend(&dir, "exit 0\n"),
        dir.path(),
    );
    let supervisor = fast_supervisor();

    let err = supervisor.start(&plan).await.unwrap_err();
    assert!(matches!(err, ShellError::SpawnFailed { .. }));
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_eq!(supervisor.pid(), None);
}
