use assert_matches::assert_matches;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use warden::{ControllerSettings, Event, ProcessController, ProgramSpec, State};

fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        backoff: Duration::from_millis(100),
        settle_delay: Duration::from_millis(200),
        drain_delay: Duration::from_millis(200),
        ..Default::default()
    }
}

fn program(name: &str, command: &str, startretries: u32, startsecs: u64) -> ProgramSpec {
    ProgramSpec {
        startretries,
        startsecs,
        ..ProgramSpec::new(name, command)
    }
}

async fn wait_until<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_state(controller: &ProcessController, state: State, within: Duration) -> bool {
    wait_until(within, || controller.state() == state).await
}

fn record_transitions(controller: &ProcessController) -> Arc<Mutex<Vec<(State, State)>>> {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = transitions.clone();
    controller.on_state_change(move |old, new| sink.lock().push((old, new)));
    transitions
}

#[tokio::test]
async fn command_exiting_immediately_is_fatal() {
    let controller = ProcessController::new(program("demo", "exit 0", 2, 3)).unwrap();
    let transitions = record_transitions(&controller);

    assert_eq!(controller.operate(Event::Start), State::Running);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(2)).await);

    assert_eq!(controller.status(), "fatal");
    assert_eq!(controller.retries_left(), 2);
    assert_eq!(controller.pid(), None);
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::Fatal),
        ]
    );
}

#[tokio::test]
async fn stop_ends_a_running_command() {
    let controller =
        ProcessController::with_settings(program("demo2", "sleep 5", 1, 1), fast_settings())
            .unwrap();

    assert_eq!(controller.operate(Event::Start), State::Running);
    assert!(controller.pid().is_some());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.state(), State::Running);

    // the stop is carried out by the monitor, not by the dispatch
    assert_eq!(controller.operate(Event::Stop), State::Running);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
    assert_eq!(controller.pid(), None);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn start_while_running_is_ignored() {
    let controller =
        ProcessController::with_settings(program("demo", "sleep 5", 0, 1), fast_settings())
            .unwrap();
    controller.operate(Event::Start);
    let pid = controller.pid();

    assert_eq!(controller.operate(Event::Start), State::Running);
    assert_eq!(controller.pid(), pid);

    controller.operate(Event::Stop);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn exit_after_start_window_is_retried() {
    let settings = ControllerSettings {
        backoff: Duration::from_millis(300),
        ..fast_settings()
    };
    let controller =
        ProcessController::with_settings(program("flaky", "sleep 2", 2, 1), settings).unwrap();

    controller.operate(Event::Start);
    let first_pid = controller.pid();
    assert!(wait_for_state(&controller, State::RetryWait, Duration::from_secs(4)).await);
    assert!(wait_for_state(&controller, State::Running, Duration::from_secs(2)).await);
    assert_eq!(controller.retries_left(), 1);
    assert!(controller.pid().is_some());
    assert_ne!(controller.pid(), first_pid);

    controller.operate(Event::Stop);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn exhausted_retries_end_in_fatal_with_budget_restored() {
    let dir = tempfile::tempdir().unwrap();
    // long first run, then every retry fails instantly
    let command = "if [ -f ran ]; then exit 1; fi; touch ran; sleep 2";
    let program = ProgramSpec {
        directory: dir.path().to_string_lossy().into_owned(),
        ..program("crashy", command, 2, 1)
    };
    let controller = ProcessController::with_settings(program, fast_settings()).unwrap();
    let transitions = record_transitions(&controller);

    controller.operate(Event::Start);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(6)).await);

    assert_eq!(controller.retries_left(), 2);
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Fatal),
        ]
    );
}

#[tokio::test]
async fn zero_budget_goes_fatal_after_one_long_run() {
    let controller =
        ProcessController::with_settings(program("once", "sleep 1.5", 0, 1), fast_settings())
            .unwrap();
    let transitions = record_transitions(&controller);

    controller.operate(Event::Start);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(4)).await);
    assert_eq!(controller.retries_left(), 0);
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Fatal),
        ]
    );
}

#[tokio::test]
async fn stop_during_backoff_prevents_the_retry() {
    let settings = ControllerSettings {
        backoff: Duration::from_secs(5),
        ..fast_settings()
    };
    let controller =
        ProcessController::with_settings(program("flaky", "sleep 1.5", 3, 1), settings).unwrap();

    controller.operate(Event::Start);
    assert!(wait_for_state(&controller, State::RetryWait, Duration::from_secs(4)).await);

    assert_eq!(controller.operate(Event::Stop), State::RetryWait);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(controller.state(), State::Stopped);
    assert_eq!(controller.pid(), None);
}

#[tokio::test]
async fn restart_replaces_the_running_command() {
    let controller =
        ProcessController::with_settings(program("web", "sleep 30", 1, 1), fast_settings())
            .unwrap();
    let transitions = record_transitions(&controller);

    controller.operate(Event::Start);
    let first_pid = controller.pid().unwrap();

    assert_eq!(controller.operate(Event::Restart), State::Running);
    let restarted = wait_until(Duration::from_secs(3), || {
        controller.state() == State::Running
            && controller.pid().map_or(false, |pid| pid != first_pid)
    })
    .await;
    assert!(restarted, "{:?}", transitions.lock());
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::Stopped),
            (State::Stopped, State::Running),
        ]
    );

    controller.operate(Event::Stop);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn fatal_program_can_be_started_again() {
    let controller =
        ProcessController::with_settings(program("broken", "exit 3", 1, 2), fast_settings())
            .unwrap();

    controller.operate(Event::Start);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(2)).await);

    assert_eq!(controller.operate(Event::Start), State::Running);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(2)).await);
    assert_eq!(controller.retries_left(), 1);
}

#[tokio::test]
async fn event_sequence_follows_the_transition_table() {
    let controller =
        ProcessController::with_settings(program("mixed", "sleep 30", 1, 1), fast_settings())
            .unwrap();

    let expect = |event: Event, state: State| {
        assert_eq!(controller.operate(event), state, "{event} dispatched");
        assert_eq!(controller.status(), state.as_str());
    };

    expect(Event::Stop, State::Stopped);
    expect(Event::Restart, State::Stopped);
    expect(Event::Start, State::Running);
    let first_pid = controller.pid().unwrap();
    expect(Event::Start, State::Running);
    assert_eq!(controller.pid(), Some(first_pid));

    expect(Event::Restart, State::Running);
    let restarted = wait_until(Duration::from_secs(3), || {
        controller.state() == State::Running
            && controller.pid().map_or(false, |pid| pid != first_pid)
    })
    .await;
    assert!(restarted, "{:?}", controller.state());

    expect(Event::Stop, State::Running);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
    expect(Event::Stop, State::Stopped);
    expect(Event::Restart, State::Stopped);

    expect(Event::Start, State::Running);
    expect(Event::Stop, State::Running);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn launch_failure_on_first_attempt_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("work");
    std::fs::create_dir(&workdir).unwrap();
    let program = ProgramSpec {
        directory: workdir.to_string_lossy().into_owned(),
        ..program("vanished", "sleep 5", 2, 3)
    };
    let controller = ProcessController::with_settings(program, fast_settings()).unwrap();
    let transitions = record_transitions(&controller);
    std::fs::remove_dir(&workdir).unwrap();

    assert_eq!(controller.operate(Event::Start), State::Running);
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(2)).await);

    assert_eq!(controller.retries_left(), 2);
    assert_eq!(controller.pid(), None);
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::Fatal),
        ]
    );
}

#[tokio::test]
async fn launch_failure_on_retry_uses_up_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("work");
    std::fs::create_dir(&workdir).unwrap();
    let program = ProgramSpec {
        directory: workdir.to_string_lossy().into_owned(),
        ..program("vanishing", "sleep 1.5", 1, 1)
    };
    let controller = ProcessController::with_settings(program, fast_settings()).unwrap();
    let transitions = record_transitions(&controller);

    assert_eq!(controller.operate(Event::Start), State::Running);
    // the first run already has its working directory, later launches will not
    std::fs::remove_dir(&workdir).unwrap();
    assert!(wait_for_state(&controller, State::Fatal, Duration::from_secs(4)).await);

    assert_eq!(controller.retries_left(), 1);
    assert_eq!(controller.pid(), None);
    assert_eq!(
        *transitions.lock(),
        vec![
            (State::Stopped, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Running),
            (State::Running, State::RetryWait),
            (State::RetryWait, State::Fatal),
        ]
    );
}

#[tokio::test]
async fn environment_and_directory_reach_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let program = ProgramSpec {
        environ: vec!["GREETING=hello from warden".into()],
        directory: dir.path().to_string_lossy().into_owned(),
        ..program("env", "echo \"$GREETING\" > greeting.txt; echo ready; sleep 5", 0, 1)
    };
    let controller = ProcessController::with_settings(program, fast_settings()).unwrap();
    controller.operate(Event::Start);

    let greeting = dir.path().join("greeting.txt");
    assert!(
        wait_until(Duration::from_secs(2), || {
            std::fs::read_to_string(&greeting)
                .map(|text| text == "hello from warden\n")
                .unwrap_or(false)
        })
        .await
    );
    assert!(wait_until(Duration::from_secs(2), || controller.output_tail().contains("ready")).await);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, State::Running);
    assert_matches!(snapshot.pid, Some(_));
    assert_eq!(snapshot.program.name, "env");

    controller.operate(Event::Stop);
    assert!(wait_for_state(&controller, State::Stopped, Duration::from_secs(1)).await);
}

#[test]
fn empty_command_never_produces_a_controller() {
    assert_matches!(ProcessController::new(ProgramSpec::new("demo", "")), Err(_));
    assert_matches!(ProcessController::new(ProgramSpec::new("", "sleep 1")), Err(_));
}
