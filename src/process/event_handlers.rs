use super::run::{self, Launched};
use super::types::{Event, State};
use super::{Cycle, ProcessController, Shared};
use humantime::format_duration;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Begins a fresh cycle: clears any leftover run, launches the command and spawns its monitor.
pub(super) fn start(shared: &Arc<Shared>) {
    terminate_leftover(shared);
    let launched = launch(shared);

    let (cancel_sender, cancel_receiver) = oneshot::channel();
    let task = tokio::spawn(
        supervise(shared.clone(), launched, cancel_receiver)
            .instrument(info_span!("supervise", program = %shared.program.name)),
    );
    shared.runtime.lock().cycle = Some(Cycle {
        cancel: Some(cancel_sender),
        task,
    });
}

/// Asks the monitor of the active cycle to stop. Requests nobody listens to are dropped.
pub(super) fn request_stop(shared: &Shared) {
    let sender = shared
        .runtime
        .lock()
        .cycle
        .as_mut()
        .and_then(|cycle| cycle.cancel.take());
    match sender {
        Some(sender) => {
            if sender.send(()).is_err() {
                debug!("Monitor already gone, stop dropped");
            } else {
                info!("Stop requested");
            }
        }
        None => debug!("No stop channel open, stop dropped"),
    }
}

pub(super) fn restart(shared: &Arc<Shared>) {
    let controller = ProcessController {
        shared: shared.clone(),
    };
    let settle_delay = shared.settings.settle_delay;
    tokio::spawn(
        async move {
            controller.operate(Event::Stop);
            tokio::time::sleep(settle_delay).await;
            controller.operate(Event::Start);
        }
        .in_current_span(),
    );
}

fn terminate_leftover(shared: &Shared) {
    let (cycle, pid) = {
        let mut runtime = shared.runtime.lock();
        (runtime.cycle.take(), runtime.pid.take())
    };
    let Some(cycle) = cycle else {
        return;
    };
    cycle.task.abort();
    let Some(pid) = pid else {
        return;
    };

    warn!(pid, "Terminating leftover run");
    if let Err(err) = run::kill_group(pid) {
        warn!(?err, pid, "Failed to kill leftover run");
    }
    // Handlers are synchronous; this path only runs when a child outlived its cycle.
    std::thread::sleep(shared.settings.drain_delay);
    shared.machine.set_state(State::Stopped);
}

/// Launches the command and moves to `Running`. A launch failure is reported as a run that
/// ended immediately.
fn launch(shared: &Shared) -> Option<Launched> {
    let launched = match run::launch(&shared.program, &shared.output) {
        Ok(launched) => Some(launched),
        Err(err) => {
            warn!(?err, "Failed to start program");
            None
        }
    };
    shared.runtime.lock().pid = launched.as_ref().map(|launched| launched.pid);
    shared.machine.set_state(State::Running);
    launched
}

async fn supervise(
    shared: Arc<Shared>,
    mut launched: Option<Launched>,
    mut cancel: oneshot::Receiver<()>,
) {
    let budget = shared.program.startretries;
    let start_seconds = shared.program.start_seconds();

    loop {
        let elapsed = match launched.take() {
            Some(mut run) => {
                let exited = select! {
                    status = run.child.wait() => Some(status),
                    _ = &mut cancel => None,
                };
                let Some(status) = exited else {
                    stop(&shared, Some(run)).await;
                    return;
                };
                let elapsed = run.started.elapsed();
                report_exit(status, elapsed);
                shared.runtime.lock().pid = None;
                elapsed
            }
            None => Duration::ZERO,
        };

        if elapsed < start_seconds && shared.runtime.lock().retries_left == budget {
            error!(
                "Exited within {} on the first attempt, not retrying",
                format_duration(start_seconds)
            );
            shared.machine.set_state(State::Fatal);
            return;
        }

        shared.machine.set_state(State::RetryWait);
        let retries_left = {
            let mut runtime = shared.runtime.lock();
            if runtime.retries_left == 0 {
                runtime.retries_left = budget;
                None
            } else {
                runtime.retries_left -= 1;
                Some(runtime.retries_left)
            }
        };
        let Some(retries_left) = retries_left else {
            error!("Start retries exhausted");
            shared.machine.set_state(State::Fatal);
            return;
        };

        info!(
            retries_left,
            "Retrying in {}",
            format_duration(shared.settings.backoff)
        );
        let cancelled = select! {
            _ = tokio::time::sleep(shared.settings.backoff) => false,
            _ = &mut cancel => true,
        };
        if cancelled {
            stop(&shared, None).await;
            return;
        }
        launched = launch(&shared);
    }
}

/// Kills the run if there is one, waits for it to drain, then rests in `Stopped`.
async fn stop(shared: &Shared, run: Option<Launched>) {
    info!("Stopping");
    if let Some(mut run) = run {
        if let Err(err) = run::kill_group(run.pid) {
            warn!(?err, "Failed to kill process group");
            if let Err(err) = run.child.start_kill() {
                error!(?err, "Failed to kill child");
            }
        }
        match tokio::time::timeout(shared.settings.drain_delay, run.child.wait()).await {
            Ok(Ok(status)) => info!("Child stopped: {status}"),
            Ok(Err(err)) => error!(?err, "Waiting for child failed"),
            Err(_) => warn!("Child not reaped within the drain delay"),
        }
        shared.runtime.lock().pid = None;
    }
    shared.machine.set_state(State::Stopped);
}

fn report_exit(status: io::Result<ExitStatus>, elapsed: Duration) {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let elapsed = format_duration(Duration::from_millis(millis));
    match status {
        Ok(status) if status.success() => info!("Child exited with code 0 after {elapsed}"),
        Ok(status) => warn!("Child exited ({status}) after {elapsed}"),
        Err(err) => error!(?err, "Waiting for child failed after {elapsed}"),
    }
}
