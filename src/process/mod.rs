mod event_handlers;
mod run;
mod types;

use self::run::OutputCache;
pub use self::types::{Event, Snapshot, State};

use crate::fsm::{StateMachine, StateMachineBuilder};
use crate::program::ProgramSpec;
use crate::settings::ControllerSettings;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument;

type Machine = StateMachine<State, Event, Arc<Shared>>;

/// Supervises one external command.
///
/// Cloning is cheap and every clone drives the same command. [`ProcessController::operate`]
/// must be called from inside a tokio runtime.
#[derive(Clone)]
pub struct ProcessController {
    shared: Arc<Shared>,
}

struct Shared {
    program: ProgramSpec,
    settings: ControllerSettings,
    machine: Machine,
    runtime: Mutex<Runtime>,
    output: OutputCache,
}

#[derive(Default)]
struct Runtime {
    pid: Option<u32>,
    retries_left: u32,
    cycle: Option<Cycle>,
}

/// One `Start` and every retry that follows it, until the controller rests again.
struct Cycle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProcessController {
    pub fn new(program: ProgramSpec) -> Result<Self> {
        Self::with_settings(program, ControllerSettings::default())
    }

    pub fn with_settings(program: ProgramSpec, settings: ControllerSettings) -> Result<Self> {
        program
            .check()
            .wrap_err_with(|| format!("Invalid program {:?}", program.name))?;
        let output = run::output_cache(settings.output_cache_size);
        let runtime = Runtime {
            retries_left: program.startretries,
            ..Default::default()
        };
        Ok(Self {
            shared: Arc::new(Shared {
                program,
                settings,
                machine: machine(),
                runtime: Mutex::new(runtime),
                output,
            }),
        })
    }

    #[instrument(skip(self), fields(program = %self.shared.program.name))]
    pub fn operate(&self, event: Event) -> State {
        self.shared.machine.operate(&self.shared, event)
    }

    pub fn state(&self) -> State {
        self.shared.machine.current_state()
    }

    pub fn status(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), State::Running | State::RetryWait)
    }

    pub fn program(&self) -> &ProgramSpec {
        &self.shared.program
    }

    /// Pid of the command currently running, if any.
    pub fn pid(&self) -> Option<u32> {
        self.shared.runtime.lock().pid
    }

    pub fn retries_left(&self) -> u32 {
        self.shared.runtime.lock().retries_left
    }

    /// Most recent stdout/stderr lines of the command, oldest first.
    pub fn output_tail(&self) -> String {
        self.shared.output.lock().extract().to_string()
    }

    pub fn snapshot(&self) -> Snapshot {
        let (pid, retries_left) = {
            let runtime = self.shared.runtime.lock();
            (runtime.pid, runtime.retries_left)
        };
        Snapshot {
            program: self.shared.program.clone(),
            status: self.state(),
            pid,
            retries_left,
        }
    }

    /// Installs the single state-change observer, called with `(old, new)` before each
    /// transition is applied. The observer must not call back into this controller.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(State, State) + Send + Sync + 'static,
    {
        self.shared.machine.set_observer(observer);
    }
}

impl fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessController")
            .field("name", &self.shared.program.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

fn machine() -> Machine {
    StateMachineBuilder::<State, Event, Arc<Shared>>::new(State::Stopped)
        .on(State::Stopped, Event::Start, |_, shared| {
            shared.runtime.lock().retries_left = shared.program.startretries;
            event_handlers::start(shared);
        })
        .on(State::Fatal, Event::Start, |_, shared| {
            event_handlers::start(shared)
        })
        .on(State::Running, Event::Stop, |_, shared| {
            event_handlers::request_stop(shared)
        })
        .on(State::RetryWait, Event::Stop, |_, shared| {
            event_handlers::request_stop(shared)
        })
        .on(State::Running, Event::Restart, |_, shared| {
            event_handlers::restart(shared)
        })
        .build()
}
