use crate::program::ProgramSpec;
use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "retry wait")]
    RetryWait,
    #[serde(rename = "fatal")]
    Fatal,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Stopped,
        State::Running,
        State::RetryWait,
        State::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "stopped",
            State::Running => "running",
            State::RetryWait => "retry wait",
            State::Fatal => "fatal",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    Stop,
    Restart,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::Stop => "stop",
            Event::Restart => "restart",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Event::Start),
            "stop" => Ok(Event::Stop),
            "restart" => Ok(Event::Restart),
            other => Err(eyre!("Unknown event: {other:?}")),
        }
    }
}

/// Point-in-time view of a controller, meant for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub program: ProgramSpec,
    pub status: State,
    pub pid: Option<u32>,
    pub retries_left: u32,
}
