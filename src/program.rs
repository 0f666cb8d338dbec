use color_eyre::eyre::bail;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_START_SECONDS: u64 = 3;

/// Declarative description of one supervised command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProgramSpec {
    pub name: String,
    /// Shell command line, run through `/bin/sh -c`.
    pub command: String,
    /// `KEY=VALUE` overrides applied on top of the inherited environment.
    #[serde(default)]
    pub environ: Vec<String>,
    /// Working directory. Empty means inherit.
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub startretries: u32,
    /// Seconds the command has to stay alive to count as started.
    #[serde(default)]
    pub startsecs: u64,
}

impl ProgramSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("Program name empty");
        }
        if self.command.is_empty() {
            bail!("Program command empty");
        }
        if !self.directory.is_empty() && !Path::new(&self.directory).is_dir() {
            bail!("Program dir({}) not exists", self.directory);
        }
        Ok(())
    }

    pub fn start_seconds(&self) -> Duration {
        match self.startsecs {
            0 => Duration::from_secs(DEFAULT_START_SECONDS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Environment overrides split into pairs. Entries without `=` are returned as errors so
    /// the caller can report them.
    pub fn env_pairs(&self) -> impl Iterator<Item = Result<(&str, &str), &str>> {
        self.environ
            .iter()
            .map(|entry| entry.split_once('=').ok_or(entry.as_str()))
    }
}
