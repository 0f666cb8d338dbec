use crate::program::ProgramSpec;
use crate::settings::ControllerSettings;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WardenConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub settings: ControllerSettings,
    #[serde(default)]
    pub programs: Vec<ProgramSpec>,
}

fn default_log_filter() -> String {
    "info".into()
}

impl WardenConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open config {}", path.display()))?;
        let config: WardenConfig =
            serde_yaml::from_reader(file).wrap_err("Failed to read config!")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for program in &self.programs {
            program
                .check()
                .wrap_err_with(|| format!("Invalid program {:?}", program.name))?;
            if !names.insert(program.name.as_str()) {
                bail!("Duplicate program name {:?}", program.name);
            }
        }
        Ok(())
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            settings: Default::default(),
            programs: Default::default(),
        }
    }
}
