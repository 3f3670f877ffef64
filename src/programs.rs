use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Configuration for one external pipeline step.
///
/// Replaces the historical dynamic option schema with typed fields:
/// `options` render as `-name value`, `flags` as `--name`, `parameters`
/// positionally. `suffixes` lists the file endings a keyed option is
/// expected to produce, so callers can predict output files without running
/// anything.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub executable: String,

    #[serde(default)]
    pub parameters: Vec<String>,

    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub flags: Vec<String>,

    #[serde(default)]
    pub suffixes: BTreeMap<String, Vec<String>>,
}

impl StepConfig {
    /// Render the argv this step would run with.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = vec![self.executable.clone()];
        for (name, value) in &self.options {
            argv.push(format!("-{}", name));
            if !value.is_empty() {
                argv.push(value.clone());
            }
        }
        for flag in &self.flags {
            argv.push(format!("--{}", flag));
        }
        argv.extend(self.parameters.iter().cloned());
        argv
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Files expected for a keyed option: the option value with each
    /// configured suffix appended, or the bare value without suffixes.
    pub fn files_for(&self, option: &str) -> Option<Vec<String>> {
        let value = self.options.get(option)?;
        match self.suffixes.get(option) {
            Some(suffixes) if !suffixes.is_empty() => Some(
                suffixes
                    .iter()
                    .map(|suffix| format!("{}{}", value, suffix))
                    .collect(),
            ),
            _ => Some(vec![value.clone()]),
        }
    }
}

/// The external steps of the pipeline: gene discovery search, optional
/// search-database creation, mapping-index build, and read mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSteps {
    pub search: StepConfig,
    pub makedb: Option<StepConfig>,
    pub index: StepConfig,
    pub mapping: StepConfig,
}

impl PipelineSteps {
    /// Load the step configuration from a TOML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read step configuration: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Invalid step configuration: {}", path.display()))
    }

    /// Steps in execution order, with their names.
    pub fn steps(&self) -> Vec<(&'static str, &StepConfig)> {
        let mut steps = Vec::new();
        if let Some(makedb) = &self.makedb {
            steps.push(("makedb", makedb));
        }
        steps.push(("search", &self.search));
        steps.push(("index", &self.index));
        steps.push(("mapping", &self.mapping));
        steps
    }
}
