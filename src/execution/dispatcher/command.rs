//! Operation to command-line rendering

use crate::core::config::DispatchConfig;
use crate::core::expand::ParamValue;
use crate::core::step::Operation;
use std::collections::HashMap;

/// Turns an [`Operation`] into an argument vector and environment
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    programs: HashMap<String, String>,
    threads: usize,
    mpi_processes: usize,
    mpi_launcher: Vec<String>,
}

impl CommandRenderer {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            programs: config.programs.clone(),
            threads: config.threads,
            mpi_processes: config.mpi_processes,
            mpi_launcher: config.mpi_launcher.clone(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Executable for `action`; defaults to the action name itself
    pub fn program<'a>(&'a self, action: &'a str) -> &'a str {
        self.programs.get(action).map(String::as_str).unwrap_or(action)
    }

    /// Full argument vector, launcher prefix included
    ///
    /// Arguments render as `--key value`; `true` becomes a bare `--key` and
    /// `false` is left out. Inputs follow the arguments in order.
    pub fn argv(&self, operation: &Operation) -> Vec<String> {
        let mut argv = Vec::new();
        if self.mpi_processes > 1 {
            let procs = self.mpi_processes.to_string();
            argv.extend(self.mpi_launcher.iter().map(|part| part.replace("{procs}", &procs)));
        }
        argv.push(self.program(&operation.action).to_string());

        for (key, value) in &operation.args {
            match value {
                ParamValue::Bool(true) => argv.push(format!("--{}", key)),
                ParamValue::Bool(false) => {}
                other => {
                    argv.push(format!("--{}", key));
                    argv.push(other.to_string());
                }
            }
        }
        argv.extend(operation.inputs.iter().cloned());
        argv
    }

    /// Environment variables set for every launched program
    pub fn env(&self) -> Vec<(String, String)> {
        vec![("OMP_NUM_THREADS".to_string(), self.threads.to_string())]
    }
}

/// Quote `arg` for a POSIX shell script
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
