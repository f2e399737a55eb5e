//! Worker Routing
//!
//! Maps an instruction's level onto the worker script that handles it and
//! builds the exact argument vector that worker expects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::instruction::TradeInstruction;

/// Default interpreter used to run worker scripts
pub const DEFAULT_INTERPRETER: &str = "python3.12";
pub const DEFAULT_INITIAL_BUY_SCRIPT: &str = "execute_initial_buy.py";
pub const DEFAULT_NEXT_BUY_SCRIPT: &str = "execute_next_buy.py";
pub const DEFAULT_MARKET_NAME: &str = "BTC";

/// Default wall-clock budget for one worker run (10 minutes)
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Which worker handles an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Level 0: opens the ladder
    InitialBuy,
    /// Level > 0: buys the next rung
    NextBuy,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::InitialBuy => "initial_buy",
            WorkerKind::NextBuy => "next_buy",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How worker commands are assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Program used to run the scripts; empty runs the scripts directly
    pub interpreter: String,
    pub initial_buy_script: PathBuf,
    pub next_buy_script: PathBuf,
    /// Value passed as `--market-name` to the initial buy worker
    pub market_name: String,
    /// Directory the workers keep their state in
    pub data_dir: PathBuf,
    /// Pass `--dry-run` so workers calculate without trading
    pub dry_run: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            initial_buy_script: PathBuf::from(DEFAULT_INITIAL_BUY_SCRIPT),
            next_buy_script: PathBuf::from(DEFAULT_NEXT_BUY_SCRIPT),
            market_name: DEFAULT_MARKET_NAME.to_string(),
            data_dir: PathBuf::from("data"),
            dry_run: false,
        }
    }
}

impl WorkerSettings {
    pub fn script_for(&self, worker: WorkerKind) -> &PathBuf {
        match worker {
            WorkerKind::InitialBuy => &self.initial_buy_script,
            WorkerKind::NextBuy => &self.next_buy_script,
        }
    }
}

/// A fully resolved worker command. Only [`route`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInvocation {
    worker: WorkerKind,
    program: String,
    script: PathBuf,
    arguments: Vec<String>,
    /// Script path is the first argument
    interpreted: bool,
}

impl WorkerInvocation {
    pub fn worker(&self) -> WorkerKind {
        self.worker
    }

    /// Executable handed to the OS
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn script(&self) -> &PathBuf {
        &self.script
    }

    /// Full argument vector after the program
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Arguments the worker script itself receives
    pub fn worker_arguments(&self) -> &[String] {
        &self.arguments[usize::from(self.interpreted)..]
    }

    /// Printable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Select the worker for an instruction and build its command.
///
/// Level 0 goes to the initial buy worker, positive levels to the next buy
/// worker. Negative levels only reach here with safety checks disabled and are
/// treated as an initial buy.
pub fn route(instruction: &TradeInstruction, settings: &WorkerSettings) -> WorkerInvocation {
    let data_dir = settings.data_dir.display().to_string();

    let (worker, mut worker_args) = if instruction.level() > 0 {
        (
            WorkerKind::NextBuy,
            vec![
                instruction.token_id().to_string(),
                "--level".to_string(),
                instruction.level().to_string(),
                "--profit".to_string(),
                instruction.profit().to_string(),
                "--auto-confirm".to_string(),
                "--data-dir".to_string(),
                data_dir,
            ],
        )
    } else {
        (
            WorkerKind::InitialBuy,
            vec![
                instruction.token_id().to_string(),
                instruction.profit().to_string(),
                "--market-name".to_string(),
                settings.market_name.clone(),
                "--data-dir".to_string(),
                data_dir,
            ],
        )
    };

    if settings.dry_run {
        worker_args.push("--dry-run".to_string());
    }

    let script = settings.script_for(worker).clone();
    let interpreter = settings.interpreter.trim();

    let (program, arguments) = if interpreter.is_empty() {
        (script.display().to_string(), worker_args)
    } else {
        let mut arguments = Vec::with_capacity(worker_args.len() + 1);
        arguments.push(script.display().to_string());
        arguments.extend(worker_args);
        (interpreter.to_string(), arguments)
    };

    WorkerInvocation {
        worker,
        program,
        script,
        arguments,
        interpreted: !interpreter.is_empty(),
    }
}
