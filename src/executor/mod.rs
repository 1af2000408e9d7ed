mod command;
mod outcome;
mod script_runner;
pub(crate) mod sql_builder;

pub use command::CommandExecutor;
pub use outcome::{excerpt, Outcome, OutcomeStatus, Phase, ERROR_EXCERPT_CHARS};
pub use script_runner::{FailurePolicy, ScriptRunner};
