use super::command::CommandExecutor;
use super::outcome::{Outcome, Phase};
use crate::channel::SessionContext;
use crate::error::{Result, SfDriftError};
use crate::report::DeploymentReport;
use crate::script::{ScriptLoader, SqlScript, Statement, StatementSplitter};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{info, warn};

static USE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^USE\s+(ROLE|WAREHOUSE|DATABASE|SCHEMA)\s+(\S+)$")
        .expect("use statement regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and run the remaining statements.
    #[default]
    Continue,
    /// Skip the rest of the failing script; later scripts still run.
    StopScript,
}

/// Applies an in-band `USE ...` statement to the context carried forward.
pub(crate) fn apply_use_statement(context: &SessionContext, sql: &str) -> Option<SessionContext> {
    let caps = USE_STATEMENT.captures(sql.trim())?;
    let target = caps[2].trim_end_matches(';').to_string();
    let next = match caps[1].to_ascii_uppercase().as_str() {
        "ROLE" => context.with_role(target),
        "WAREHOUSE" => context.with_warehouse(target),
        "DATABASE" => context.with_database(target),
        _ => match target.split_once('.') {
            Some((database, schema)) => context.with_database(database).with_schema(schema),
            None => context.with_schema(target),
        },
    };
    Some(next)
}

pub struct ScriptRunner {
    executor: CommandExecutor,
    base_context: SessionContext,
    failure_policy: FailurePolicy,
}

impl ScriptRunner {
    pub fn new(executor: CommandExecutor, base_context: SessionContext) -> Self {
        Self {
            executor,
            base_context,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Splits and executes one script. Each script starts from the base context.
    pub async fn run_script(&self, script: &SqlScript) -> Result<Vec<Outcome>> {
        let statements = StatementSplitter::split(script);
        let total = statements.len();
        info!(
            source = %script.source(),
            checksum = %script.checksum(),
            statements = total,
            "deploying script"
        );

        let mut context = self.base_context.clone();
        let mut outcomes = Vec::with_capacity(total);
        let mut halted = false;

        for statement in &statements {
            let description = Self::describe(script, statement, total);
            if halted {
                outcomes.push(Outcome::skipped(
                    Phase::Script,
                    description,
                    "earlier statement in this script failed",
                ));
                continue;
            }

            let outcome = self
                .executor
                .execute(&context, Phase::Script, description, &statement.sql)
                .await?;

            if outcome.succeeded() {
                if let Some(next) = apply_use_statement(&context, &statement.sql) {
                    context = next;
                }
            } else if self.failure_policy == FailurePolicy::StopScript {
                halted = true;
            }
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(
            source = %script.source(),
            succeeded,
            attempted = total,
            "{}: {}/{} statements succeeded",
            script.source(),
            succeeded,
            total
        );
        Ok(outcomes)
    }

    /// Deploys scripts in the given order. Missing files are recorded as skipped.
    pub async fn deploy_paths(&self, paths: &[PathBuf]) -> Result<DeploymentReport> {
        self.executor.ensure_connected(&self.base_context).await?;

        let mut report = DeploymentReport::new();
        for path in ScriptLoader::expand_paths(paths)? {
            match ScriptLoader::load_file(&path) {
                Ok(script) => {
                    let outcomes = self.run_script(&script).await?;
                    report.extend(outcomes);
                }
                Err(SfDriftError::ScriptNotFound(missing)) => {
                    warn!(path = %missing, "script not found, skipping");
                    report.push(Outcome::skipped(
                        Phase::Script,
                        format!("Deploy {missing}"),
                        "file not found",
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        report.finish();
        Ok(report)
    }

    fn describe(script: &SqlScript, statement: &Statement, total: usize) -> String {
        let label = if statement.is_procedure_body() {
            "procedure"
        } else {
            "statement"
        };
        format!(
            "{} {} {}/{}: {}",
            script.source(),
            label,
            statement.position + 1,
            total,
            statement.summary(60)
        )
    }
}
