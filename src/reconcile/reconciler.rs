use super::catalog::CatalogProbe;
use super::{ReconcileOptions, UnsetScope};
use crate::channel::SessionContext;
use crate::error::{Result, SfDriftError};
use crate::executor::sql_builder;
use crate::executor::{CommandExecutor, Outcome, Phase};
use crate::policy::{ident_eq, BindingSource, ColumnBinding, DesiredState};
use crate::report::DeploymentReport;
use tracing::{info, warn};

/// Brings masking policies and their column bindings to the desired state.
///
/// Phases run strictly in order (unset, drop, create, apply) and each one
/// finishes before the next starts: a bound policy cannot be dropped and a
/// binding needs its policy to exist. Policies are always dropped and
/// recreated, never altered in place. Within a phase, objects are handled in
/// the order given. Statement failures are recorded and the run goes on;
/// only a connection failure aborts it.
pub struct ObjectReconciler<'a> {
    executor: &'a CommandExecutor,
    context: SessionContext,
    options: ReconcileOptions,
}

impl<'a> ObjectReconciler<'a> {
    pub fn new(
        executor: &'a CommandExecutor,
        context: SessionContext,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            executor,
            context,
            options,
        }
    }

    fn probe(&self) -> CatalogProbe<'_> {
        CatalogProbe::new(self.executor, &self.context)
    }

    fn database(&self) -> Result<&str> {
        self.context.database.as_deref().ok_or_else(|| {
            SfDriftError::Config(
                "catalog lookups need a database in the session context".to_string(),
            )
        })
    }

    pub async fn reconcile(&self, desired: &DesiredState) -> Result<DeploymentReport> {
        let bindings = self.resolve_bindings(desired).await?;
        self.reconcile_bindings(desired, &bindings).await
    }

    /// Snapshot of the desired bindings, taken before anything is unset.
    pub async fn resolve_bindings(&self, desired: &DesiredState) -> Result<Vec<ColumnBinding>> {
        match &desired.bindings {
            BindingSource::Fixed(list) => Ok(list.clone()),
            BindingSource::Catalog { fallback } => {
                match self.current_managed_bindings(desired).await? {
                    Some(current) => {
                        // Retired policies are not recreated, so neither are their bindings.
                        let bindings: Vec<ColumnBinding> = current
                            .into_iter()
                            .filter(|b| {
                                let policy = b.policy_ref();
                                desired.policies.iter().any(|p| p.reference() == policy)
                            })
                            .collect();
                        info!(count = bindings.len(), "desired bindings read from catalog");
                        Ok(bindings)
                    }
                    None => {
                        warn!(
                            source = %self.options.reference_source,
                            "policy reference lookup failed, using the fixed binding list"
                        );
                        Ok(fallback.clone())
                    }
                }
            }
        }
    }

    pub async fn reconcile_bindings(
        &self,
        desired: &DesiredState,
        bindings: &[ColumnBinding],
    ) -> Result<DeploymentReport> {
        self.executor.ensure_connected(&self.context).await?;
        info!(
            policies = desired.policies.len(),
            bindings = bindings.len(),
            "reconciling masking policies"
        );

        let mut report = DeploymentReport::new();

        let unset_targets = self.unset_targets(desired, bindings).await?;
        report.extend(Self::logged(Phase::Unset, self.unset_phase(&unset_targets).await?));
        report.extend(Self::logged(Phase::Drop, self.drop_phase(desired).await?));
        report.extend(Self::logged(Phase::Create, self.create_phase(desired).await?));
        report.extend(Self::logged(Phase::Apply, self.apply_phase(bindings).await?));

        report.finish();
        Ok(report)
    }

    async fn current_managed_bindings(
        &self,
        desired: &DesiredState,
    ) -> Result<Option<Vec<ColumnBinding>>> {
        let database = self.database()?;
        self.probe()
            .managed_bindings(
                self.options.reference_source,
                &self.options.catalog_view,
                database,
                &desired.managed_policies(),
            )
            .await
    }

    async fn unset_targets(
        &self,
        desired: &DesiredState,
        bindings: &[ColumnBinding],
    ) -> Result<Vec<ColumnBinding>> {
        let mut targets = match self.options.unset_scope {
            UnsetScope::Desired => bindings.to_vec(),
            UnsetScope::Catalog => match self.current_managed_bindings(desired).await? {
                // A lagging or partial catalog must not leave a desired column bound.
                Some(current) => current.into_iter().chain(bindings.iter().cloned()).collect(),
                None => {
                    warn!("current bindings unavailable, unsetting the desired list instead");
                    bindings.to_vec()
                }
            },
        };
        let mut seen: Vec<ColumnBinding> = Vec::with_capacity(targets.len());
        targets.retain(|b| {
            let duplicate = seen.iter().any(|s| {
                ident_eq(&s.schema, &b.schema)
                    && ident_eq(&s.table, &b.table)
                    && ident_eq(&s.column, &b.column)
            });
            if !duplicate {
                seen.push(b.clone());
            }
            !duplicate
        });
        Ok(targets)
    }

    async fn unset_phase(&self, targets: &[ColumnBinding]) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for binding in targets {
            let description = format!("Unset {} from {}", binding.policy, binding.target());
            if self.probe().table_exists(&binding.schema, &binding.table).await? {
                let outcome = self
                    .executor
                    .execute(
                        &self.context.with_schema(&binding.schema),
                        Phase::Unset,
                        description,
                        &sql_builder::unset_masking_policy(binding),
                    )
                    .await?;
                outcomes.push(outcome);
            } else {
                outcomes.push(Outcome::skipped(
                    Phase::Unset,
                    description,
                    format!("table {}.{} does not exist", binding.schema, binding.table),
                ));
            }
        }
        Ok(outcomes)
    }

    async fn drop_phase(&self, desired: &DesiredState) -> Result<Vec<Outcome>> {
        let managed = desired.managed_policies();
        let mut outcomes = Vec::with_capacity(managed.len());
        for policy in &managed {
            let description = format!("Drop {} from {}", policy.name, policy.schema);
            if self.probe().policy_exists(policy).await? {
                let outcome = self
                    .executor
                    .execute(
                        &self.context.with_schema(&policy.schema),
                        Phase::Drop,
                        description,
                        &sql_builder::drop_masking_policy(policy),
                    )
                    .await?;
                outcomes.push(outcome);
            } else {
                outcomes.push(Outcome::no_op(
                    Phase::Drop,
                    description,
                    "policy does not exist",
                ));
            }
        }
        Ok(outcomes)
    }

    async fn create_phase(&self, desired: &DesiredState) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(desired.policies.len());
        for policy in &desired.policies {
            let description = format!("Create {} in {}", policy.name, policy.schema);
            if self.probe().policy_exists(&policy.reference()).await? {
                outcomes.push(Outcome::already_satisfied(
                    Phase::Create,
                    description,
                    "policy already exists",
                ));
                continue;
            }
            let outcome = self
                .executor
                .execute(
                    &self.context.with_schema(&policy.schema),
                    Phase::Create,
                    description,
                    &sql_builder::create_masking_policy(policy),
                )
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn apply_phase(&self, bindings: &[ColumnBinding]) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let description = format!("Apply {} to {}", binding.policy, binding.target());
            if self.probe().table_exists(&binding.schema, &binding.table).await? {
                let outcome = self
                    .executor
                    .execute(
                        &self.context.with_schema(&binding.schema),
                        Phase::Apply,
                        description,
                        &sql_builder::set_masking_policy(binding),
                    )
                    .await?;
                outcomes.push(outcome);
            } else {
                outcomes.push(Outcome::skipped(
                    Phase::Apply,
                    description,
                    format!(
                        "table {}.{} does not exist yet",
                        binding.schema, binding.table
                    ),
                ));
            }
        }
        Ok(outcomes)
    }

    fn logged(phase: Phase, outcomes: Vec<Outcome>) -> Vec<Outcome> {
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(
            phase = %phase,
            succeeded,
            attempted = outcomes.len(),
            "{} phase: {}/{} succeeded",
            phase,
            succeeded,
            outcomes.len()
        );
        outcomes
    }
}
