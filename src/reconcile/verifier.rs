use super::catalog::CatalogProbe;
use super::{ReconcileOptions, VerifyMode};
use crate::channel::SessionContext;
use crate::error::{Result, SfDriftError};
use crate::executor::{CommandExecutor, Outcome, Phase};
use crate::policy::{ident_eq, ColumnBinding, PolicyDefinition, PolicyRef};
use serde::Serialize;
use tracing::{info, warn};

/// Masking-policy count observed in one schema. `None` when the listing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaPolicyCount {
    pub schema: String,
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationSummary {
    pub policies_per_schema: Vec<SchemaPolicyCount>,
    pub expected_policies: usize,
    pub expected_policies_found: usize,
    pub expected_bindings: usize,
    pub expected_bindings_found: usize,
    /// Mode that produced the binding numbers.
    pub binding_check: VerifyMode,
    pub missing_policies: Vec<PolicyRef>,
    pub missing_bindings: Vec<ColumnBinding>,
}

impl VerificationSummary {
    pub fn is_complete(&self) -> bool {
        self.expected_policies_found == self.expected_policies
            && self.expected_bindings_found == self.expected_bindings
    }

    /// One outcome per missing object plus the two totals, for the report.
    pub fn outcomes(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();

        let policy_total = format!(
            "Policies found: {}/{}",
            self.expected_policies_found, self.expected_policies
        );
        outcomes.push(if self.missing_policies.is_empty() {
            Outcome::applied(Phase::Verify, policy_total)
        } else {
            Outcome::failed(Phase::Verify, policy_total, "expected policies are missing")
        });
        for policy in &self.missing_policies {
            outcomes.push(Outcome::failed(
                Phase::Verify,
                format!("Policy {policy}"),
                "policy not found",
            ));
        }

        let binding_total = format!(
            "Bindings found: {}/{}",
            self.expected_bindings_found, self.expected_bindings
        );
        let mode_note = format!("checked via {}", self.binding_check);
        outcomes.push(if self.missing_bindings.is_empty() {
            Outcome::applied(Phase::Verify, binding_total).with_note(mode_note)
        } else {
            Outcome::failed(Phase::Verify, binding_total, "expected bindings are missing")
                .with_note(mode_note)
        });
        for binding in &self.missing_bindings {
            outcomes.push(Outcome::failed(
                Phase::Verify,
                format!("Binding {binding}"),
                "binding not found",
            ));
        }
        outcomes
    }
}

/// Cross-checks the warehouse catalog against the desired state. Read-only.
pub struct Verifier<'a> {
    executor: &'a CommandExecutor,
    context: SessionContext,
    options: ReconcileOptions,
}

impl<'a> Verifier<'a> {
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

    pub async fn verify(
        &self,
        policies: &[PolicyDefinition],
        bindings: &[ColumnBinding],
    ) -> Result<VerificationSummary> {
        let probe = CatalogProbe::new(self.executor, &self.context);

        let mut policies_per_schema: Vec<SchemaPolicyCount> = Vec::new();
        let mut found_names: Vec<PolicyRef> = Vec::new();
        for policy in policies {
            if policies_per_schema
                .iter()
                .any(|c| ident_eq(&c.schema, &policy.schema))
            {
                continue;
            }
            let names = probe.policies_in(&policy.schema).await?;
            policies_per_schema.push(SchemaPolicyCount {
                schema: policy.schema.clone(),
                count: names.as_ref().map(Vec::len),
            });
            found_names.extend(
                names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| PolicyRef::new(&policy.schema, name)),
            );
        }

        let missing_policies: Vec<PolicyRef> = policies
            .iter()
            .map(PolicyDefinition::reference)
            .filter(|p| !found_names.contains(p))
            .collect();

        let (binding_check, missing_bindings) =
            self.missing_bindings(&probe, policies, bindings).await?;

        let summary = VerificationSummary {
            policies_per_schema,
            expected_policies: policies.len(),
            expected_policies_found: policies.len() - missing_policies.len(),
            expected_bindings: bindings.len(),
            expected_bindings_found: bindings.len() - missing_bindings.len(),
            binding_check,
            missing_policies,
            missing_bindings,
        };
        info!(
            policies = %format!(
                "{}/{}",
                summary.expected_policies_found, summary.expected_policies
            ),
            bindings = %format!(
                "{}/{}",
                summary.expected_bindings_found, summary.expected_bindings
            ),
            mode = %summary.binding_check,
            "verification finished"
        );
        Ok(summary)
    }

    async fn missing_bindings(
        &self,
        probe: &CatalogProbe<'_>,
        policies: &[PolicyDefinition],
        bindings: &[ColumnBinding],
    ) -> Result<(VerifyMode, Vec<ColumnBinding>)> {
        if self.options.verify_mode == VerifyMode::Catalog {
            let database = self.context.database.as_deref().ok_or_else(|| {
                SfDriftError::Config(
                    "verification needs a database in the session context".to_string(),
                )
            })?;
            let mut expected: Vec<PolicyRef> = Vec::new();
            for policy in policies
                .iter()
                .map(PolicyDefinition::reference)
                .chain(bindings.iter().map(ColumnBinding::policy_ref))
            {
                if !expected.contains(&policy) {
                    expected.push(policy);
                }
            }
            match probe
                .managed_bindings(
                    self.options.reference_source,
                    &self.options.catalog_view,
                    database,
                    &expected,
                )
                .await?
            {
                Some(observed) => {
                    let missing = bindings
                        .iter()
                        .filter(|b| !observed.contains(b))
                        .cloned()
                        .collect();
                    return Ok((VerifyMode::Catalog, missing));
                }
                None => warn!(
                    source = %self.options.reference_source,
                    "policy references unavailable, verifying bindings by table probe"
                ),
            }
        }

        let mut missing = Vec::new();
        for binding in bindings {
            if !probe.table_exists(&binding.schema, &binding.table).await? {
                missing.push(binding.clone());
            }
        }
        Ok((VerifyMode::Probe, missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockWarehouse;
    use crate::policy::{known_policy_applications, public_health_policies};
    use std::sync::Arc;

    fn context() -> SessionContext {
        SessionContext::new("ACCOUNTADMIN", "COMPUTE_WH", "PUBLIC_HEALTH_MODERNIZATION_DEMO")
    }

    fn deployed() -> MockWarehouse {
        MockWarehouse::public_health()
            .with_policy("CURATED", "address_mask", "STRING", "val")
            .with_policy("CURATED", "coordinate_mask", "FLOAT", "val")
            .with_policy("DATA_MART", "population_mask", "INTEGER", "val")
            .with_binding(
                "CURATED",
                "curated_environmental_data",
                "facility_address",
                "address_mask",
            )
            .with_binding(
                "CURATED",
                "curated_health_indicators",
                "latitude",
                "coordinate_mask",
            )
            .with_binding(
                "CURATED",
                "curated_health_indicators",
                "longitude",
                "coordinate_mask",
            )
    }

    #[test]
    fn test_catalog_verification_finds_missing_binding() {
        let executor = CommandExecutor::new(Arc::new(deployed()));
        let verifier = Verifier::new(&executor, context(), ReconcileOptions::default());

        let summary = tokio_test::block_on(
            verifier.verify(&public_health_policies(), &known_policy_applications()),
        )
        .unwrap();

        assert_eq!(summary.binding_check, VerifyMode::Catalog);
        assert_eq!(summary.expected_policies_found, 3);
        assert_eq!(summary.expected_bindings_found, 3);
        assert_eq!(
            summary.missing_bindings,
            vec![ColumnBinding::new(
                "DATA_MART",
                "public_health_dashboard",
                "total_population",
                "population_mask"
            )]
        );
        assert_eq!(
            summary.policies_per_schema,
            vec![
                SchemaPolicyCount {
                    schema: "CURATED".to_string(),
                    count: Some(2)
                },
                SchemaPolicyCount {
                    schema: "DATA_MART".to_string(),
                    count: Some(1)
                },
            ]
        );
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_unavailable_view_falls_back_to_probe() {
        let warehouse = deployed();
        warehouse.fail_statements_matching("POLICY_REFERENCES");
        let executor = CommandExecutor::new(Arc::new(warehouse));
        let verifier = Verifier::new(&executor, context(), ReconcileOptions::default());

        let summary = tokio_test::block_on(
            verifier.verify(&public_health_policies(), &known_policy_applications()),
        )
        .unwrap();

        // Probe mode only sees that the tables exist.
        assert_eq!(summary.binding_check, VerifyMode::Probe);
        assert_eq!(summary.expected_bindings_found, 4);
    }

    #[test]
    fn test_missing_schema_counts_as_unknown() {
        let executor = CommandExecutor::new(Arc::new(MockWarehouse::new(
            "PUBLIC_HEALTH_MODERNIZATION_DEMO",
        )));
        let options = ReconcileOptions {
            verify_mode: VerifyMode::Probe,
            ..ReconcileOptions::default()
        };
        let verifier = Verifier::new(&executor, context(), options);

        let summary = tokio_test::block_on(
            verifier.verify(&public_health_policies(), &known_policy_applications()),
        )
        .unwrap();

        assert!(summary.policies_per_schema.iter().all(|c| c.count.is_none()));
        assert_eq!(summary.expected_policies_found, 0);
        assert_eq!(summary.missing_policies.len(), 3);
        assert_eq!(summary.expected_bindings_found, 0);
    }

    #[test]
    fn test_outcomes_report_each_missing_object() {
        let executor = CommandExecutor::new(Arc::new(deployed()));
        let verifier = Verifier::new(&executor, context(), ReconcileOptions::default());
        let summary = tokio_test::block_on(
            verifier.verify(&public_health_policies(), &known_policy_applications()),
        )
        .unwrap();

        let outcomes = summary.outcomes();
        let descriptions: Vec<&str> = outcomes.iter().map(|o| o.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "Policies found: 3/3",
                "Bindings found: 3/4",
                "Binding DATA_MART.public_health_dashboard.total_population -> population_mask",
            ]
        );
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
    }
}
