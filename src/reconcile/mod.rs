mod catalog;
mod reconciler;
mod verifier;

pub use catalog::CatalogProbe;
pub use reconciler::ObjectReconciler;
pub use verifier::{SchemaPolicyCount, VerificationSummary, Verifier};

use crate::channel::SessionContext;
use crate::error::Result;
use crate::executor::sql_builder::DEFAULT_POLICY_REFERENCES_VIEW;
use crate::executor::CommandExecutor;
use crate::policy::DesiredState;
use crate::report::DeploymentReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the currently applied bindings are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// `<db>.INFORMATION_SCHEMA.POLICY_REFERENCES`, queried once per managed
    /// policy. Reflects DDL immediately.
    #[default]
    InformationSchema,
    /// The account-wide view named by `catalog_view`. One query, but it can
    /// trail recent DDL by up to two hours.
    AccountUsage,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSource::InformationSchema => f.write_str("information_schema"),
            ReferenceSource::AccountUsage => f.write_str("account_usage"),
        }
    }
}

/// Which bindings the unset phase removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsetScope {
    /// Every binding of a managed policy the catalog currently reports,
    /// plus the desired bindings.
    #[default]
    Catalog,
    /// Only the desired bindings.
    Desired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Compare against the policy references of the expected policies.
    #[default]
    Catalog,
    /// Count a binding as present when its table exists.
    Probe,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Catalog => f.write_str("catalog"),
            VerifyMode::Probe => f.write_str("probe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub unset_scope: UnsetScope,
    pub verify_mode: VerifyMode,
    pub reference_source: ReferenceSource,
    /// Only read with [`ReferenceSource::AccountUsage`].
    pub catalog_view: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            unset_scope: UnsetScope::default(),
            verify_mode: VerifyMode::default(),
            reference_source: ReferenceSource::default(),
            catalog_view: DEFAULT_POLICY_REFERENCES_VIEW.to_string(),
        }
    }
}

/// Reconcile followed by verification, collected into one report.
pub struct MaskingDeployment {
    executor: CommandExecutor,
    context: SessionContext,
    options: ReconcileOptions,
}

impl MaskingDeployment {
    pub fn new(
        executor: CommandExecutor,
        context: SessionContext,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            executor,
            context,
            options,
        }
    }

    fn reconciler(&self) -> ObjectReconciler<'_> {
        ObjectReconciler::new(&self.executor, self.context.clone(), self.options.clone())
    }

    fn verifier(&self) -> Verifier<'_> {
        Verifier::new(&self.executor, self.context.clone(), self.options.clone())
    }

    /// Full cycle. With `verify` off the report has no verify phase.
    pub async fn run(&self, desired: &DesiredState, verify: bool) -> Result<DeploymentReport> {
        let reconciler = self.reconciler();
        let bindings = reconciler.resolve_bindings(desired).await?;
        let mut report = reconciler.reconcile_bindings(desired, &bindings).await?;

        if verify {
            let summary = self.verifier().verify(&desired.policies, &bindings).await?;
            report.extend(summary.outcomes());
            report.verification = Some(summary);
        }
        report.finish();
        Ok(report)
    }

    /// Verification only; nothing is changed.
    ///
    /// Bindings are checked against the configured list even when the desired
    /// state reads its bindings from the catalog, since the catalog is what is
    /// being checked.
    pub async fn verify_only(&self, desired: &DesiredState) -> Result<DeploymentReport> {
        self.executor.ensure_connected(&self.context).await?;

        let mut report = DeploymentReport::new();
        let bindings = desired.bindings.fixed_list();
        let summary = self.verifier().verify(&desired.policies, bindings).await?;
        report.extend(summary.outcomes());
        report.verification = Some(summary);
        report.finish();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockWarehouse;
    use crate::executor::Phase;
    use crate::policy::{known_policy_applications, BindingSource, ColumnBinding};
    use std::sync::Arc;

    fn deployment(warehouse: &Arc<MockWarehouse>) -> MaskingDeployment {
        MaskingDeployment::new(
            CommandExecutor::new(warehouse.clone()),
            SessionContext::new("ACCOUNTADMIN", "COMPUTE_WH", "PUBLIC_HEALTH_MODERNIZATION_DEMO"),
            ReconcileOptions::default(),
        )
    }

    #[test]
    fn test_options_deserialize_snake_case() {
        let scope: UnsetScope = serde_yaml::from_str("desired").unwrap();
        let mode: VerifyMode = serde_yaml::from_str("probe").unwrap();
        let source: ReferenceSource = serde_yaml::from_str("account_usage").unwrap();
        assert_eq!(scope, UnsetScope::Desired);
        assert_eq!(mode, VerifyMode::Probe);
        assert_eq!(source, ReferenceSource::AccountUsage);
        assert_eq!(
            ReconcileOptions::default().reference_source,
            ReferenceSource::InformationSchema
        );
        assert_eq!(
            ReconcileOptions::default().catalog_view,
            "SNOWFLAKE.ACCOUNT_USAGE.POLICY_REFERENCES"
        );
    }

    #[tokio::test]
    async fn test_run_appends_verification() {
        let warehouse = Arc::new(MockWarehouse::public_health());
        let report = deployment(&warehouse)
            .run(&DesiredState::public_health(), true)
            .await
            .unwrap();

        let summary = report.verification.as_ref().unwrap();
        assert!(summary.is_complete());
        assert_eq!(report.tally(Phase::Verify).failed(), 0);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_verify_only_leaves_warehouse_untouched() {
        let warehouse = Arc::new(MockWarehouse::public_health());
        let report = deployment(&warehouse)
            .verify_only(&DesiredState::public_health())
            .await
            .unwrap();

        let summary = report.verification.unwrap();
        assert_eq!(summary.expected_policies_found, 0);
        assert_eq!(summary.expected_bindings_found, 0);
        assert!(warehouse.snapshot().policies.is_empty());
        assert!(warehouse
            .executed_sql()
            .iter()
            .all(|sql| sql.starts_with("SHOW") || sql.starts_with("SELECT")));
    }

    #[tokio::test]
    async fn test_verify_only_with_catalog_bindings_checks_configured_list() {
        let warehouse = Arc::new(
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
                ),
        );
        let desired = DesiredState {
            bindings: BindingSource::Catalog {
                fallback: known_policy_applications(),
            },
            ..DesiredState::public_health()
        };

        let report = deployment(&warehouse)
            .verify_only(&desired)
            .await
            .unwrap();

        let summary = report.verification.as_ref().unwrap();
        assert_eq!(summary.expected_bindings, 4);
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
        assert!(report.has_failures());
    }
}
