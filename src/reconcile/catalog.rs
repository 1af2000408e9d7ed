use super::ReferenceSource;
use crate::channel::{QueryResult, SessionContext};
use crate::error::Result;
use crate::executor::sql_builder;
use crate::executor::CommandExecutor;
use crate::policy::{ident_eq, ColumnBinding, PolicyRef};
use tracing::debug;

/// Read-only lookups against the warehouse catalog.
///
/// A lookup that fails at the statement level is indistinguishable from the
/// object being absent, so probes answer `false` and listings answer `None`.
/// Connection failures still propagate.
pub struct CatalogProbe<'a> {
    executor: &'a CommandExecutor,
    context: &'a SessionContext,
}

fn names_in(result: &QueryResult) -> Vec<String> {
    result
        .column_values("name")
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl<'a> CatalogProbe<'a> {
    pub fn new(executor: &'a CommandExecutor, context: &'a SessionContext) -> Self {
        Self { executor, context }
    }

    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let context = self.context.with_schema(schema);
        let exists = match self
            .executor
            .fetch_all(&context, &sql_builder::show_tables_like(table))
            .await?
        {
            Some(result) => names_in(&result).iter().any(|n| ident_eq(n, table)),
            None => false,
        };
        debug!(schema, table, exists, "table probe");
        Ok(exists)
    }

    pub async fn policy_exists(&self, policy: &PolicyRef) -> Result<bool> {
        let context = self.context.with_schema(&policy.schema);
        let exists = match self
            .executor
            .fetch_all(&context, &sql_builder::show_masking_policies_like(&policy.name))
            .await?
        {
            Some(result) => names_in(&result).iter().any(|n| ident_eq(n, &policy.name)),
            None => false,
        };
        debug!(policy = %policy, exists, "policy probe");
        Ok(exists)
    }

    /// Names of all masking policies in `schema`.
    pub async fn policies_in(&self, schema: &str) -> Result<Option<Vec<String>>> {
        let result = self
            .executor
            .fetch_all(self.context, &sql_builder::show_masking_policies_in(schema))
            .await?;
        Ok(result.as_ref().map(names_in))
    }

    /// Every masking-policy binding in `database` according to the
    /// account-wide policy-reference view.
    pub async fn masking_bindings(
        &self,
        view: &str,
        database: &str,
    ) -> Result<Option<Vec<ColumnBinding>>> {
        let sql = sql_builder::masking_policy_references(view, database);
        let Some(result) = self.executor.fetch_all(self.context, &sql).await? else {
            return Ok(None);
        };
        let bindings = bindings_in(&result);
        if bindings.is_none() {
            debug!(view, "policy reference view is missing expected columns");
        }
        Ok(bindings)
    }

    /// Current bindings of `policies`, read from `source`.
    ///
    /// A policy that does not exist has no bindings. `None` when any lookup
    /// fails, since a partial answer would under-report.
    pub async fn managed_bindings(
        &self,
        source: ReferenceSource,
        view: &str,
        database: &str,
        policies: &[PolicyRef],
    ) -> Result<Option<Vec<ColumnBinding>>> {
        if source == ReferenceSource::AccountUsage {
            let found = self.masking_bindings(view, database).await?;
            return Ok(found.map(|all| {
                all.into_iter()
                    .filter(|b| policies.contains(&b.policy_ref()))
                    .collect()
            }));
        }

        let mut bindings = Vec::new();
        for policy in policies {
            if !self.policy_exists(policy).await? {
                continue;
            }
            let context = self.context.with_schema(&policy.schema);
            let sql = sql_builder::policy_references_for(database, policy);
            let found = match self.executor.fetch_all(&context, &sql).await? {
                Some(result) => bindings_in(&result),
                None => None,
            };
            let Some(found) = found else {
                debug!(policy = %policy, "policy reference lookup failed");
                return Ok(None);
            };
            bindings.extend(found);
        }
        debug!(%source, count = bindings.len(), "current bindings");
        Ok(Some(bindings))
    }
}

/// Rows of a policy-reference listing as bindings. `None` when a column is
/// missing.
fn bindings_in(result: &QueryResult) -> Option<Vec<ColumnBinding>> {
    let column = |name: &str| result.column_index(name);
    let ps = column("policy_schema")?;
    let pn = column("policy_name")?;
    let rs = column("ref_schema_name")?;
    let rt = column("ref_entity_name")?;
    let rc = column("ref_column_name")?;

    let bindings = result
        .rows
        .iter()
        .filter_map(|row| {
            let policy_schema = row.get(ps)?;
            let policy_name = row.get(pn)?;
            let schema = row.get(rs)?;
            let policy = if ident_eq(policy_schema, schema) {
                policy_name.clone()
            } else {
                format!("{policy_schema}.{policy_name}")
            };
            Some(ColumnBinding::new(
                schema.clone(),
                row.get(rt)?.clone(),
                row.get(rc)?.clone(),
                policy,
            ))
        })
        .collect();
    Some(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockWarehouse;
    use std::sync::Arc;

    fn context() -> SessionContext {
        SessionContext::new("ACCOUNTADMIN", "COMPUTE_WH", "PUBLIC_HEALTH_MODERNIZATION_DEMO")
    }

    #[tokio::test]
    async fn test_table_probe_is_exact_match() {
        let warehouse = MockWarehouse::public_health().with_table(
            "CURATED",
            "curatedXhealth_indicators",
            &[("id", "STRING")],
        );
        warehouse.drop_table("CURATED", "curated_health_indicators");
        let executor = CommandExecutor::new(Arc::new(warehouse));
        let ctx = context();
        let probe = CatalogProbe::new(&executor, &ctx);

        // `_` is a LIKE wildcard; only an exact name counts.
        assert!(!probe
            .table_exists("CURATED", "curated_health_indicators")
            .await
            .unwrap());
        assert!(probe
            .table_exists("curated", "CURATED_ENVIRONMENTAL_DATA")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_probe_failure_reads_as_absent() {
        let executor = CommandExecutor::new(Arc::new(MockWarehouse::public_health()));
        let ctx = context();
        let probe = CatalogProbe::new(&executor, &ctx);

        assert!(!probe.table_exists("NO_SUCH_SCHEMA", "t").await.unwrap());
        assert!(!probe
            .policy_exists(&PolicyRef::new("NO_SUCH_SCHEMA", "p"))
            .await
            .unwrap());
        assert!(probe.policies_in("NO_SUCH_SCHEMA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_masking_bindings_qualify_foreign_policies() {
        let warehouse = MockWarehouse::public_health()
            .with_schema("SHARED")
            .with_policy("SHARED", "address_mask", "STRING", "val")
            .with_policy("CURATED", "coordinate_mask", "FLOAT", "val")
            .with_binding(
                "CURATED",
                "curated_environmental_data",
                "facility_address",
                "SHARED.address_mask",
            )
            .with_binding(
                "CURATED",
                "curated_health_indicators",
                "latitude",
                "coordinate_mask",
            );
        let executor = CommandExecutor::new(Arc::new(warehouse));
        let ctx = context();
        let probe = CatalogProbe::new(&executor, &ctx);

        let bindings = probe
            .masking_bindings(
                sql_builder::DEFAULT_POLICY_REFERENCES_VIEW,
                "PUBLIC_HEALTH_MODERNIZATION_DEMO",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bindings.len(), 2);
        assert!(bindings.contains(&ColumnBinding::new(
            "CURATED",
            "curated_environmental_data",
            "facility_address",
            "SHARED.address_mask"
        )));
        assert!(bindings.contains(&ColumnBinding::new(
            "CURATED",
            "curated_health_indicators",
            "latitude",
            "coordinate_mask"
        )));
    }

    #[tokio::test]
    async fn test_managed_bindings_read_each_policy_in_real_time() {
        let warehouse = MockWarehouse::public_health()
            .with_policy("CURATED", "coordinate_mask", "FLOAT", "val")
            .with_policy("CURATED", "address_mask", "STRING", "val")
            .with_binding(
                "CURATED",
                "curated_health_indicators",
                "latitude",
                "coordinate_mask",
            )
            .with_binding(
                "CURATED",
                "curated_environmental_data",
                "facility_address",
                "address_mask",
            );
        let warehouse = Arc::new(warehouse);
        let executor = CommandExecutor::new(warehouse.clone());
        let ctx = context();
        let probe = CatalogProbe::new(&executor, &ctx);

        let policies = vec![
            PolicyRef::new("CURATED", "coordinate_mask"),
            PolicyRef::new("DATA_MART", "population_mask"),
        ];
        let bindings = probe
            .managed_bindings(
                ReferenceSource::InformationSchema,
                sql_builder::DEFAULT_POLICY_REFERENCES_VIEW,
                "PUBLIC_HEALTH_MODERNIZATION_DEMO",
                &policies,
            )
            .await
            .unwrap()
            .unwrap();

        // The absent policy is skipped rather than failing the lookup.
        assert_eq!(
            bindings,
            vec![ColumnBinding::new(
                "CURATED",
                "curated_health_indicators",
                "latitude",
                "coordinate_mask"
            )]
        );
        assert!(!warehouse
            .executed_sql()
            .iter()
            .any(|sql| sql.contains("ACCOUNT_USAGE")));
    }

    #[tokio::test]
    async fn test_managed_bindings_fail_as_a_whole() {
        let warehouse = MockWarehouse::public_health()
            .with_policy("CURATED", "coordinate_mask", "FLOAT", "val");
        warehouse.fail_statements_matching("INFORMATION_SCHEMA.POLICY_REFERENCES");
        let executor = CommandExecutor::new(Arc::new(warehouse));
        let ctx = context();
        let probe = CatalogProbe::new(&executor, &ctx);

        let bindings = probe
            .managed_bindings(
                ReferenceSource::InformationSchema,
                sql_builder::DEFAULT_POLICY_REFERENCES_VIEW,
                "PUBLIC_HEALTH_MODERNIZATION_DEMO",
                &[PolicyRef::new("CURATED", "coordinate_mask")],
            )
            .await
            .unwrap();
        assert!(bindings.is_none());
    }
}
