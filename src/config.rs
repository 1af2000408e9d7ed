use crate::channel::{SessionContext, TokenType};
use crate::error::{Result, SfDriftError};
use crate::executor::sql_builder::DEFAULT_POLICY_REFERENCES_VIEW;
use crate::policy::{
    ident_eq, known_policy_applications, public_health_policies, BindingSource, ColumnBinding,
    DesiredState, PolicyDefinition, PolicyRef, DEFAULT_DATABASE,
};
use crate::reconcile::{ReconcileOptions, ReferenceSource, UnsetScope, VerifyMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROLE: &str = "ACCOUNTADMIN";
pub const DEFAULT_WAREHOUSE: &str = "COMPUTE_WH";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Everything needed to open a warehouse session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub account: String,
    pub token: String,
    pub token_type: TokenType,
    pub role: String,
    pub warehouse: String,
    pub database: String,
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(&self.role, &self.warehouse, &self.database)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            return Err(SfDriftError::Config("account identifier is required".to_string()));
        }
        if self.token.trim().is_empty() {
            return Err(SfDriftError::Config("access token is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSourceKind {
    #[default]
    Fixed,
    Catalog,
}

/// Desired masking state as written in `masking.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub reference_source: ReferenceSource,
    #[serde(default = "default_catalog_view")]
    pub catalog_view: String,
    #[serde(default)]
    pub binding_source: BindingSourceKind,
    #[serde(default)]
    pub unset_scope: UnsetScope,
    #[serde(default)]
    pub verify_mode: VerifyMode,
    #[serde(default)]
    pub policies: Vec<PolicyDefinition>,
    #[serde(default)]
    pub retired_policies: Vec<PolicyRef>,
    #[serde(default)]
    pub bindings: Vec<ColumnBinding>,
}

fn default_catalog_view() -> String {
    DEFAULT_POLICY_REFERENCES_VIEW.to_string()
}

impl MaskingConfig {
    pub fn public_health_defaults() -> Self {
        Self {
            database: Some(DEFAULT_DATABASE.to_string()),
            reference_source: ReferenceSource::default(),
            catalog_view: default_catalog_view(),
            binding_source: BindingSourceKind::default(),
            unset_scope: UnsetScope::default(),
            verify_mode: VerifyMode::default(),
            policies: public_health_policies(),
            retired_policies: Vec::new(),
            bindings: known_policy_applications(),
        }
    }

    /// `<config dir>/sfdrift/masking.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sfdrift").join("masking.yaml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SfDriftError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Explicit path, then the default location, then the built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => Self::load(default),
            _ => Ok(Self::public_health_defaults()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: MaskingConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, policy) in self.policies.iter().enumerate() {
            if policy.name.trim().is_empty() || policy.schema.trim().is_empty() {
                return Err(SfDriftError::Config(format!(
                    "policy #{} needs both a schema and a name",
                    idx + 1
                )));
            }
            if policy.body.trim().is_empty() {
                return Err(SfDriftError::Config(format!(
                    "policy {} has an empty body",
                    policy.reference()
                )));
            }
            let reference = policy.reference();
            if self.policies[..idx].iter().any(|p| p.reference() == reference) {
                return Err(SfDriftError::Config(format!(
                    "policy {reference} is defined more than once"
                )));
            }
            if self.retired_policies.contains(&reference) {
                return Err(SfDriftError::Config(format!(
                    "policy {reference} is both desired and retired"
                )));
            }
        }

        for (idx, binding) in self.bindings.iter().enumerate() {
            if [&binding.schema, &binding.table, &binding.column, &binding.policy]
                .iter()
                .any(|part| part.trim().is_empty())
            {
                return Err(SfDriftError::Config(format!(
                    "binding #{} has an empty schema, table, column or policy",
                    idx + 1
                )));
            }
            let bound_twice = self.bindings[..idx].iter().any(|b| {
                ident_eq(&b.schema, &binding.schema)
                    && ident_eq(&b.table, &binding.table)
                    && ident_eq(&b.column, &binding.column)
            });
            if bound_twice {
                return Err(SfDriftError::Config(format!(
                    "column {} is bound more than once",
                    binding.target()
                )));
            }
        }
        Ok(())
    }

    pub fn desired_state(&self) -> DesiredState {
        let bindings = match self.binding_source {
            BindingSourceKind::Fixed => BindingSource::Fixed(self.bindings.clone()),
            BindingSourceKind::Catalog => BindingSource::Catalog {
                fallback: self.bindings.clone(),
            },
        };
        DesiredState {
            policies: self.policies.clone(),
            retired: self.retired_policies.clone(),
            bindings,
        }
    }

    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            unset_scope: self.unset_scope,
            verify_mode: self.verify_mode,
            reference_source: self.reference_source,
            catalog_view: self.catalog_view.clone(),
        }
    }
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self::public_health_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TargetType;
    use tempfile::TempDir;

    const YAML: &str = r#"
database: PUBLIC_HEALTH_MODERNIZATION_DEMO
binding_source: catalog
unset_scope: desired
policies:
  - schema: CURATED
    name: address_mask
    target_type: STRING
    body: |
      CASE WHEN CURRENT_ROLE() = 'ACCOUNTADMIN' THEN val ELSE '[REDACTED]' END
retired_policies:
  - schema: CURATED
    name: legacy_mask
bindings:
  - schema: CURATED
    table: curated_environmental_data
    column: facility_address
    policy: address_mask
"#;

    #[test]
    fn test_parse_yaml() {
        let config = MaskingConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].target_type, TargetType::String);
        assert_eq!(config.unset_scope, UnsetScope::Desired);
        assert_eq!(config.verify_mode, VerifyMode::Catalog);
        assert_eq!(config.catalog_view, DEFAULT_POLICY_REFERENCES_VIEW);
        assert_eq!(config.reference_source, ReferenceSource::InformationSchema);

        let desired = config.desired_state();
        assert!(desired.bindings.is_catalog());
        assert_eq!(desired.retired, vec![PolicyRef::new("CURATED", "legacy_mask")]);
    }

    #[test]
    fn test_account_usage_source_reaches_options() {
        let config = MaskingConfig::from_yaml("reference_source: account_usage\n").unwrap();
        assert_eq!(config.options().reference_source, ReferenceSource::AccountUsage);
    }

    #[test]
    fn test_rejects_duplicate_policy() {
        let yaml = r#"
policies:
  - { schema: CURATED, name: address_mask, target_type: STRING, body: val }
  - { schema: curated, name: ADDRESS_MASK, target_type: STRING, body: val }
"#;
        let err = MaskingConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_column_bound_twice() {
        let yaml = r#"
bindings:
  - { schema: CURATED, table: t, column: c, policy: p1 }
  - { schema: CURATED, table: T, column: C, policy: p2 }
"#;
        assert!(matches!(
            MaskingConfig::from_yaml(yaml),
            Err(SfDriftError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_retired_desired_overlap() {
        let yaml = r#"
policies:
  - { schema: CURATED, name: address_mask, target_type: STRING, body: val }
retired_policies:
  - { schema: CURATED, name: address_mask }
"#;
        assert!(MaskingConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let yaml = r#"
policies:
  - { schema: CURATED, name: flag_mask, target_type: BOOLEAN, body: val }
"#;
        assert!(matches!(
            MaskingConfig::from_yaml(yaml),
            Err(SfDriftError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("masking.yaml");
        fs::write(&path, YAML).unwrap();

        let config = MaskingConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.bindings.len(), 1);

        let missing = MaskingConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, SfDriftError::Config(_)));
    }

    #[test]
    fn test_defaults_match_public_health() {
        let config = MaskingConfig::public_health_defaults();
        config.validate().unwrap();
        assert_eq!(config.desired_state(), DesiredState::public_health());
        assert_eq!(config.options(), ReconcileOptions::default());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let sample =
            MaskingConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/masking.yaml"))
                .unwrap();
        let defaults = MaskingConfig::public_health_defaults();

        assert_eq!(sample.bindings, defaults.bindings);
        assert_eq!(sample.options(), defaults.options());
        for (loaded, builtin) in sample.policies.iter().zip(&defaults.policies) {
            assert_eq!(loaded.reference(), builtin.reference());
            assert_eq!(loaded.target_type, builtin.target_type);
            assert_eq!(loaded.body.trim(), builtin.body.trim());
        }
    }

    #[test]
    fn test_connection_validation() {
        let config = ConnectionConfig {
            account: "xy12345.us-east-1".to_string(),
            token: String::new(),
            token_type: TokenType::OAuth,
            role: DEFAULT_ROLE.to_string(),
            warehouse: DEFAULT_WAREHOUSE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        assert!(config.validate().is_err());
        assert_eq!(
            config.session_context().database.as_deref(),
            Some(DEFAULT_DATABASE)
        );
    }
}
