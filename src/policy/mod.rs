mod defaults;
mod types;

pub use defaults::{known_policy_applications, public_health_policies, DEFAULT_DATABASE};
pub use types::{ident_eq, ColumnBinding, PolicyDefinition, PolicyRef, TargetType};

/// Where the desired column bindings come from.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSource {
    /// A hard-coded list of `(schema, table, column, policy)` applications.
    Fixed(Vec<ColumnBinding>),
    /// Whatever the policy-reference catalog view reports for the managed
    /// policies before the run starts. `fallback` is used when that lookup fails.
    Catalog { fallback: Vec<ColumnBinding> },
}

impl BindingSource {
    pub fn fixed_list(&self) -> &[ColumnBinding] {
        match self {
            BindingSource::Fixed(list) => list,
            BindingSource::Catalog { fallback } => fallback,
        }
    }

    pub fn is_catalog(&self) -> bool {
        matches!(self, BindingSource::Catalog { .. })
    }
}

/// Desired policies and bindings for one run. Built fresh every time.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub policies: Vec<PolicyDefinition>,
    /// Managed names that are dropped and not recreated.
    pub retired: Vec<PolicyRef>,
    pub bindings: BindingSource,
}

impl DesiredState {
    pub fn new(policies: Vec<PolicyDefinition>, bindings: Vec<ColumnBinding>) -> Self {
        Self {
            policies,
            retired: Vec::new(),
            bindings: BindingSource::Fixed(bindings),
        }
    }

    pub fn public_health() -> Self {
        Self::new(public_health_policies(), known_policy_applications())
    }

    pub fn with_retired(mut self, retired: Vec<PolicyRef>) -> Self {
        self.retired = retired;
        self
    }

    /// Switches to catalog-derived bindings, keeping the current list as fallback.
    pub fn from_catalog(mut self) -> Self {
        let fallback = self.bindings.fixed_list().to_vec();
        self.bindings = BindingSource::Catalog { fallback };
        self
    }

    /// Desired policies followed by retired ones, without duplicates.
    pub fn managed_policies(&self) -> Vec<PolicyRef> {
        let mut managed: Vec<PolicyRef> = Vec::new();
        for policy in self
            .policies
            .iter()
            .map(PolicyDefinition::reference)
            .chain(self.retired.iter().cloned())
        {
            if !managed.contains(&policy) {
                managed.push(policy);
            }
        }
        managed
    }

    pub fn manages(&self, policy: &PolicyRef) -> bool {
        self.managed_policies().contains(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_health_defaults() {
        let desired = DesiredState::public_health();
        assert_eq!(desired.policies.len(), 3);
        assert_eq!(desired.bindings.fixed_list().len(), 4);
        assert!(desired.retired.is_empty());
    }

    #[test]
    fn test_managed_policies_include_retired_once() {
        let desired = DesiredState::public_health().with_retired(vec![
            PolicyRef::new("CURATED", "legacy_mask"),
            PolicyRef::new("curated", "ADDRESS_MASK"),
        ]);

        let managed = desired.managed_policies();
        assert_eq!(managed.len(), 4);
        assert_eq!(managed[3], PolicyRef::new("CURATED", "LEGACY_MASK"));
        assert!(desired.manages(&PolicyRef::new("DATA_MART", "population_mask")));
        assert!(!desired.manages(&PolicyRef::new("DATA_MART", "address_mask")));
    }

    #[test]
    fn test_from_catalog_keeps_fallback() {
        let desired = DesiredState::public_health().from_catalog();
        assert!(desired.bindings.is_catalog());
        assert_eq!(desired.bindings.fixed_list(), known_policy_applications().as_slice());
    }
}
