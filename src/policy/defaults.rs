use super::{ColumnBinding, PolicyDefinition, TargetType};

pub const DEFAULT_DATABASE: &str = "PUBLIC_HEALTH_MODERNIZATION_DEMO";

const ADDRESS_MASK_BODY: &str = "CASE
    WHEN CURRENT_ROLE() IN ('DATA_ENGINEER_ROLE') THEN val
    WHEN CURRENT_ROLE() IN ('DATA_ANALYST_ROLE') THEN CONCAT(LEFT(val, 10), '*** [MASKED] ***')
    ELSE '[REDACTED]'
END";

const COORDINATE_MASK_BODY: &str = "CASE
    WHEN CURRENT_ROLE() IN ('DATA_ENGINEER_ROLE') THEN val
    WHEN CURRENT_ROLE() IN ('DATA_ANALYST_ROLE') THEN ROUND(val, 2)
    ELSE NULL
END";

const POPULATION_MASK_BODY: &str = "CASE
    WHEN CURRENT_ROLE() IN ('DATA_ENGINEER_ROLE', 'DATA_ANALYST_ROLE') THEN val
    ELSE ROUND(val, -3)
END";

/// Masking policies of the public-health pipeline.
pub fn public_health_policies() -> Vec<PolicyDefinition> {
    vec![
        PolicyDefinition::new("CURATED", "address_mask", TargetType::String, ADDRESS_MASK_BODY),
        PolicyDefinition::new(
            "CURATED",
            "coordinate_mask",
            TargetType::Float,
            COORDINATE_MASK_BODY,
        ),
        PolicyDefinition::new(
            "DATA_MART",
            "population_mask",
            TargetType::Integer,
            POPULATION_MASK_BODY,
        ),
    ]
}

/// Fixed list of known policy applications.
pub fn known_policy_applications() -> Vec<ColumnBinding> {
    vec![
        ColumnBinding::new(
            "CURATED",
            "curated_environmental_data",
            "facility_address",
            "address_mask",
        ),
        ColumnBinding::new(
            "CURATED",
            "curated_health_indicators",
            "latitude",
            "coordinate_mask",
        ),
        ColumnBinding::new(
            "CURATED",
            "curated_health_indicators",
            "longitude",
            "coordinate_mask",
        ),
        ColumnBinding::new(
            "DATA_MART",
            "public_health_dashboard",
            "total_population",
            "population_mask",
        ),
    ]
}
