use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Override {operation} rejected: missing {field}")]
    MissingAuditField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("Invalid quarter {0}: must be between 1 and 4")]
    InvalidQuarter(u8),

    #[error("Invalid year {0}: must be between 1900 and 2200")]
    InvalidYear(i32),

    #[error("Identifier for {0} is empty after normalization")]
    EmptyIdentifier(&'static str),

    #[error("Contribution {0} is already recorded in the ledger")]
    DuplicateContribution(String),

    #[error("Invalid plan entry {category}/{indicator}: {details}")]
    InvalidPlan {
        category: String,
        indicator: String,
        details: String,
    },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("No aggregation exists for {0}")]
    NoAggregation(String),

    #[error("Override value {value} is not valid for a {indicator_type} indicator")]
    InvalidOverrideValue {
        value: String,
        indicator_type: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProgressError>;
