//! Billing domain errors

use chrono::{DateTime, Utc};
use thiserror::Error;

use core_kernel::{ClientId, Money, MoneyError, PortError, TemporalError};

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed input such as a zero quantity or an empty period
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Traffic for a number that cannot carry it
    #[error("Phone number {number} is not accepting usage: {reason}")]
    ResourceInactive { number: String, reason: String },

    /// Usage timestamped inside a period that has already been invoiced
    #[error("Period closed for client {client_id}: {timestamp} is before {closed_through}")]
    PeriodClosed {
        client_id: ClientId,
        timestamp: DateTime<Utc>,
        closed_through: DateTime<Utc>,
    },

    /// A live invoice already covers the requested period
    #[error("Invoice {invoice_number} already covers this period")]
    DuplicatePeriod { invoice_number: String },

    /// Admission refused because the client would exceed the credit limit
    #[error("Credit limit exceeded: balance {current_balance} + {requested} > limit {credit_limit}")]
    CreditLimitExceeded {
        current_balance: Money,
        requested: Money,
        credit_limit: Money,
    },

    /// Operation not allowed in the entity's current state
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A concurrent writer changed the same records
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Temporal(#[from] TemporalError),

    /// Storage failure; nothing was committed
    #[error("Persistence failure: {0}")]
    Persistence(#[source] PortError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn resource_inactive(number: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::ResourceInactive {
            number: number.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Persistence(err) => err.is_transient(),
            BillingError::Conflict(_) => true,
            _ => false,
        }
    }
}

impl From<PortError> for BillingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } => BillingError::NotFound {
                entity: entity_type,
                id,
            },
            PortError::Conflict { message } => BillingError::Conflict(message),
            other => BillingError::Persistence(other),
        }
    }
}
