//! Number inventory
//!
//! Numbers a client can provision come from a carrier inventory. Only the
//! billing side of provisioning is modelled: the engine searches the pool,
//! reserves a number for the duration of the provisioning commit, and hands
//! it back if the commit fails or the number is later released.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{DomainPort, PortError};

use crate::phone_number::{Capabilities, NumberType};
use crate::rating::RateCard;

const DEFAULT_SEARCH_LIMIT: usize = 20;

/// A number that can be provisioned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableNumber {
    pub number: String,
    pub number_type: NumberType,
    pub region: String,
    pub capabilities: Capabilities,
    /// List price per month
    pub monthly_fee: Decimal,
}

impl AvailableNumber {
    /// Area code for North American numbers, toll-free prefix otherwise
    pub fn area_code(&self) -> Option<&str> {
        self.number.strip_prefix("+1").and_then(|rest| rest.get(..3))
    }
}

/// Filters for an inventory search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSearch {
    pub area_code: Option<String>,
    /// Digits that must appear somewhere in the number
    pub contains: Option<String>,
    pub number_type: Option<NumberType>,
    pub limit: Option<usize>,
}

impl NumberSearch {
    pub fn matches(&self, candidate: &AvailableNumber) -> bool {
        if let Some(area_code) = &self.area_code {
            if candidate.area_code() != Some(area_code.as_str()) {
                return false;
            }
        }
        if let Some(digits) = &self.contains {
            if !candidate.number.contains(digits.as_str()) {
                return false;
            }
        }
        self.number_type.map_or(true, |t| t == candidate.number_type)
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 100)
    }
}

/// Port to the carrier's pool of unassigned numbers
#[async_trait]
pub trait NumberInventory: DomainPort {
    async fn search(&self, search: &NumberSearch) -> Result<Vec<AvailableNumber>, PortError>;

    /// Takes a number out of the pool
    ///
    /// `NotFound` if the pool does not hold it.
    async fn reserve(&self, number: &str) -> Result<AvailableNumber, PortError>;

    /// Returns a number to the pool
    async fn release_to_pool(&self, number: AvailableNumber) -> Result<(), PortError>;
}

/// Inventory backed by a fixed in-process pool
#[derive(Debug, Default)]
pub struct StaticNumberInventory {
    pool: RwLock<BTreeMap<String, AvailableNumber>>,
}

impl StaticNumberInventory {
    pub fn new(numbers: impl IntoIterator<Item = AvailableNumber>) -> Self {
        let pool = numbers.into_iter().map(|n| (n.number.clone(), n)).collect();
        Self { pool: RwLock::new(pool) }
    }

    /// A pool of local, mobile and toll-free numbers priced from `card`
    pub fn seeded(card: &RateCard) -> Self {
        let mut numbers = Vec::new();
        for (area_code, region) in [("415", "San Francisco, CA"), ("212", "New York, NY"), ("312", "Chicago, IL")] {
            for line in 0..10u32 {
                numbers.push(AvailableNumber {
                    number: format!("+1{area_code}555{:04}", 100 + line),
                    number_type: NumberType::Local,
                    region: region.to_string(),
                    capabilities: Capabilities::all(),
                    monthly_fee: card.monthly_fee_for(NumberType::Local),
                });
            }
            for line in 0..5u32 {
                numbers.push(AvailableNumber {
                    number: format!("+1{area_code}777{:04}", 200 + line),
                    number_type: NumberType::Mobile,
                    region: region.to_string(),
                    capabilities: Capabilities::default(),
                    monthly_fee: card.monthly_fee_for(NumberType::Mobile),
                });
            }
        }
        for prefix in ["800", "888"] {
            for line in 0..5u32 {
                numbers.push(AvailableNumber {
                    number: format!("+1{prefix}555{:04}", 300 + line),
                    number_type: NumberType::TollFree,
                    region: "US".to_string(),
                    capabilities: Capabilities::voice_only(),
                    monthly_fee: card.monthly_fee_for(NumberType::TollFree),
                });
            }
        }
        Self::new(numbers)
    }

    pub fn len(&self) -> usize {
        self.pool.read().map(|pool| pool.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DomainPort for StaticNumberInventory {}

#[async_trait]
impl NumberInventory for StaticNumberInventory {
    async fn search(&self, search: &NumberSearch) -> Result<Vec<AvailableNumber>, PortError> {
        let pool = self
            .pool
            .read()
            .map_err(|_| PortError::internal("inventory lock poisoned"))?;
        Ok(pool
            .values()
            .filter(|candidate| search.matches(candidate))
            .take(search.effective_limit())
            .cloned()
            .collect())
    }

    async fn reserve(&self, number: &str) -> Result<AvailableNumber, PortError> {
        let mut pool = self
            .pool
            .write()
            .map_err(|_| PortError::internal("inventory lock poisoned"))?;
        pool.remove(number)
            .ok_or_else(|| PortError::not_found("AvailableNumber", number))
    }

    async fn release_to_pool(&self, number: AvailableNumber) -> Result<(), PortError> {
        let mut pool = self
            .pool
            .write()
            .map_err(|_| PortError::internal("inventory lock poisoned"))?;
        pool.insert(number.number.clone(), number);
        Ok(())
    }
}
