//! Engine configuration.
//!
//! Defaults follow the privacy settings of the consent vault: academic data
//! is consented for a year, personal information for six months and contact
//! details for three months.

use std::{collections::HashSet, time::Duration};

use crate::governance::infrastructure::naming::{DataCategory, DataType};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default notification channel capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    /// Consent duration applied when a grant does not carry one.
    pub academic_ttl: Duration,
    pub personal_ttl: Duration,
    pub contact_ttl: Duration,
    /// Data types whose requests an administrator may resolve on behalf of
    /// the subject.
    pub admin_delegated: HashSet<DataType>,
    /// Capacity of the broadcast channel feeding the notification sink.
    pub notification_capacity: usize,
    /// Period of the eager expiry sweep, disabled when `None`.
    pub sweep_interval: Option<Duration>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            academic_ttl: DAY * 365,
            personal_ttl: DAY * 180,
            contact_ttl: DAY * 90,
            admin_delegated: DataType::ALL.into_iter().collect(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            sweep_interval: None,
        }
    }
}

impl GovernanceConfig {
    pub fn default_ttl(&self, data_type: DataType) -> Duration {
        match data_type.category() {
            DataCategory::Academic => self.academic_ttl,
            DataCategory::Personal => self.personal_ttl,
            DataCategory::Contact => self.contact_ttl,
        }
    }

    /// Whether an administrator may review every data type of `scope`.
    pub fn is_delegated<'a>(&self, mut scope: impl Iterator<Item = &'a DataType>) -> bool {
        scope.all(|data_type| self.admin_delegated.contains(data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_config_default_ttl_per_category() {
        let config = GovernanceConfig::default();
        assert_eq!(config.default_ttl(DataType::AcademicRecords), DAY * 365);
        assert_eq!(config.default_ttl(DataType::Transcript), DAY * 365);
        assert_eq!(config.default_ttl(DataType::PersonalInfo), DAY * 180);
        assert_eq!(config.default_ttl(DataType::ContactInfo), DAY * 90);
    }

    #[test]
    fn unit_config_delegation() {
        let mut config = GovernanceConfig::default();
        assert!(config.is_delegated([DataType::Resume, DataType::ContactInfo].iter()));
        config.admin_delegated.remove(&DataType::ContactInfo);
        assert!(!config.is_delegated([DataType::Resume, DataType::ContactInfo].iter()));
        assert!(config.is_delegated([DataType::Resume].iter()));
    }
}
