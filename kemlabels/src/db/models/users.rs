//! Database models for users.

use crate::labels::{Address, Courier};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Per-courier unit prices negotiated for one user
pub type CustomPricing = BTreeMap<Courier, Decimal>;

/// Contact and address details as entered on the order form.
///
/// Used for both sender and recipient; a user's saved sender details have the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContactDetails {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone: String,
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl ContactDetails {
    /// The label API takes a single name field
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim()).trim().to_string()
    }

    pub fn to_address(&self) -> Address {
        Address {
            name: self.full_name(),
            phone: self.phone.trim().to_string(),
            street: self.street.trim().to_string(),
            suite: self.suite.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            zip: self.zip.trim().to_string(),
            country: self.country.trim().to_string(),
        }
    }

    /// Name of the first required field that is blank, if any
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("first_name", &self.first_name),
            ("phone", &self.phone),
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip),
            ("country", &self.country),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Database response for a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserDBResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub credits: Decimal,
    pub verified: bool,
    pub custom_pricing: CustomPricing,
    pub sender_info: Option<ContactDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactDetails {
        ContactDetails {
            first_name: " Jane ".to_string(),
            last_name: "Doe".to_string(),
            phone: "555".to_string(),
            street: "1 Main St".to_string(),
            suite: Some("  ".to_string()),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip: "62701".to_string(),
            country: "US".to_string(),
        }
    }

    #[test]
    fn test_full_name_joins_first_and_last() {
        assert_eq!(contact().full_name(), "Jane Doe");
        let no_last = ContactDetails {
            last_name: String::new(),
            ..contact()
        };
        assert_eq!(no_last.full_name(), "Jane");
    }

    #[test]
    fn test_blank_suite_is_dropped() {
        assert_eq!(contact().to_address().suite, None);
    }

    #[test]
    fn test_first_missing_field() {
        assert_eq!(contact().first_missing_field(), None);
        let missing = ContactDetails {
            city: " ".to_string(),
            ..contact()
        };
        assert_eq!(missing.first_missing_field(), Some("city"));
    }
}
