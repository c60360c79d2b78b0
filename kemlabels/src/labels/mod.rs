//! Shipping label domain: couriers, shipment payloads, the external label API client,
//! bulk spreadsheet parsing, archives and on-disk label storage.

pub mod archive;
pub mod provider;
pub mod spreadsheet;
pub mod storage;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use crate::config::CourierEndpoints;

/// Couriers the label API can issue labels for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum Courier {
    #[serde(rename = "USPS")]
    Usps,
    #[serde(rename = "UPS-US")]
    UpsUs,
    #[serde(rename = "UPS-CA")]
    UpsCa,
}

/// Where and how a courier's labels are requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierRoute {
    pub endpoint: String,
    pub country: Option<&'static str>,
    pub saturday_delivery: Option<bool>,
}

impl Courier {
    pub const ALL: [Courier; 3] = [Courier::Usps, Courier::UpsUs, Courier::UpsCa];

    pub fn as_str(&self) -> &'static str {
        match self {
            Courier::Usps => "USPS",
            Courier::UpsUs => "UPS-US",
            Courier::UpsCa => "UPS-CA",
        }
    }

    /// Carrier name used as the prefix of the provider's service class
    pub fn family(&self) -> &'static str {
        match self {
            Courier::Usps => "USPS",
            Courier::UpsUs | Courier::UpsCa => "UPS",
        }
    }

    pub fn route(&self, endpoints: &CourierEndpoints) -> CourierRoute {
        match self {
            Courier::Usps => CourierRoute {
                endpoint: endpoints.usps.clone(),
                country: None,
                saturday_delivery: None,
            },
            Courier::UpsUs => CourierRoute {
                endpoint: endpoints.ups_us.clone(),
                country: Some("US"),
                saturday_delivery: Some(false),
            },
            Courier::UpsCa => CourierRoute {
                endpoint: endpoints.ups_ca.clone(),
                country: Some("CA"),
                saturday_delivery: Some(false),
            },
        }
    }
}

impl fmt::Display for Courier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCourier(pub String);

impl FromStr for Courier {
    type Err = UnknownCourier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Courier::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownCourier(trimmed.to_string()))
    }
}

/// Build the provider's service class from the class type shown to customers.
///
/// `"Priority: 1-3 days"` for USPS becomes `"USPS Priority"`, and
/// `"USPS Priority Signature"` when a signature is required.
pub fn service_class(courier: Courier, class_type: &str, signature: bool) -> String {
    let name = class_type.split(':').next().unwrap_or_default().trim();
    let mut class = format!("{} {}", courier.family(), name);
    if signature {
        class.push_str(" Signature");
    }
    class
}

/// A postal address as the label API expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub name: String,
    pub phone: String,
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

/// Package dimensions (inches) and weight (pounds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Package {
    #[schema(value_type = String)]
    pub length: Decimal,
    #[schema(value_type = String)]
    pub width: Decimal,
    #[schema(value_type = String)]
    pub height: Decimal,
    #[schema(value_type = String)]
    pub weight: Decimal,
    #[serde(default)]
    pub description: String,
}

/// One shipment, ready to be sent to the label API.
#[derive(Debug, Clone, PartialEq)]
pub struct Shipment {
    pub courier: Courier,
    pub service_class: String,
    pub sender: Address,
    pub recipient: Address,
    pub package: Package,
    /// At most two reference numbers, in order
    pub references: Vec<String>,
}

/// Keep the non-empty reference numbers, in order, at most two.
pub fn collect_references<'a>(refs: impl IntoIterator<Item = Option<&'a str>>) -> Vec<String> {
    refs.into_iter()
        .flatten()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .take(2)
        .map(str::to_string)
        .collect()
}
