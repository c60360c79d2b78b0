//! API response models for orders. Order submissions use [`crate::orders::SingleOrder`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{db::models::users::ContactDetails, labels::Courier};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SenderInfoResponse {
    pub sender_info: Option<ContactDetails>,
}

/// Effective per-label price for each courier
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricingResponse {
    #[schema(value_type = BTreeMap<String, String>)]
    pub prices: BTreeMap<Courier, Decimal>,
}
