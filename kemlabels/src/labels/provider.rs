//! Client for the external label API.
//!
//! One call issues one label. The request carries a fresh correlation id so the
//! provider's logs can be matched against ours; the response is a JSON document with a
//! `status` discriminator and, on success, base64-encoded PDFs.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::{Address, CourierRoute, Package, Shipment};
use crate::config::LabelProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum LabelProviderError {
    #[error("label API request failed: {0}")]
    Request(String),

    #[error("label API rejected the shipment: {message}")]
    Rejected { message: String },

    #[error("label API response was invalid: {0}")]
    InvalidResponse(String),
}

/// A label as returned by the provider, PDFs already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedLabel {
    pub tracking_number: String,
    pub label_pdf: Vec<u8>,
    pub receipt_pdf: Option<Vec<u8>>,
}

/// Issues shipping labels.
#[async_trait]
pub trait LabelProvider: Send + Sync {
    async fn create_label(&self, shipment: &Shipment) -> Result<IssuedLabel, LabelProviderError>;
}

/// Request body sent to the label API.
#[derive(Debug, Serialize)]
pub struct LabelRequest<'a> {
    pub correlation_id: Uuid,
    pub class: &'a str,
    pub from: &'a Address,
    pub to: &'a Address,
    pub package: &'a Package,
    pub references: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturday_delivery: Option<bool>,
}

impl<'a> LabelRequest<'a> {
    pub fn new(shipment: &'a Shipment, route: &CourierRoute) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            class: &shipment.service_class,
            from: &shipment.sender,
            to: &shipment.recipient,
            package: &shipment.package,
            references: &shipment.references,
            country: route.country,
            saturday_delivery: route.saturday_delivery,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tracking_number: Option<String>,
    #[serde(default)]
    label_pdf: Option<String>,
    #[serde(default)]
    receipt_pdf: Option<String>,
}

impl LabelResponse {
    fn into_label(self) -> Result<IssuedLabel, LabelProviderError> {
        if self.status != "success" {
            return Err(LabelProviderError::Rejected {
                message: self.message.unwrap_or_else(|| format!("status {}", self.status)),
            });
        }

        let tracking_number = self
            .tracking_number
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LabelProviderError::InvalidResponse("missing tracking_number".to_string()))?;
        let label_pdf = self
            .label_pdf
            .ok_or_else(|| LabelProviderError::InvalidResponse("missing label_pdf".to_string()))
            .and_then(|b64| decode_pdf("label_pdf", &b64))?;
        let receipt_pdf = self.receipt_pdf.map(|b64| decode_pdf("receipt_pdf", &b64)).transpose()?;

        Ok(IssuedLabel {
            tracking_number,
            label_pdf,
            receipt_pdf,
        })
    }
}

fn decode_pdf(field: &str, b64: &str) -> Result<Vec<u8>, LabelProviderError> {
    general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| LabelProviderError::InvalidResponse(format!("{field} is not valid base64: {e}")))
}

/// Label API over HTTPS with a bearer API key.
#[derive(Debug, Clone)]
pub struct HttpLabelProvider {
    http: Client,
    config: LabelProviderConfig,
}

impl HttpLabelProvider {
    pub fn new(config: LabelProviderConfig) -> Result<Self, LabelProviderError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LabelProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint_url(&self, path: &str) -> Result<Url, LabelProviderError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| LabelProviderError::Request(format!("invalid endpoint {path}: {e}")))
    }
}

#[async_trait]
impl LabelProvider for HttpLabelProvider {
    #[instrument(skip_all, fields(courier = %shipment.courier, class = %shipment.service_class, correlation_id = tracing::field::Empty), err)]
    async fn create_label(&self, shipment: &Shipment) -> Result<IssuedLabel, LabelProviderError> {
        let route = shipment.courier.route(&self.config.endpoints);
        let url = self.endpoint_url(&route.endpoint)?;
        let request = LabelRequest::new(shipment, &route);
        tracing::Span::current().record("correlation_id", tracing::field::display(request.correlation_id));

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LabelProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LabelProviderError::Request(e.to_string()))?;
        debug!(%status, bytes = body.len(), "Label API responded");

        match serde_json::from_str::<LabelResponse>(&body) {
            Ok(parsed) if status.is_success() => parsed.into_label(),
            Ok(parsed) => Err(LabelProviderError::Rejected {
                message: parsed.message.unwrap_or_else(|| format!("HTTP {status}")),
            }),
            Err(_) if !status.is_success() => Err(LabelProviderError::Rejected {
                message: format!("HTTP {status}"),
            }),
            Err(e) => Err(LabelProviderError::InvalidResponse(e.to_string())),
        }
    }
}
