//! Label orders for the signed-in user: single and bulk purchases, saved sender details and prices.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::models::{
        orders::{PricingResponse, SenderInfoResponse},
        users::CurrentUser,
    },
    auth::current_user::{VerifiedUser, load_user},
    errors::{Error, Result},
    orders::{OrderReceipt, OrderService, SingleOrder},
    types::abbrev_uuid,
};

/// Content type accepted for bulk order workbooks
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Body allowance on top of the workbook limit for multipart framing
pub const MULTIPART_OVERHEAD: usize = 16 * 1024;

fn multipart_error(err: MultipartError, limit: usize) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::Validation {
            message: format!("Failed to parse multipart data: {}", err.body_text()),
        }
    }
}

/// Buy one shipping label
#[utoipa::path(
    post,
    path = "/order/label/single",
    tag = "orders",
    request_body = SingleOrder,
    responses(
        (status = 200, description = "Label issued, billed and emailed", body = OrderReceipt),
        (status = 400, description = "Invalid order or insufficient credit", body = crate::errors::ErrorBody),
        (status = 403, description = "Email not verified", body = crate::errors::ErrorBody),
        (status = 500, description = "Label provider failure", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)))]
pub async fn create_single_order(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Json(order): Json<SingleOrder>,
) -> Result<Json<OrderReceipt>> {
    let receipt = OrderService::new(&state).place_single_order(&user, order).await?;
    Ok(Json(receipt))
}

/// Buy every label in an uploaded xlsx workbook, billed as one order
#[utoipa::path(
    post,
    path = "/order/label/bulk",
    tag = "orders",
    request_body(
        content_type = "multipart/form-data",
        description = "Workbook in the `file` field"
    ),
    responses(
        (status = 200, description = "Labels issued, billed and emailed as a ZIP archive", body = OrderReceipt),
        (status = 400, description = "Invalid workbook or insufficient credit", body = crate::errors::ErrorBody),
        (status = 403, description = "Email not verified", body = crate::errors::ErrorBody),
        (status = 413, description = "Workbook too large", body = crate::errors::ErrorBody),
        (status = 500, description = "Label provider failure", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)))]
pub async fn create_bulk_order(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    mut multipart: Multipart,
) -> Result<Json<OrderReceipt>> {
    let limit = state.config.orders.bulk_upload_max_bytes;
    let mut workbook: Option<Vec<u8>> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        if field.name() != Some("file") {
            continue;
        }
        if field.content_type() != Some(XLSX_MIME) {
            return Err(Error::Validation {
                message: "Bulk orders must be uploaded as an .xlsx workbook".to_string(),
            });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            bytes.extend_from_slice(&chunk);
            // Fail fast once the file alone is over the limit
            if bytes.len() > limit {
                warn!(limit, "Bulk workbook exceeds upload limit");
                return Err(Error::PayloadTooLarge { limit });
            }
        }
        workbook = Some(bytes);
    }

    let workbook = workbook.ok_or_else(|| Error::MissingData {
        field: "file".to_string(),
    })?;
    info!(bytes = workbook.len(), "Bulk workbook received");

    let receipt = OrderService::new(&state).place_bulk_order(&user, &workbook).await?;
    Ok(Json(receipt))
}

/// Sender details saved from a previous order
#[utoipa::path(
    get,
    path = "/order/senderInfo",
    tag = "orders",
    responses((status = 200, body = SenderInfoResponse)),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_sender_info(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<SenderInfoResponse>> {
    let user = load_user(&state, &current_user).await?;
    Ok(Json(SenderInfoResponse {
        sender_info: user.sender_info,
    }))
}

/// Per-label price for each courier, using the user's custom prices where set
#[utoipa::path(
    get,
    path = "/order/label/pricings",
    tag = "orders",
    responses((status = 200, body = PricingResponse)),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_pricings(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<PricingResponse>> {
    let user = load_user(&state, &current_user).await?;
    let prices = OrderService::new(&state).pricing(&user);
    Ok(Json(PricingResponse { prices }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::labels::Courier;
    use crate::test_utils::{bulk_workbook, contact, create_test_config, harness, single_order};
    use axum_test::multipart::{MultipartForm, Part};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    fn dec(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn workbook_form(bytes: Vec<u8>, mime: &str) -> MultipartForm {
        MultipartForm::new().add_part("file", Part::bytes(bytes).file_name("orders.xlsx").mime_type(mime))
    }

    #[tokio::test]
    async fn test_single_order_endpoint() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("50.00")).await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/single")
            .add_header(&name, &value)
            .json(&single_order("USPS", "12.50"))
            .await;
        response.assert_status_ok();
        let receipt: OrderReceipt = response.json();
        assert_eq!(receipt.tracking_numbers, vec!["TRACK0000"]);
        assert_eq!(receipt.balance, dec("37.50"));
    }

    #[tokio::test]
    async fn test_single_order_requires_verified_email() {
        let h = harness(create_test_config()).await;
        let user = h.create_user("jane").await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/single")
            .add_header(&name, &value)
            .json(&single_order("USPS", "12.50"))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["code"], "email_not_verified");
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_order_insufficient_credit() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("5.00")).await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/single")
            .add_header(&name, &value)
            .json(&single_order("USPS", "12.50"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "insufficient_credit");
    }

    #[tokio::test]
    async fn test_bulk_order_upload() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("100.00")).await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/bulk")
            .add_header(&name, &value)
            .multipart(workbook_form(bulk_workbook("USPS", 3), XLSX_MIME))
            .await;
        response.assert_status_ok();
        let receipt: OrderReceipt = response.json();
        assert_eq!(receipt.tracking_numbers.len(), 3);
        assert_eq!(receipt.courier, Courier::Usps);
    }

    #[tokio::test]
    async fn test_bulk_order_wrong_mime() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("100.00")).await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/bulk")
            .add_header(&name, &value)
            .multipart(workbook_form(bulk_workbook("USPS", 1), "text/csv"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bulk_order_missing_file() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("100.00")).await;
        let (name, value) = h.session_header(&user);

        let form = MultipartForm::new().add_text("note", "no workbook here");
        let response = h
            .server()
            .post("/order/label/bulk")
            .add_header(&name, &value)
            .multipart(form)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "missing_data");
    }

    #[tokio::test]
    async fn test_bulk_order_too_large() {
        let mut config = create_test_config();
        config.orders.bulk_upload_max_bytes = 1024;
        let h = harness(config).await;
        let user = h.funded_user("jane", dec("100.00")).await;
        let (name, value) = h.session_header(&user);

        let response = h
            .server()
            .post("/order/label/bulk")
            .add_header(&name, &value)
            .multipart(workbook_form(vec![0u8; 4096], XLSX_MIME))
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sender_info() {
        let h = harness(create_test_config()).await;
        let user = h.funded_user("jane", dec("0")).await;
        let (name, value) = h.session_header(&user);
        let server = h.server();

        let body: SenderInfoResponse = server.get("/order/senderInfo").add_header(&name, &value).await.json();
        assert!(body.sender_info.is_none());

        h.db.save_sender_info(user.id, &contact("Sam")).await.unwrap();
        let body: SenderInfoResponse = server.get("/order/senderInfo").add_header(&name, &value).await.json();
        assert_eq!(body.sender_info.unwrap().first_name, "Sam");
    }

    #[tokio::test]
    async fn test_pricings_lists_every_courier() {
        let h = harness(create_test_config()).await;
        let user = h.create_user("jane").await;
        let (name, value) = h.session_header(&user);

        let body: PricingResponse = h
            .server()
            .get("/order/label/pricings")
            .add_header(&name, &value)
            .await
            .json();
        assert_eq!(body.prices.len(), Courier::ALL.len());
    }

    #[tokio::test]
    async fn test_orders_require_session() {
        let h = harness(create_test_config()).await;
        let server = h.server();
        server
            .get("/order/label/pricings")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/order/label/single")
            .json(&single_order("USPS", "12.50"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
