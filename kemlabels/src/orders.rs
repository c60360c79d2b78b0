//! Label order orchestration.
//!
//! A single order is validated, checked against the balance, sent to the label
//! API, billed and delivered. A bulk order does the same for every spreadsheet row
//! in two phases: all labels are fetched first, then the whole batch is billed once.
//! A failing row therefore bills nothing and stores nothing.
//!
//! The balance check before the provider call avoids paying for labels the user
//! cannot afford; the debit itself is a conditional decrement, so two concurrent
//! orders can never overdraw an account.

use futures::{StreamExt, TryStreamExt, stream};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    AppState,
    config::Config,
    db::{
        Database,
        models::{
            credits::{CreditDebitRequest, DebitOutcome},
            users::{ContactDetails, UserDBResponse},
        },
    },
    email::{EmailAttachment, Notifier, OrderSummary, OutgoingEmail},
    errors::{Error, Result},
    labels::{
        Courier, Package, Shipment, archive, collect_references,
        provider::{IssuedLabel, LabelProvider, LabelProviderError},
        service_class,
        spreadsheet::{self, BulkOrder, SpreadsheetError},
        storage::LabelStorage,
    },
    types::abbrev_uuid,
};

/// A single label order as submitted from the order form
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SingleOrder {
    /// `USPS`, `UPS-US` or `UPS-CA`
    pub courier: String,
    /// Class of service as displayed, e.g. `Priority: 1-3 days`
    pub class_type: String,
    /// Price shown to the user for this order
    #[schema(value_type = String)]
    pub total_price: Decimal,
    pub sender: ContactDetails,
    pub recipient: ContactDetails,
    pub package: Package,
    #[serde(default)]
    pub reference_1: Option<String>,
    #[serde(default)]
    pub reference_2: Option<String>,
    #[serde(default)]
    pub signature: bool,
    /// Overwrite the saved sender details with `sender`
    #[serde(default)]
    pub save_sender_info: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderReceipt {
    pub courier: Courier,
    pub service_class: String,
    pub tracking_numbers: Vec<String>,
    #[schema(value_type = String)]
    pub charged: Decimal,
    #[schema(value_type = String)]
    pub balance: Decimal,
}

impl From<SpreadsheetError> for Error {
    fn from(err: SpreadsheetError) -> Self {
        match err {
            SpreadsheetError::InvalidCourier(courier) => Error::InvalidCourier { courier },
            SpreadsheetError::MissingCell { row, column } => Error::MissingData {
                field: format!("row {row} {column}"),
            },
            SpreadsheetError::MissingHeader(what) => Error::MissingData { field: what.to_string() },
            other => Error::Validation {
                message: other.to_string(),
            },
        }
    }
}

impl From<LabelProviderError> for Error {
    fn from(err: LabelProviderError) -> Self {
        Error::LabelProvider { message: err.to_string() }
    }
}

fn parse_courier(value: &str) -> Result<Courier> {
    value.parse().map_err(|_| Error::InvalidCourier {
        courier: value.trim().to_string(),
    })
}

fn require_contact(details: &ContactDetails, prefix: &str) -> Result<()> {
    match details.first_missing_field() {
        Some(field) => Err(Error::MissingData {
            field: format!("{prefix}.{field}"),
        }),
        None => Ok(()),
    }
}

fn require_package(package: &Package) -> Result<()> {
    for (name, value) in [
        ("length", package.length),
        ("width", package.width),
        ("height", package.height),
        ("weight", package.weight),
    ] {
        if value <= Decimal::ZERO {
            return Err(Error::Validation {
                message: format!("Package {name} must be positive"),
            });
        }
    }
    Ok(())
}

/// Per-unit price for a courier: the user's negotiated price, else the configured default
pub fn unit_price(user: &UserDBResponse, courier: Courier, config: &Config) -> Option<Decimal> {
    user.custom_pricing
        .get(&courier)
        .copied()
        .or_else(|| config.default_price(courier))
}

pub struct OrderService<'a> {
    db: &'a dyn Database,
    provider: &'a dyn LabelProvider,
    notifier: &'a dyn Notifier,
    storage: &'a LabelStorage,
    config: &'a Config,
}

impl<'a> OrderService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            db: state.db.as_ref(),
            provider: state.label_provider.as_ref(),
            notifier: state.notifier.as_ref(),
            storage: &state.storage,
            config: &state.config,
        }
    }

    fn ensure_covers(user: &UserDBResponse, required: Decimal) -> Result<()> {
        if user.credits < required {
            return Err(Error::InsufficientCredit {
                required,
                available: user.credits,
            });
        }
        Ok(())
    }

    async fn debit(&self, user: &UserDBResponse, amount: Decimal, description: String) -> Result<Decimal> {
        let outcome = self
            .db
            .debit_credits(&CreditDebitRequest {
                user_id: user.id,
                amount,
                description,
            })
            .await?;

        match outcome {
            DebitOutcome::Debited { balance_after } => Ok(balance_after),
            DebitOutcome::Insufficient { available } => {
                // Balance changed between the check and the debit; the fetched labels are discarded
                warn!(%amount, %available, "Balance no longer covers order, discarding labels");
                Err(Error::InsufficientCredit {
                    required: amount,
                    available,
                })
            }
        }
    }

    async fn notify(&self, summary: &OrderSummary<'_>, customer: Vec<EmailAttachment>, admin: EmailAttachment) -> Result<()> {
        self.notifier
            .send(OutgoingEmail::order_confirmation(summary, customer))
            .await?;
        self.notifier
            .send(OutgoingEmail::order_admin_notice(&self.config.email.admin_email, summary, admin))
            .await?;
        Ok(())
    }

    /// Place one label order for `user`, whose record must be current.
    ///
    /// The debit is committed before the file is stored and emails are sent; a
    /// failure after it is reported but not refunded.
    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id), courier = %order.courier), err)]
    pub async fn place_single_order(&self, user: &UserDBResponse, order: SingleOrder) -> Result<OrderReceipt> {
        let courier = parse_courier(&order.courier)?;
        if order.class_type.trim().is_empty() {
            return Err(Error::MissingData {
                field: "class_type".to_string(),
            });
        }
        require_contact(&order.sender, "sender")?;
        require_contact(&order.recipient, "recipient")?;
        require_package(&order.package)?;
        if order.total_price <= Decimal::ZERO {
            return Err(Error::Validation {
                message: "Total price must be positive".to_string(),
            });
        }

        Self::ensure_covers(user, order.total_price)?;

        let shipment = Shipment {
            courier,
            service_class: service_class(courier, &order.class_type, order.signature),
            sender: order.sender.to_address(),
            recipient: order.recipient.to_address(),
            package: order.package.clone(),
            references: collect_references([order.reference_1.as_deref(), order.reference_2.as_deref()]),
        };
        let label = self.provider.create_label(&shipment).await?;
        info!(tracking_number = %label.tracking_number, "Label issued");

        if order.save_sender_info {
            self.db.save_sender_info(user.id, &order.sender).await?;
        }

        let description = format!("{} label {}", shipment.service_class, label.tracking_number);
        let balance = self.debit(user, order.total_price, description).await?;

        self.storage
            .store_label(&user.email, &label.tracking_number, &label.label_pdf)
            .await
            .map_err(|e| Error::Internal {
                operation: format!("store label {}: {e}", label.tracking_number),
            })?;

        let filename = format!("label_{}.pdf", archive::sanitize_component(&label.tracking_number));
        let mut customer = vec![EmailAttachment::pdf(filename.clone(), label.label_pdf.clone())];
        if let Some(receipt) = &label.receipt_pdf {
            customer.push(EmailAttachment::pdf(
                format!("receipt_{}.pdf", archive::sanitize_component(&label.tracking_number)),
                receipt.clone(),
            ));
        }
        let summary = OrderSummary {
            username: &user.username,
            email: &user.email,
            courier,
            service_class: &shipment.service_class,
            label_count: 1,
            total: order.total_price,
            balance_after: balance,
            tracking_number: Some(&label.tracking_number),
        };
        self.notify(&summary, customer, EmailAttachment::pdf(filename, label.label_pdf))
            .await?;

        Ok(OrderReceipt {
            courier,
            service_class: shipment.service_class,
            tracking_numbers: vec![label.tracking_number],
            charged: order.total_price,
            balance,
        })
    }

    /// Place a bulk order from an uploaded xlsx workbook.
    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id), bytes = workbook.len()), err)]
    pub async fn place_bulk_order(&self, user: &UserDBResponse, workbook: &[u8]) -> Result<OrderReceipt> {
        let orders = &self.config.orders;
        let BulkOrder {
            courier,
            class_type,
            signature,
            rows,
        } = spreadsheet::parse_workbook(workbook, orders.bulk_max_rows)?;

        let price = unit_price(user, courier, self.config).ok_or_else(|| Error::Internal {
            operation: format!("resolve unit price for {courier}"),
        })?;
        let total = price * Decimal::from(rows.len());
        Self::ensure_covers(user, total)?;

        let class = service_class(courier, &class_type, signature);
        let shipments: Vec<Shipment> = rows
            .into_iter()
            .map(|row| Shipment {
                courier,
                service_class: class.clone(),
                sender: row.sender,
                recipient: row.recipient,
                package: row.package,
                references: row.references,
            })
            .collect();

        // Phase one: fetch every label, preserving row order. Any failure aborts the batch.
        let requests: Vec<_> = shipments
            .iter()
            .map(|shipment| self.provider.create_label(shipment))
            .collect();
        let fetch = stream::iter(requests)
            .buffered(orders.bulk_concurrency.max(1))
            .try_collect::<Vec<IssuedLabel>>();
        let labels = tokio::time::timeout(orders.fetch_timeout, fetch)
            .await
            .map_err(|_| Error::LabelProvider {
                message: format!("bulk label fetch exceeded {:?}", orders.fetch_timeout),
            })??;
        info!(count = labels.len(), "All bulk labels issued");

        // Phase two: bill once, then deliver
        let description = format!("Bulk order: {} x {} labels", labels.len(), class);
        let balance = self.debit(user, total, description).await?;

        let zip = archive::zip_labels(&labels).map_err(|e| Error::Internal {
            operation: format!("build label archive: {e}"),
        })?;
        self.storage
            .store_bulk_archive(&user.email, &zip)
            .await
            .map_err(|e| Error::Internal {
                operation: format!("store bulk label archive: {e}"),
            })?;

        let summary = OrderSummary {
            username: &user.username,
            email: &user.email,
            courier,
            service_class: &class,
            label_count: labels.len(),
            total,
            balance_after: balance,
            tracking_number: None,
        };
        let attachment = EmailAttachment::zip("bulk_labels.zip", zip);
        self.notify(&summary, vec![attachment.clone()], attachment).await?;

        Ok(OrderReceipt {
            courier,
            service_class: class,
            tracking_numbers: labels.into_iter().map(|l| l.tracking_number).collect(),
            charged: total,
            balance,
        })
    }

    /// Effective unit price for every courier
    pub fn pricing(&self, user: &UserDBResponse) -> BTreeMap<Courier, Decimal> {
        Courier::ALL
            .iter()
            .filter_map(|&courier| unit_price(user, courier, self.config).map(|price| (courier, price)))
            .collect()
    }
}
