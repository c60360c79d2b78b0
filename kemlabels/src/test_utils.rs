//! Test fixtures: an in-memory application state with a stub label API and a
//! notifier that records instead of sending.

use async_trait::async_trait;
use axum_test::TestServer;
use rust_decimal::Decimal;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::{Config, DatabaseConfig, EmailTransportConfig, PasswordConfig},
    db::{
        Database, MemoryDatabase,
        models::{
            credits::{CreditTransactionType, PaymentCreditRequest},
            users::{ContactDetails, UserCreateDBRequest, UserDBResponse},
        },
    },
    email::{Notifier, OutgoingEmail},
    errors::Error,
    labels::{
        Package, Shipment,
        provider::{IssuedLabel, LabelProvider, LabelProviderError},
        storage::LabelStorage,
    },
    orders::SingleOrder,
};

/// Install the same rustls crypto provider `main` installs; tests that build TLS
/// clients need it because both `ring` and `aws-lc-rs` are enabled.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("kemlabels-test-emails-{}", std::process::id()));

    let mut config = Config {
        secret_key: Some("test-secret-key-for-sessions-and-grants".to_string()),
        database: DatabaseConfig::Memory,
        dashboard_url: "http://localhost:3000".to_string(),
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config.auth.session.cookie_secure = false;
    // Cheap hashing keeps the auth tests fast
    config.auth.password = PasswordConfig {
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        ..Default::default()
    };
    config
}

/// Label API stand-in that issues numbered labels.
#[derive(Default)]
pub struct StubLabelProvider {
    pub calls: AtomicUsize,
    fail_on: Mutex<Option<usize>>,
    delay: Option<Duration>,
    shipments: Mutex<Vec<Shipment>>,
}

impl StubLabelProvider {
    /// Reject the `n`th call, counting from zero
    pub fn fail_on_call(&self, n: usize) {
        *self.fail_on.lock().unwrap() = Some(n);
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shipments(&self) -> Vec<Shipment> {
        self.shipments.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelProvider for StubLabelProvider {
    async fn create_label(&self, shipment: &Shipment) -> Result<IssuedLabel, LabelProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.shipments.lock().unwrap().push(shipment.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_on.lock().unwrap() == Some(n) {
            return Err(LabelProviderError::Rejected {
                message: format!("stub rejected call {n}"),
            });
        }
        Ok(IssuedLabel {
            tracking_number: format!("TRACK{n:04}"),
            label_pdf: format!("%PDF-label-{n}").into_bytes(),
            receipt_pdf: None,
        })
    }
}

/// Keeps every email instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: OutgoingEmail) -> Result<(), Error> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Application state over in-memory collaborators. The label directory lives as long
/// as the harness.
pub struct TestHarness {
    pub state: AppState,
    pub db: Arc<MemoryDatabase>,
    pub provider: Arc<StubLabelProvider>,
    pub notifier: Arc<RecordingNotifier>,
    _labels: TempDir,
}

pub async fn harness(config: Config) -> TestHarness {
    TestHarness::with_provider(config, Arc::new(StubLabelProvider::default())).await
}

impl TestHarness {
    pub async fn with_provider(config: Config, provider: Arc<StubLabelProvider>) -> Self {
        let labels = tempfile::tempdir().expect("Failed to create label directory");
        let db = Arc::new(MemoryDatabase::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::builder()
            .db(db.clone() as Arc<dyn Database>)
            .config(config)
            .label_provider(provider.clone() as Arc<dyn LabelProvider>)
            .notifier(notifier.clone() as Arc<dyn Notifier>)
            .storage(LabelStorage::new(labels.path()))
            .build();

        Self {
            state,
            db,
            provider,
            notifier,
            _labels: labels,
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(crate::build_router(self.state.clone()).expect("Failed to build router")).expect("Failed to create test server")
    }

    /// Create an unverified user `name` with email `{name}@example.com` and password `password123`
    pub async fn create_user(&self, name: &str) -> UserDBResponse {
        let params = Argon2Params::from(&self.state.config.auth.password);
        let password_hash = password::hash_password("password123", params).expect("Failed to hash password");
        self.db
            .create_user(&UserCreateDBRequest {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash,
            })
            .await
            .expect("Failed to create user")
    }

    /// Create a verified user holding `credits`
    pub async fn funded_user(&self, name: &str, credits: Decimal) -> UserDBResponse {
        let user = self.create_user(name).await;
        self.db.mark_user_verified(user.id).await.expect("Failed to verify user");
        if credits > Decimal::ZERO {
            self.db
                .apply_payment_credit(&PaymentCreditRequest {
                    user_id: user.id,
                    transaction_type: CreditTransactionType::CardPayment,
                    amount: credits,
                    source_id: format!("test:{}", Uuid::new_v4()),
                    description: None,
                })
                .await
                .expect("Failed to fund user");
        }
        self.db
            .get_user_by_id(user.id)
            .await
            .expect("Failed to load user")
            .expect("User disappeared")
    }

    /// `Cookie` header carrying a session for `user`
    pub fn session_header(&self, user: &UserDBResponse) -> (String, String) {
        let current = CurrentUser {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        };
        let token = session::create_session_token(&current, &self.state.config).expect("Failed to sign session");
        (
            "cookie".to_string(),
            format!("{}={token}", self.state.config.auth.session.cookie_name),
        )
    }
}

pub fn contact(name: &str) -> ContactDetails {
    ContactDetails {
        first_name: name.to_string(),
        last_name: "Tester".to_string(),
        phone: "5551234567".to_string(),
        street: "1 Main St".to_string(),
        suite: None,
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        country: "US".to_string(),
    }
}

pub fn single_order(courier: &str, price: &str) -> SingleOrder {
    SingleOrder {
        courier: courier.to_string(),
        class_type: "Priority: 1-3 days".to_string(),
        total_price: price.parse().expect("Invalid test price"),
        sender: contact("Sam"),
        recipient: contact("Rita"),
        package: Package {
            length: Decimal::from(10),
            width: Decimal::from(8),
            height: Decimal::from(4),
            weight: Decimal::new(25, 1),
            description: "Books".to_string(),
        },
        reference_1: Some("PO-1".to_string()),
        reference_2: None,
        signature: false,
        save_sender_info: false,
    }
}

/// An `.xlsx` bulk order for `courier` with `rows` valid shipments
pub fn bulk_workbook(courier: &str, rows: usize) -> Vec<u8> {
    let mut grid: Vec<Vec<String>> = vec![
        vec![courier.to_string(), "Priority: 1-3 days".to_string(), "no".to_string()],
        vec!["titles".to_string()],
    ];
    for n in 0..rows {
        let recipient = format!("Recipient {n}");
        grid.push(
            [
                "US", "Jane Sender", "5551234567", "1 Main St", "", "Springfield", "62701", "IL", "US",
                recipient.as_str(), "5559876543", "2 Elm St", "Apt 4", "Portland", "97201", "OR", "12", "6", "8",
                "2.5", "Books", "PO-1", "",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        );
    }

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (r, row) in grid.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string(r as u32, c as u16, value).expect("Failed to write cell");
            }
        }
    }
    workbook.save_to_buffer().expect("Failed to build workbook")
}
