//! [`Database`] held in process memory.
//!
//! Follows the same uniqueness and atomicity rules as the PostgreSQL store. Every
//! operation takes a single lock, which makes the conditional debit trivially atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Database,
    errors::{DbError, Result},
    models::{
        credits::{
            CreditDebitRequest, CreditOutcome, CreditTransactionDBResponse, CreditTransactionType, DebitOutcome,
            PaymentCreditRequest,
        },
        tokens::{OneTimePasscode, VerificationToken},
        users::{ContactDetails, CustomPricing, UserCreateDBRequest, UserDBResponse},
    },
};
use crate::types::UserId;
use rust_decimal::Decimal;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserDBResponse>,
    transactions: Vec<CreditTransactionDBResponse>,
    processed_sources: HashSet<String>,
    otps: HashMap<String, OneTimePasscode>,
    verification_tokens: HashMap<UserId, VerificationToken>,
}

impl State {
    fn user_mut(&mut self, id: UserId) -> Result<&mut UserDBResponse> {
        self.users.get_mut(&id).ok_or(DbError::NotFound)
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users.values().any(|u| u.email == email && Some(u.id) != except)
    }

    fn username_taken(&self, username: &str, except: Option<UserId>) -> bool {
        self.users.values().any(|u| u.username == username && Some(u.id) != except)
    }

    fn record(
        &mut self,
        user_id: UserId,
        transaction_type: CreditTransactionType,
        amount: Decimal,
        balance_after: Decimal,
        source_id: Option<String>,
        description: Option<String>,
    ) {
        self.transactions.push(CreditTransactionDBResponse {
            id: Uuid::new_v4(),
            user_id,
            transaction_type,
            amount,
            balance_after,
            source_id,
            description,
            created_at: Utc::now(),
        });
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's negotiated prices. There is no API for this; operators edit the
    /// record directly in production.
    pub async fn set_custom_pricing(&self, id: UserId, pricing: CustomPricing) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user_mut(id)?.custom_pricing = pricing;
        Ok(())
    }

    /// Backdate a user's creation time
    pub async fn set_user_created_at(&self, id: UserId, created_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user_mut(id)?.created_at = created_at;
        Ok(())
    }

    /// Backdate a passcode
    pub async fn set_otp_created_at(&self, email: &str, created_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let otp = state.otps.get_mut(email).ok_or(DbError::NotFound)?;
        otp.created_at = created_at;
        Ok(())
    }

    /// Backdate a verification token
    pub async fn set_verification_token_created_at(&self, user_id: UserId, created_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let token = state.verification_tokens.get_mut(&user_id).ok_or(DbError::NotFound)?;
        token.created_at = created_at;
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        if state.username_taken(&request.username, None) {
            return Err(DbError::user_conflict("username"));
        }
        if state.email_taken(&request.email, None) {
            return Err(DbError::user_conflict("email"));
        }
        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            username: request.username.clone(),
            email: request.email.clone(),
            password_hash: request.password_hash.clone(),
            credits: Decimal::ZERO,
            verified: false,
            custom_pricing: CustomPricing::new(),
            sender_info: None,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn mark_user_verified(&self, id: UserId) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state.user_mut(id)?;
        user.verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state.user_mut(id)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_username(&self, id: UserId, username: &str) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        if state.username_taken(username, Some(id)) {
            return Err(DbError::user_conflict("username"));
        }
        let user = state.user_mut(id)?;
        user.username = username.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_email(&self, id: UserId, email: &str) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        if state.email_taken(email, Some(id)) {
            return Err(DbError::user_conflict("email"));
        }
        let user = state.user_mut(id)?;
        user.email = email.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn save_sender_info(&self, id: UserId, sender: &ContactDetails) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state.user_mut(id)?;
        user.sender_info = Some(sender.clone());
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_unverified_users_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let doomed: Vec<UserId> = state
            .users
            .values()
            .filter(|u| !u.verified && u.created_at < cutoff)
            .map(|u| u.id)
            .collect();
        for id in &doomed {
            state.users.remove(id);
            state.verification_tokens.remove(id);
        }
        state.transactions.retain(|t| !doomed.contains(&t.user_id));
        Ok(doomed.len() as u64)
    }

    async fn debit_credits(&self, request: &CreditDebitRequest) -> Result<DebitOutcome> {
        let mut state = self.state.lock().await;
        let user = state.user_mut(request.user_id)?;
        if user.credits < request.amount {
            return Ok(DebitOutcome::Insufficient { available: user.credits });
        }
        user.credits -= request.amount;
        user.updated_at = Utc::now();
        let balance_after = user.credits;
        state.record(
            request.user_id,
            CreditTransactionType::LabelPurchase,
            request.amount,
            balance_after,
            None,
            Some(request.description.clone()),
        );
        Ok(DebitOutcome::Debited { balance_after })
    }

    async fn apply_payment_credit(&self, request: &PaymentCreditRequest) -> Result<CreditOutcome> {
        let mut state = self.state.lock().await;
        if state.processed_sources.contains(&request.source_id) {
            return Ok(CreditOutcome::AlreadyProcessed);
        }
        let user = state.user_mut(request.user_id)?;
        user.credits += request.amount;
        user.updated_at = Utc::now();
        let balance_after = user.credits;
        state.processed_sources.insert(request.source_id.clone());
        state.record(
            request.user_id,
            request.transaction_type,
            request.amount,
            balance_after,
            Some(request.source_id.clone()),
            request.description.clone(),
        );
        Ok(CreditOutcome::Applied { balance_after })
    }

    async fn list_credit_transactions(&self, user_id: UserId, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replace_otp(&self, email: &str, code: &str) -> Result<OneTimePasscode> {
        let otp = OneTimePasscode {
            email: email.to_string(),
            code: code.to_string(),
            attempts: 0,
            created_at: Utc::now(),
        };
        self.state.lock().await.otps.insert(email.to_string(), otp.clone());
        Ok(otp)
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OneTimePasscode>> {
        Ok(self.state.lock().await.otps.get(email).cloned())
    }

    async fn record_otp_failure(&self, email: &str) -> Result<Option<i32>> {
        let mut state = self.state.lock().await;
        Ok(state.otps.get_mut(email).map(|otp| {
            otp.attempts += 1;
            otp.attempts
        }))
    }

    async fn delete_otp(&self, email: &str) -> Result<bool> {
        Ok(self.state.lock().await.otps.remove(email).is_some())
    }

    async fn delete_expired_otps(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.otps.len();
        state.otps.retain(|_, otp| otp.created_at >= cutoff);
        Ok((before - state.otps.len()) as u64)
    }

    async fn replace_verification_token(&self, user_id: UserId, token_hash: &str) -> Result<VerificationToken> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("verification_tokens_user_id_fkey".to_string()),
                table: Some("verification_tokens".to_string()),
                message: "user does not exist".to_string(),
            });
        }
        let token = VerificationToken {
            user_id,
            token_hash: token_hash.to_string(),
            created_at: Utc::now(),
        };
        state.verification_tokens.insert(user_id, token.clone());
        Ok(token)
    }

    async fn get_verification_token(&self, user_id: UserId) -> Result<Option<VerificationToken>> {
        Ok(self.state.lock().await.verification_tokens.get(&user_id).cloned())
    }

    async fn delete_verification_token(&self, user_id: UserId) -> Result<bool> {
        Ok(self.state.lock().await.verification_tokens.remove(&user_id).is_some())
    }

    async fn delete_expired_verification_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.verification_tokens.len();
        state.verification_tokens.retain(|_, token| token.created_at >= cutoff);
        Ok((before - state.verification_tokens.len()) as u64)
    }
}
