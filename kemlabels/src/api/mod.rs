//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/auth/*`): sign in, sign up, log out
//! - **Users** (`/user/*`): email verification, passcodes, password and profile changes
//! - **Orders** (`/order/*`): single and bulk label orders, saved sender, pricing
//! - **Payments** (`/payment/*`): card and crypto credit purchases, provider webhooks,
//!   credit history
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The document is served
//! at `/docs` when the server is running.

pub mod handlers;
pub mod models;
