//! Application state

use clubboard_billing::BillingService;

use crate::{
    auth::{AuthState, JwtVerifier},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub billing: BillingService,
    pub jwt: JwtVerifier,
}

impl AppState {
    pub fn new(billing: BillingService, config: Config) -> Self {
        if config.payment_webhook_secret.is_empty() {
            tracing::warn!("PAYMENT_WEBHOOK_SECRET not set - payment callbacks will be rejected");
        }

        Self {
            jwt: JwtVerifier::new(&config.jwt_secret),
            config,
            billing,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt: self.jwt.clone(),
        }
    }
}
