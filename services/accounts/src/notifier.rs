//! Out-of-band delivery of confirmation challenges
//!
//! The confirmation link goes to the user's email address and the security
//! code to a second channel (the phone number when one was given), so that
//! neither message alone is enough to confirm the account.

use async_trait::async_trait;
use common::AppResult;
use secrecy::ExposeSecret;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::RegistrationReceipt;

/// Delivers the confirmation challenge of a freshly registered account
#[async_trait]
pub trait ConfirmationNotifier: Send + Sync + 'static {
    async fn send_confirmation(
        &self,
        receipt: &RegistrationReceipt,
        confirmation_link: &str,
    ) -> AppResult<()>;
}

/// Build the link the user follows to confirm the account
pub fn confirmation_link(base_url: &str, confirmation_code: Uuid) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), confirmation_code)
}

/// Development notifier that writes deliveries to the log
///
/// The security code is only emitted at `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConfirmationNotifier for TracingNotifier {
    async fn send_confirmation(
        &self,
        receipt: &RegistrationReceipt,
        confirmation_link: &str,
    ) -> AppResult<()> {
        info!(
            user_id = %receipt.user_id,
            email = %receipt.email,
            confirmation_link,
            "Confirmation link delivered"
        );

        let channel = receipt.phone_number.as_deref().unwrap_or(&receipt.email);
        debug!(
            user_id = %receipt.user_id,
            channel,
            security_code = receipt.security_code.expose_secret().as_str(),
            "Security code delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_confirmation_link_appends_code() {
        let code = Uuid::now_v7();
        assert_eq!(
            confirmation_link("http://localhost/user/confirm/", code),
            format!("http://localhost/user/confirm/{}", code)
        );
        assert_eq!(
            confirmation_link("http://localhost/user/confirm", code),
            format!("http://localhost/user/confirm/{}", code)
        );
    }

    #[tokio::test]
    async fn test_tracing_notifier_never_fails() {
        let receipt = RegistrationReceipt {
            user_id: Uuid::now_v7(),
            username: "wojciech96".to_string(),
            email: "a@b.com".to_string(),
            phone_number: Some("+48123456789".to_string()),
            confirmation_code: Uuid::now_v7(),
            security_code: SecretString::new("004217".to_string()),
        };

        let result = TracingNotifier::new()
            .send_confirmation(&receipt, "http://localhost/user/confirm/x")
            .await;
        assert!(result.is_ok());
    }
}
