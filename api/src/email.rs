//! Email dispatch boundary. Delivery itself is external; this module only
//! honors the `{from, to, subject, html}` contract.

use anyhow::Result;
#[cfg(not(feature = "mock-email"))]
use anyhow::Context;
#[cfg(not(feature = "mock-email"))]
use resend_rs::{Resend, types::CreateEmailBaseOptions};
#[cfg(not(feature = "mock-email"))]
use secrecy::ExposeSecret;
use secrecy::SecretBox;

pub struct EmailService {
    #[cfg(not(feature = "mock-email"))]
    client: Resend,
    from_address: String,
}

impl EmailService {
    #[cfg(not(feature = "mock-email"))]
    pub fn new(api_key: SecretBox<String>, from_address: String) -> Self {
        let client = Resend::new(api_key.expose_secret());
        Self {
            client,
            from_address,
        }
    }

    #[cfg(feature = "mock-email")]
    pub fn new(_api_key: SecretBox<String>, from_address: String) -> Self {
        Self { from_address }
    }

    #[tracing::instrument(skip(self, html), fields(to = %to_email))]
    #[cfg(not(feature = "mock-email"))]
    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html: &str,
    ) -> Result<()> {
        let email = CreateEmailBaseOptions::new(
            &self.from_address,
            [to_email],
            subject,
        )
        .with_html(html);

        self.client
            .emails
            .send(email)
            .await
            .context("Failed to send email via Resend")?;

        tracing::info!("Email sent successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self, html), fields(to = %to_email))]
    #[cfg(feature = "mock-email")]
    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html: &str,
    ) -> Result<()> {
        let _ = html;
        tracing::info!(
            "Test mode: Mock email sent to: {} from: {} with subject: {}",
            to_email,
            self.from_address,
            subject
        );
        Ok(())
    }

    /// Cancellation notice sent alongside the push notification.
    #[tracing::instrument(skip(self))]
    pub async fn send_reservation_cancelled_email(
        &self,
        to_email: &str,
        username: &str,
        coder: &str,
    ) -> Result<()> {
        let html = format!(
            r#"
            <h2>Reservation cancelled</h2>
            <p>Hi {username},</p>
            <p>Your reservation <strong>{coder}</strong> has been cancelled.
            Any credit you paid has been returned to your balance.</p>
            "#
        );
        self.send_email(
            to_email,
            &format!("Reservation {coder} cancelled"),
            &html,
        )
        .await
    }
}
