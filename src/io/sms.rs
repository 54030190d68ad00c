//! Outbound SMS via an HTTPS JSON gateway

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Minimum digits for a deliverable phone number
const MIN_PHONE_LEN: usize = 10;

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> anyhow::Result<()>;
}

/// Clean a phone number and rewrite local forms to international format.
/// Returns None for numbers too short to deliver.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    if cleaned.len() < MIN_PHONE_LEN {
        return None;
    }

    if cleaned.starts_with("09") && cleaned.len() == 11 {
        Some(format!("{}{}", country_code, &cleaned[1..]))
    } else if cleaned.starts_with('9') && cleaned.len() == 10 {
        Some(format!("{}{}", country_code, cleaned))
    } else {
        Some(cleaned)
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    recipient: &'a str,
    message: &'a str,
}

pub struct HttpSmsGateway {
    url: String,
    api_key: String,
    country_code: String,
    client: reqwest::Client,
}

impl HttpSmsGateway {
    pub fn new(url: &str, api_key: &str, country_code: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build SMS HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            country_code: country_code.to_string(),
            client,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, phone: &str, message: &str) -> anyhow::Result<()> {
        let Some(recipient) = normalize_phone(phone, &self.country_code) else {
            bail!("invalid phone number '{}'", phone);
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(&SendRequest { recipient: &recipient, message })
            .send()
            .await
            .with_context(|| format!("SMS request to {} failed", recipient))?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status.as_u16() == 200 || status.as_u16() == 201 {
            info!(recipient = %recipient, latency_ms = %latency_ms, "sms_sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(
            recipient = %recipient,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            body = %body,
            "sms_rejected"
        );
        bail!("SMS gateway returned {}", status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_local_mobile() {
        assert_eq!(normalize_phone("0917 123 4567", "+63").as_deref(), Some("+639171234567"));
        assert_eq!(normalize_phone("917-123-4567", "+63").as_deref(), Some("+639171234567"));
    }

    #[test]
    fn test_normalize_keeps_international() {
        assert_eq!(normalize_phone("+639171234567", "+63").as_deref(), Some("+639171234567"));
        assert_eq!(normalize_phone("4155550100", "+63").as_deref(), Some("4155550100"));
    }

    #[test]
    fn test_normalize_rejects_short() {
        assert_eq!(normalize_phone("12345", "+63"), None);
        assert_eq!(normalize_phone("", "+63"), None);
        assert_eq!(normalize_phone("09-12", "+63"), None);
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_phone_without_network() {
        let gateway =
            HttpSmsGateway::new("http://127.0.0.1:9/sms", "key", "+63", Duration::from_millis(100))
                .unwrap();
        let err = gateway.send("123", "hi").await.unwrap_err();
        assert!(err.to_string().contains("invalid phone"));
    }
}
