//! HTTP gateway adapter
//!
//! Maps the four correspondent endpoints 1:1. Each request carries the
//! shared key parameter and a fixed timeout; timeouts and 5xx classify
//! as transient, 4xx as permanent. Bodies pass through `normalize`.
//! The adapter never retries on its own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{normalize, Confirmation, CorrespondentGateway, GatewayError, IncomingTransfer, Reservation};
use crate::account::Currency;

/// Send parameters remembered per reservation code. The confirmation
/// endpoint echoes them back, so the adapter keeps them until the
/// confirm succeeds.
#[derive(Debug, Clone)]
struct SendContext {
    account: String,
    amount: Decimal,
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    key: String,
    timeout: Duration,
    send_context: Mutex<HashMap<String, SendContext>>,
}

#[derive(Serialize)]
struct ConfirmBody<'a> {
    #[serde(rename = "authToken")]
    auth_token: &'a str,
    #[serde(rename = "reservationCode")]
    reservation_code: &'a str,
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "accountNumber")]
    account_number: &'a str,
    amount: Decimal,
}

impl HttpGateway {
    pub fn new(base_url: &str, key: &str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            timeout,
            send_context: Mutex::new(HashMap::new()),
        }
    }
}

/// Map a 2xx/4xx/5xx response into a body or a classified error.
fn classify(operation: &str, status: StatusCode, body: String) -> Result<String, GatewayError> {
    if status.is_success() {
        return Ok(body);
    }
    let reason = format!(
        "{}: HTTP {} - {}",
        operation,
        status.as_u16(),
        body.chars().take(120).collect::<String>()
    );
    if status.is_server_error() {
        Err(GatewayError::Transient(reason))
    } else {
        Err(GatewayError::Permanent(reason))
    }
}

/// Timeouts and connection failures take the same retry path as a 5xx.
fn transport_error(operation: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Transient(format!("{}: {}", operation, err))
}

async fn read_response(
    operation: &str,
    response: reqwest::Response,
) -> Result<String, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(operation, e))?;
    classify(operation, status, body)
}

#[async_trait]
impl CorrespondentGateway for HttpGateway {
    async fn reserve(&self, account_number: &str) -> Result<Reservation, GatewayError> {
        let url = format!("{}/reservation", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.key.as_str()), ("account", account_number)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error("reserve", e))?;

        let body = read_response("reserve", response).await?;
        normalize::normalize_reservation(&body).map_err(GatewayError::Malformed)
    }

    async fn send(
        &self,
        reservation_code: &str,
        destination: &str,
        amount: Decimal,
        currency: Currency,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/send", self.base_url);
        let amount_str = amount.to_string();
        let response = self
            .client
            .post(&url)
            .query(&[
                ("key", self.key.as_str()),
                ("reservation", reservation_code),
                ("account", destination),
                ("amount", amount_str.as_str()),
                ("currency", currency.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error("send", e))?;

        let body = read_response("send", response).await?;
        match normalize::normalize_send_ack(&body) {
            Ok(true) => {
                self.send_context.lock().unwrap().insert(
                    reservation_code.to_string(),
                    SendContext {
                        account: destination.to_string(),
                        amount,
                    },
                );
                Ok(())
            }
            Ok(false) => Err(GatewayError::Permanent(format!(
                "send: correspondent rejected reservation {}",
                reservation_code
            ))),
            Err(e) => Err(GatewayError::Malformed(e)),
        }
    }

    async fn confirm(&self, reservation_code: &str) -> Result<Confirmation, GatewayError> {
        let context = self
            .send_context
            .lock()
            .unwrap()
            .get(reservation_code)
            .cloned()
            .ok_or_else(|| {
                GatewayError::Permanent(format!(
                    "confirm: no send on record for reservation {}",
                    reservation_code
                ))
            })?;

        let now = Utc::now();
        let body = ConfirmBody {
            auth_token: &self.key,
            reservation_code,
            date_time: now.to_rfc3339(),
            account_number: &context.account,
            amount: context.amount,
        };

        let url = format!("{}/reservation_confirmation", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error("confirm", e))?;

        let text = read_response("confirm", response).await?;
        let confirmation = normalize::normalize_confirmation(&text, now.timestamp_millis())
            .map_err(GatewayError::Malformed)?;

        self.send_context.lock().unwrap().remove(reservation_code);
        Ok(confirmation)
    }

    async fn poll_incoming(&self) -> Result<Vec<IncomingTransfer>, GatewayError> {
        let url = format!("{}/receiving", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.key.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error("poll_incoming", e))?;

        let body = read_response("poll_incoming", response).await?;
        normalize::normalize_incoming(&body, Utc::now().timestamp_millis())
            .map_err(GatewayError::Malformed)
    }

    fn name(&self) -> &str {
        "correspondent-http"
    }
}
