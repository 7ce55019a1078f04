//! Scriptable gateway double
//!
//! Lets tests queue failures per operation and inspect how many calls
//! produced a real side effect, so retry idempotence is assertable.
//! Send and confirm honor the reservation-code idempotency contract:
//! repeated calls with the same code apply at most one effect.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::{Confirmation, CorrespondentGateway, GatewayError, IncomingTransfer, Reservation};
use crate::account::Currency;

#[derive(Default)]
struct MockInner {
    reserve_failures: VecDeque<GatewayError>,
    send_failures: VecDeque<GatewayError>,
    confirm_failures: VecDeque<GatewayError>,
    poll_failures: VecDeque<GatewayError>,
    incoming: VecDeque<Vec<IncomingTransfer>>,
    next_code: u64,
    issued_codes: Vec<String>,
    sent_effects: HashSet<String>,
    confirmed_effects: HashSet<String>,
    reserve_calls: u64,
    send_calls: u64,
    confirm_calls: u64,
    poll_calls: u64,
}

#[derive(Default)]
pub struct MockGateway {
    inner: Mutex<MockInner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure consumed by the next reserve call.
    pub fn push_reserve_failure(&self, err: GatewayError) {
        self.inner.lock().unwrap().reserve_failures.push_back(err);
    }

    pub fn push_send_failure(&self, err: GatewayError) {
        self.inner.lock().unwrap().send_failures.push_back(err);
    }

    pub fn push_confirm_failure(&self, err: GatewayError) {
        self.inner.lock().unwrap().confirm_failures.push_back(err);
    }

    pub fn push_poll_failure(&self, err: GatewayError) {
        self.inner.lock().unwrap().poll_failures.push_back(err);
    }

    /// Queue a batch returned by the next poll. Polls past the queue
    /// report no new transactions.
    pub fn push_incoming(&self, batch: Vec<IncomingTransfer>) {
        self.inner.lock().unwrap().incoming.push_back(batch);
    }

    pub fn reserve_calls(&self) -> u64 {
        self.inner.lock().unwrap().reserve_calls
    }

    pub fn send_calls(&self) -> u64 {
        self.inner.lock().unwrap().send_calls
    }

    pub fn confirm_calls(&self) -> u64 {
        self.inner.lock().unwrap().confirm_calls
    }

    pub fn poll_calls(&self) -> u64 {
        self.inner.lock().unwrap().poll_calls
    }

    /// Reservation codes with a real send effect applied.
    pub fn send_effects(&self) -> u64 {
        self.inner.lock().unwrap().sent_effects.len() as u64
    }

    pub fn confirm_effects(&self) -> u64 {
        self.inner.lock().unwrap().confirmed_effects.len() as u64
    }

    pub fn issued_codes(&self) -> Vec<String> {
        self.inner.lock().unwrap().issued_codes.clone()
    }
}

#[async_trait]
impl CorrespondentGateway for MockGateway {
    async fn reserve(&self, account_number: &str) -> Result<Reservation, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reserve_calls += 1;
        if let Some(err) = inner.reserve_failures.pop_front() {
            return Err(err);
        }
        inner.next_code += 1;
        let code = format!("RSV-{:06}", inner.next_code);
        inner.issued_codes.push(code.clone());
        log::debug!("[mock] reserve({}) -> {}", account_number, code);
        Ok(Reservation {
            code,
            account_holder: Some("Mock Holder".to_string()),
            currency: None,
            amount: None,
        })
    }

    async fn send(
        &self,
        reservation_code: &str,
        destination: &str,
        amount: Decimal,
        _currency: Currency,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.send_calls += 1;
        if let Some(err) = inner.send_failures.pop_front() {
            return Err(err);
        }
        if !inner.issued_codes.iter().any(|c| c == reservation_code) {
            return Err(GatewayError::Permanent(format!(
                "send: unknown reservation {}",
                reservation_code
            )));
        }
        // Repeated sends with the same code are absorbed
        inner.sent_effects.insert(reservation_code.to_string());
        log::debug!(
            "[mock] send({}, {}, {})",
            reservation_code,
            destination,
            amount
        );
        Ok(())
    }

    async fn confirm(&self, reservation_code: &str) -> Result<Confirmation, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.confirm_calls += 1;
        if let Some(err) = inner.confirm_failures.pop_front() {
            return Err(err);
        }
        if !inner.sent_effects.contains(reservation_code) {
            return Err(GatewayError::Permanent(format!(
                "confirm: nothing sent for reservation {}",
                reservation_code
            )));
        }
        inner.confirmed_effects.insert(reservation_code.to_string());
        Ok(Confirmation {
            external_reference: format!("EXT-{}", reservation_code),
            confirmed_at: Utc::now().timestamp_millis(),
        })
    }

    async fn poll_incoming(&self) -> Result<Vec<IncomingTransfer>, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.poll_calls += 1;
        if let Some(err) = inner.poll_failures.pop_front() {
            return Err(err);
        }
        Ok(inner.incoming.pop_front().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
