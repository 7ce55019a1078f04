//! Gateway response normalization
//!
//! The correspondent replies with loosely structured text: sometimes
//! JSON, sometimes `key: value` lines wrapped in markup. Everything the
//! rest of the system sees passes through this boundary, which extracts
//! reservation code, amount, currency, status, and timestamp with
//! deterministic fallback rules and reports a structured error when it
//! cannot. No business logic lives here.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{Confirmation, IncomingTransfer, Reservation};
use crate::account::Currency;

/// Sentinel body the receiving endpoint returns when nothing is queued
const NO_NEW_TRANSACTIONS: &str = "no new transactions";

const RESERVATION_KEYS: [&str; 3] = ["reservation_code", "reservation", "code"];
const HOLDER_KEYS: [&str; 3] = ["account_holder", "holder", "name"];
const AMOUNT_KEYS: [&str; 2] = ["amount", "balance"];
const CURRENCY_KEYS: [&str; 1] = ["currency"];
const STATUS_KEYS: [&str; 4] = ["success", "ok", "sent", "status"];
const REFERENCE_KEYS: [&str; 4] = ["external_reference", "reference", "ref", "confirmation_id"];
const TIMESTAMP_KEYS: [&str; 5] = ["confirmed_at", "timestamp", "datetime", "date_time", "time"];
const EXTERNAL_ID_KEYS: [&str; 4] = ["external_transfer_id", "external_id", "transfer_id", "id"];
const DESTINATION_KEYS: [&str; 4] = ["destination_account", "account", "to_account", "destination"];
const SENDER_KEYS: [&str; 3] = ["sender_info", "sender", "from"];

pub fn normalize_reservation(body: &str) -> Result<Reservation, String> {
    let fields = fields_from_body(body);
    let code = lookup(&fields, &RESERVATION_KEYS)
        .ok_or_else(|| format!("reservation code missing in: {}", snippet(body)))?;

    Ok(Reservation {
        code: code.to_string(),
        account_holder: lookup(&fields, &HOLDER_KEYS).map(str::to_string),
        currency: lookup(&fields, &CURRENCY_KEYS).and_then(parse_currency),
        amount: lookup(&fields, &AMOUNT_KEYS).and_then(parse_amount),
    })
}

/// Interpret the send acknowledgement. `Ok(true)` is an accepted send,
/// `Ok(false)` an explicit rejection, `Err` an unreadable body.
pub fn normalize_send_ack(body: &str) -> Result<bool, String> {
    let fields = fields_from_body(body);
    if let Some(flag) = lookup(&fields, &STATUS_KEYS) {
        return Ok(is_affirmative(flag));
    }

    // Bare-text bodies: a lone affirmative token counts
    let text = strip_markup(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(format!("empty send acknowledgement: {}", snippet(body)));
    }
    if is_affirmative(text) {
        return Ok(true);
    }
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("fail") || lowered.contains("reject") || lowered.contains("error") {
        return Ok(false);
    }
    Err(format!("unrecognized send acknowledgement: {}", snippet(body)))
}

/// `default_ts_ms` stands in when the body carries no usable timestamp,
/// mirroring how absent fields default from the request.
pub fn normalize_confirmation(body: &str, default_ts_ms: i64) -> Result<Confirmation, String> {
    let fields = fields_from_body(body);
    let reference = lookup(&fields, &REFERENCE_KEYS)
        .ok_or_else(|| format!("external reference missing in: {}", snippet(body)))?;
    let confirmed_at = lookup(&fields, &TIMESTAMP_KEYS)
        .and_then(parse_timestamp)
        .unwrap_or(default_ts_ms);

    Ok(Confirmation {
        external_reference: reference.to_string(),
        confirmed_at,
    })
}

/// Parse the receiving endpoint payload: a JSON list (possibly wrapped
/// in an envelope object), blank-line separated text blocks, or the
/// "no new transactions" sentinel.
pub fn normalize_incoming(body: &str, default_ts_ms: i64) -> Result<Vec<IncomingTransfer>, String> {
    let stripped = strip_markup(body);
    if stripped
        .to_ascii_lowercase()
        .contains(NO_NEW_TRANSACTIONS)
    {
        return Ok(Vec::new());
    }

    if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
        let entries = match &value {
            Value::Array(items) => items.clone(),
            Value::Object(map) => ["transfers", "transactions", "data", "entries"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| format!("no transfer list in: {}", snippet(body)))?,
            _ => return Err(format!("unexpected receiving payload: {}", snippet(body))),
        };

        return entries
            .iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                Value::Object(map) => incoming_from_fields(&json_fields(map), default_ts_ms)
                    .map_err(|e| format!("entry {}: {}", i, e)),
                _ => Err(format!("entry {}: not an object", i)),
            })
            .collect();
    }

    // Text fallback: blank-line separated blocks of key/value lines
    let blocks: Vec<HashMap<String, String>> = stripped
        .split("\n\n")
        .map(parse_fields)
        .filter(|fields| !fields.is_empty())
        .collect();
    if blocks.is_empty() {
        return Err(format!("unrecognized receiving payload: {}", snippet(body)));
    }
    blocks
        .iter()
        .enumerate()
        .map(|(i, fields)| {
            incoming_from_fields(fields, default_ts_ms).map_err(|e| format!("entry {}: {}", i, e))
        })
        .collect()
}

fn incoming_from_fields(
    fields: &HashMap<String, String>,
    default_ts_ms: i64,
) -> Result<IncomingTransfer, String> {
    let external_id = lookup(fields, &EXTERNAL_ID_KEYS)
        .ok_or_else(|| "external transfer id missing".to_string())?;
    let destination = lookup(fields, &DESTINATION_KEYS)
        .ok_or_else(|| "destination account missing".to_string())?;
    let amount = lookup(fields, &AMOUNT_KEYS)
        .and_then(parse_amount)
        .ok_or_else(|| "amount missing or unreadable".to_string())?;
    let currency = lookup(fields, &CURRENCY_KEYS)
        .and_then(parse_currency)
        .ok_or_else(|| "currency missing or unknown".to_string())?;

    Ok(IncomingTransfer {
        external_id: external_id.to_string(),
        destination_account: destination.to_string(),
        amount,
        currency,
        sender: lookup(fields, &SENDER_KEYS).map(str::to_string),
        timestamp: lookup(fields, &TIMESTAMP_KEYS)
            .and_then(parse_timestamp)
            .unwrap_or(default_ts_ms),
    })
}

/// Drop markup tags, turning tag boundaries into line breaks so
/// `<td>Amount</td><td>100</td>` style rows still split into tokens.
fn strip_markup(body: &str) -> String {
    if !body.contains('<') {
        return body.to_string();
    }
    let mut out = String::with_capacity(body.len());
    let mut in_tag = false;
    for ch in body.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push('\n');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Lowercased, underscore-normalized key -> value pairs from
/// `key: value` / `key=value` lines.
fn parse_fields(text: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once(':').or_else(|| line.split_once('=')) {
            Some(kv) => kv,
            None => continue,
        };
        let key = normalize_key(key);
        let value = value.trim();
        if !key.is_empty() && !value.is_empty() {
            fields.entry(key).or_insert_with(|| value.to_string());
        }
    }
    fields
}

fn json_fields(map: &serde_json::Map<String, Value>) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for (key, value) in map {
        let rendered = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        if !rendered.is_empty() {
            fields.insert(normalize_key(key), rendered);
        }
    }
    fields
}

fn fields_from_body(body: &str) -> HashMap<String, String> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body.trim()) {
        return json_fields(&map);
    }
    parse_fields(&strip_markup(body))
}

fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_underscore = false;
    for ch in key.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            // camelCase keys split on the case boundary
            if ch.is_ascii_uppercase() && !out.is_empty() && !prev_underscore {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore && !out.is_empty() {
            out.push('_');
            prev_underscore = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn lookup<'a>(fields: &'a HashMap<String, String>, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .find_map(|alias| fields.get(*alias))
        .map(String::as_str)
}

fn is_affirmative(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "ok" | "success" | "sent" | "completed" | "accepted"
    )
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    raw.trim()
        .trim_start_matches(['$', '€', '£'])
        .replace(',', "")
        .parse::<Decimal>()
        .ok()
}

fn parse_currency(raw: &str) -> Option<Currency> {
    Currency::from_str(raw.trim())
}

/// Accepts epoch seconds, epoch milliseconds, RFC 3339, or the
/// correspondent's `YYYY-MM-DD HH:MM:SS` format. Returns milliseconds.
fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = raw.parse().ok()?;
        return Some(if raw.len() >= 13 { n } else { n * 1000 });
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    None
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 120 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(120).collect();
        format!("{}...", cut)
    }
}
