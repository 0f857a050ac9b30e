//! Small encoding helpers shared by the gateway clients

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use provider_common::ProviderError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Both gateways report local times in China Standard Time
const CST_OFFSET_HOURS: i64 = 8;

pub fn format_cst(time: DateTime<Utc>, format: &str) -> String {
    (time.naive_utc() + Duration::hours(CST_OFFSET_HOURS))
        .format(format)
        .to_string()
}

pub fn parse_cst(value: &str, format: &str) -> Option<DateTime<Utc>> {
    let local = NaiveDateTime::parse_from_str(value, format).ok()?;
    Some((local - Duration::hours(CST_OFFSET_HOURS)).and_utc())
}

/// Yuan to fen (hundredths), rejecting amounts that are not whole fen
pub fn to_fen(amount: Decimal) -> Result<i64, ProviderError> {
    let fen = amount * Decimal::ONE_HUNDRED;
    if fen.fract() != Decimal::ZERO {
        return Err(ProviderError::MalformedPayload(format!(
            "Amount {} is not a whole number of fen",
            amount
        )));
    }
    fen.to_i64().ok_or_else(|| {
        ProviderError::MalformedPayload(format!("Amount {} is out of range", amount))
    })
}

pub fn from_fen(fen: i64) -> Decimal {
    Decimal::new(fen, 2)
}

/// Two-decimal yuan string as the gateways expect it
pub fn yuan(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

/// Decode an `application/x-www-form-urlencoded` body
pub fn parse_form(body: &str) -> BTreeMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

/// Encode parameters as an `application/x-www-form-urlencoded` body
pub fn canonical_form(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `k=v&...` over non-empty values in key order, skipping `exclude`
pub fn signing_string(params: &BTreeMap<String, String>, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
