//! Wire formats for consume-budget request bodies and exhaustion responses.
//!
//! Request body, version 1 (keys are scoped to the transaction origin):
//!
//! ```json
//! {"v": "1.0", "t": [{"key": "k", "token": 1, "reporting_time": "2024-01-01T10:20:30Z"}]}
//! ```
//!
//! Request body, version 2 (keys are scoped to each listed reporting origin):
//!
//! ```json
//! {"v": "2.0", "data": [{"reporting_origin": "https://a.test", "keys": [...]}]}
//! ```
//!
//! Exhaustion response: `{"v": "1.0", "f": [0, 2]}`, indices ascending.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::FrontEndError;
use super::consume_budget::BudgetConsumptionEntry;

const NANOS_PER_HOUR: i128 = 3_600_000_000_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported request version: {0}")]
    UnsupportedVersion(String),
    #[error("invalid budget entry: {0}")]
    InvalidEntry(String),
}

impl From<CodecError> for FrontEndError {
    fn from(err: CodecError) -> Self {
        FrontEndError::invalid_request(err.to_string())
    }
}

pub trait TransactionCodec: Send + Sync {
    /// Decodes the body into entries in request order.
    fn parse_consume_budgets(
        &self,
        authorized_domain: &str,
        transaction_origin: &str,
        body: &[u8],
    ) -> Result<Vec<BudgetConsumptionEntry>, CodecError>;

    fn serialize_exhausted_indices(&self, indices: &BTreeSet<usize>) -> Result<Bytes, CodecError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTransactionCodec;

#[derive(Debug, Deserialize)]
struct VersionProbe {
    v: String,
}

#[derive(Debug, Deserialize)]
struct V1Body {
    #[serde(default)]
    t: Vec<KeyBody>,
}

#[derive(Debug, Deserialize)]
struct V2Body {
    #[serde(default)]
    data: Vec<OriginBody>,
}

#[derive(Debug, Deserialize)]
struct OriginBody {
    reporting_origin: String,
    #[serde(default)]
    keys: Vec<KeyBody>,
}

#[derive(Debug, Deserialize)]
struct KeyBody {
    key: String,
    token: u32,
    reporting_time: String,
}

#[derive(Debug, Serialize)]
struct ExhaustedIndicesBody<'a> {
    v: &'static str,
    f: Vec<&'a usize>,
}

impl TransactionCodec for JsonTransactionCodec {
    fn parse_consume_budgets(
        &self,
        authorized_domain: &str,
        transaction_origin: &str,
        body: &[u8],
    ) -> Result<Vec<BudgetConsumptionEntry>, CodecError> {
        let probe: VersionProbe = serde_json::from_slice(body)?;
        match probe.v.as_str() {
            "1.0" => {
                if transaction_origin.is_empty() {
                    return Err(CodecError::InvalidEntry(
                        "transaction origin is required".to_string(),
                    ));
                }
                let parsed: V1Body = serde_json::from_slice(body)?;
                parsed
                    .t
                    .iter()
                    .map(|key| to_entry(transaction_origin, key))
                    .collect()
            }
            "2.0" => {
                if authorized_domain.is_empty() {
                    return Err(CodecError::InvalidEntry(
                        "authorized domain is required".to_string(),
                    ));
                }
                let parsed: V2Body = serde_json::from_slice(body)?;
                let mut entries = Vec::new();
                for origin in &parsed.data {
                    let reporting_origin = origin.reporting_origin.trim();
                    if reporting_origin.is_empty() {
                        return Err(CodecError::InvalidEntry(
                            "reporting origin must not be empty".to_string(),
                        ));
                    }
                    for key in &origin.keys {
                        entries.push(to_entry(reporting_origin, key)?);
                    }
                }
                Ok(entries)
            }
            other => Err(CodecError::UnsupportedVersion(other.to_string())),
        }
    }

    fn serialize_exhausted_indices(&self, indices: &BTreeSet<usize>) -> Result<Bytes, CodecError> {
        let body = ExhaustedIndicesBody {
            v: "1.0",
            f: indices.iter().collect(),
        };
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }
}

fn to_entry(scope: &str, key: &KeyBody) -> Result<BudgetConsumptionEntry, CodecError> {
    let name = key.key.trim();
    if name.is_empty() {
        return Err(CodecError::InvalidEntry(
            "key must not be empty".to_string(),
        ));
    }
    if key.token == 0 {
        return Err(CodecError::InvalidEntry(format!(
            "token count for key {name} must be positive"
        )));
    }
    Ok(BudgetConsumptionEntry {
        budget_key_name: format!("{scope}/{name}"),
        time_bucket: hour_bucket(&key.reporting_time)?,
        token_count: key.token,
    })
}

/// Unix nanoseconds of the reporting time, truncated to the start of its hour.
fn hour_bucket(reporting_time: &str) -> Result<u64, CodecError> {
    let parsed = OffsetDateTime::parse(reporting_time, &Rfc3339).map_err(|err| {
        CodecError::InvalidEntry(format!("invalid reporting_time {reporting_time}: {err}"))
    })?;
    let nanos = parsed.unix_timestamp_nanos();
    u64::try_from(nanos - nanos.rem_euclid(NANOS_PER_HOUR)).map_err(|_| {
        CodecError::InvalidEntry(format!(
            "reporting_time {reporting_time} predates the epoch"
        ))
    })
}
