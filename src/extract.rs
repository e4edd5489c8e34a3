//! Utilization extraction from raw PM samples.
//!
//! A sample may carry utilization directly (`utilization`), as a VES measurement
//! event (`event.measurementFields.additionalMeasurements[].hashMap`), or as a
//! list of `measValues[].measResults[]` records. The cell is identified by
//! `measObjLdn`, falling back to `cell_id`.

use crate::decision::clamp_utilization;
use crate::telemetry::Sample;
use serde_json::Value;
use thiserror::Error;

const PRB_USED_DL: &str = "pmRadioPrbUsedDl";
const PRB_AVAIL_DL: &str = "pmRadioPrbAvailDl";
const DEFAULT_PRB_AVAILABLE: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("sample has no measObjLdn or cell_id")]
    MissingEntity,

    #[error("sample for {0} has no recognizable utilization field")]
    MissingUtilization(String),

    #[error("sample for {cell_id} has non-numeric utilization: {value}")]
    InvalidUtilization { cell_id: String, value: String },
}

/// Normalized view of a sample: cell, utilization in [0, 100] and pass-through metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub cell_id: String,
    pub utilization: f64,
    pub global_cell_id: Option<String>,
    pub sector_id: Option<String>,
    pub pci: Option<u16>,
    pub timestamp: String,
}

impl Measurement {
    pub fn new(cell_id: impl Into<String>, utilization: f64) -> Self {
        Self {
            cell_id: cell_id.into(),
            utilization: clamp_utilization(utilization),
            global_cell_id: None,
            sector_id: None,
            pci: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn extract(sample: &Sample) -> Result<Measurement, ExtractionError> {
    let payload = &sample.payload;
    let cell_id = cell_id(payload).ok_or(ExtractionError::MissingEntity)?;

    let raw = utilization(payload, &cell_id)?
        .ok_or_else(|| ExtractionError::MissingUtilization(cell_id.clone()))?;
    if !raw.is_finite() {
        return Err(ExtractionError::InvalidUtilization {
            cell_id,
            value: raw.to_string(),
        });
    }

    let timestamp = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| sample.received_at.to_rfc3339());

    Ok(Measurement {
        utilization: clamp_utilization(raw),
        global_cell_id: text_field(payload, "global_cell_id"),
        sector_id: text_field(payload, "sector_id"),
        pci: payload.get("pci").and_then(pci),
        timestamp,
        cell_id,
    })
}

fn cell_id(payload: &Value) -> Option<String> {
    ["measObjLdn", "cell_id"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn utilization(payload: &Value, cell_id: &str) -> Result<Option<f64>, ExtractionError> {
    if let Some(direct) = payload.get("utilization") {
        return match number(direct) {
            Some(u) => Ok(Some(u)),
            None => Err(ExtractionError::InvalidUtilization {
                cell_id: cell_id.to_string(),
                value: direct.to_string(),
            }),
        };
    }

    Ok(from_ves_event(payload).or_else(|| from_meas_values(payload)))
}

/// `event.measurementFields.additionalMeasurements[].hashMap`
fn from_ves_event(payload: &Value) -> Option<f64> {
    payload
        .pointer("/event/measurementFields/additionalMeasurements")?
        .as_array()?
        .iter()
        .filter_map(|m| m.get("hashMap"))
        .find_map(|counters| {
            let used = counters.get(PRB_USED_DL).and_then(number)?;
            let available = counters
                .get(PRB_AVAIL_DL)
                .and_then(number)
                .filter(|a| *a > 0.0)
                .unwrap_or(DEFAULT_PRB_AVAILABLE);
            Some(used / available * 100.0)
        })
}

/// `measValues[].measResults[]` where a result names `pmRadioPrbUsedDl`
fn from_meas_values(payload: &Value) -> Option<f64> {
    payload
        .get("measValues")?
        .as_array()?
        .iter()
        .filter_map(|mv| mv.get("measResults").and_then(Value::as_array))
        .flatten()
        .filter(|result| names_prb_usage(result))
        .find_map(|result| result.get("value").and_then(number))
}

fn names_prb_usage(result: &Value) -> bool {
    match result {
        Value::Object(map) => {
            map.contains_key(PRB_USED_DL)
                || map.values().any(|v| v.as_str() == Some(PRB_USED_DL))
        }
        _ => false,
    }
}

/// Numbers may arrive as JSON numbers or numeric strings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Physical cell identity: integral and within `u16`, otherwise dropped
fn pci(value: &Value) -> Option<u16> {
    let raw = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u16::try_from(raw).ok()
}

fn text_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
