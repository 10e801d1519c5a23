use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One channel entry of a wire frame: `{"tm": seconds, "data": value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "tm", alias = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub data: Value,
}

impl Sample {
    pub fn new(data: Value) -> Self {
        Self {
            timestamp: None,
            data,
        }
    }

    pub fn stamped(data: Value) -> Self {
        Self {
            timestamp: Some(now_secs()),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: String,
    pub timestamp: Option<f64>,
    pub payload: Value,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, timestamp: Option<f64>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub envelopes: Vec<Envelope>,
    pub rejected: Vec<ProtocolError>,
}

/// Splits a text frame into per-channel envelopes, ordered by channel name.
///
/// A frame that is not a JSON object fails as a whole. A single channel entry
/// without a `data` field is rejected on its own and the rest still decode.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(ProtocolError::NotAMap);
    };

    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut frame = DecodedFrame::default();
    for (channel, entry) in entries {
        match decode_sample(&channel, entry) {
            Ok(sample) => frame
                .envelopes
                .push(Envelope::new(channel, sample.timestamp, sample.data)),
            Err(e) => frame.rejected.push(e),
        }
    }

    Ok(frame)
}

fn decode_sample(channel: &str, entry: Value) -> Result<Sample, ProtocolError> {
    let has_data = entry
        .as_object()
        .is_some_and(|fields| fields.contains_key("data"));
    if !has_data {
        return Err(ProtocolError::MissingData {
            channel: channel.to_string(),
        });
    }
    Ok(serde_json::from_value(entry)?)
}

pub fn encode_frame(samples: &BTreeMap<String, Sample>) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(samples)?)
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
