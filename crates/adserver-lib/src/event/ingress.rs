//! CloudEvent decoding from HTTP requests
//!
//! Supports both HTTP content modes:
//! - Binary: attributes in `ce-*` headers, body is the event data
//! - Structured: `application/cloudevents+json` body holding attributes and data

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::EventEnvelope;
use crate::error::MalformedEventError;

/// Content type marking a structured-mode CloudEvent
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Header prefix for binary-mode attributes
const CE_HEADER_PREFIX: &str = "ce-";

/// Attributes with dedicated envelope fields
const CORE_ATTRIBUTES: &[&str] = &[
    "id",
    "type",
    "source",
    "specversion",
    "time",
    "datacontenttype",
    "data",
    "data_base64",
];

/// Decodes inbound requests into validated envelopes
#[derive(Debug, Clone, Default)]
pub struct EventIngress;

impl EventIngress {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw request bytes plus transport headers into an envelope
    pub fn parse(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<EventEnvelope, MalformedEventError> {
        let content_type = header_str(headers, CONTENT_TYPE.as_str());
        let structured = content_type
            .map(|ct| ct.to_ascii_lowercase().starts_with(STRUCTURED_CONTENT_TYPE))
            .unwrap_or(false);

        if structured {
            debug!("Decoding structured-mode event");
            self.parse_structured(body)
        } else {
            debug!("Decoding binary-mode event");
            self.parse_binary(headers, body)
        }
    }

    fn parse_binary(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<EventEnvelope, MalformedEventError> {
        let id = header_str(headers, "ce-id").ok_or(MalformedEventError::MissingAttribute("id"))?;
        let event_type =
            header_str(headers, "ce-type").ok_or(MalformedEventError::MissingAttribute("type"))?;

        if body.is_empty() {
            return Err(MalformedEventError::EmptyData);
        }

        let mut envelope = EventEnvelope::new(id, event_type, body.to_vec())?;

        if let Some(source) = header_str(headers, "ce-source") {
            envelope = envelope.with_source(source);
        }
        if let Some(spec_version) = header_str(headers, "ce-specversion") {
            envelope = envelope.with_spec_version(spec_version)?;
        }
        if let Some(time) = header_str(headers, "ce-time") {
            envelope = envelope.with_time(parse_time(time)?);
        }
        if let Some(content_type) = header_str(headers, CONTENT_TYPE.as_str()) {
            envelope = envelope.with_data_content_type(content_type);
        }

        for (name, value) in headers {
            let name = name.as_str();
            let Some(attribute) = name.strip_prefix(CE_HEADER_PREFIX) else {
                continue;
            };
            if CORE_ATTRIBUTES.contains(&attribute) {
                continue;
            }
            let value = value.to_str().map_err(|e| MalformedEventError::InvalidAttribute {
                name: attribute.to_string(),
                reason: e.to_string(),
            })?;
            envelope = envelope.with_extension(attribute, value);
        }

        Ok(envelope)
    }

    fn parse_structured(&self, body: &[u8]) -> Result<EventEnvelope, MalformedEventError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| MalformedEventError::Undecodable(e.to_string()))?;
        let Value::Object(attributes) = value else {
            return Err(MalformedEventError::Undecodable(
                "structured event must be a JSON object".to_string(),
            ));
        };

        let id = string_attribute(&attributes, "id")?
            .ok_or(MalformedEventError::MissingAttribute("id"))?;
        let event_type = string_attribute(&attributes, "type")?
            .ok_or(MalformedEventError::MissingAttribute("type"))?;
        let content_type = string_attribute(&attributes, "datacontenttype")?;

        let data = match (attributes.get("data_base64"), attributes.get("data")) {
            (Some(Value::String(encoded)), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| MalformedEventError::InvalidAttribute {
                    name: "data_base64".to_string(),
                    reason: e.to_string(),
                })?,
            (Some(_), _) => {
                return Err(MalformedEventError::InvalidAttribute {
                    name: "data_base64".to_string(),
                    reason: "expected a string".to_string(),
                })
            }
            (None, Some(Value::Null)) | (None, None) => return Err(MalformedEventError::EmptyData),
            (None, Some(Value::String(text))) if !is_json(content_type.as_deref()) => {
                text.as_bytes().to_vec()
            }
            (None, Some(data)) => serde_json::to_vec(data)
                .map_err(|e| MalformedEventError::Undecodable(e.to_string()))?,
        };

        if data.is_empty() {
            return Err(MalformedEventError::EmptyData);
        }

        let mut envelope = EventEnvelope::new(id, event_type, data)?;

        if let Some(source) = string_attribute(&attributes, "source")? {
            envelope = envelope.with_source(source);
        }
        if let Some(spec_version) = string_attribute(&attributes, "specversion")? {
            envelope = envelope.with_spec_version(spec_version)?;
        }
        if let Some(time) = string_attribute(&attributes, "time")? {
            envelope = envelope.with_time(parse_time(&time)?);
        }
        if let Some(content_type) = content_type {
            envelope = envelope.with_data_content_type(content_type);
        }

        for (name, value) in &attributes {
            if CORE_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            envelope = envelope.with_extension(name.as_str(), value);
        }

        Ok(envelope)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn string_attribute(
    attributes: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>, MalformedEventError> {
    match attributes.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(MalformedEventError::InvalidAttribute {
            name: name.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, MalformedEventError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MalformedEventError::InvalidAttribute {
            name: "time".to_string(),
            reason: e.to_string(),
        })
}

fn is_json(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        }
    }
}
