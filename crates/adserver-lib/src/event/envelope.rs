//! CloudEvent envelope received by the server

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::MalformedEventError;

/// CloudEvents `specversion` values the ingress accepts
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["1.0", "0.3"];

/// Source recorded when an event omits one
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A validated, routable event
///
/// Construction goes through [`EventEnvelope::new`], so an envelope in hand
/// always has a non-empty `id` and `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    id: String,
    event_type: String,
    source: String,
    spec_version: String,
    time: Option<DateTime<Utc>>,
    data_content_type: Option<String>,
    extensions: BTreeMap<String, String>,
    data: Vec<u8>,
}

impl EventEnvelope {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self, MalformedEventError> {
        let id = id.into();
        let event_type = event_type.into();

        if id.trim().is_empty() {
            return Err(MalformedEventError::MissingAttribute("id"));
        }
        if event_type.trim().is_empty() {
            return Err(MalformedEventError::MissingAttribute("type"));
        }

        Ok(Self {
            id,
            event_type,
            source: UNKNOWN_SOURCE.to_string(),
            spec_version: "1.0".to_string(),
            time: None,
            data_content_type: None,
            extensions: BTreeMap::new(),
            data,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !source.trim().is_empty() {
            self.source = source;
        }
        self
    }

    pub fn with_spec_version(
        mut self,
        spec_version: impl Into<String>,
    ) -> Result<Self, MalformedEventError> {
        let spec_version = spec_version.into();
        if !SUPPORTED_SPEC_VERSIONS.contains(&spec_version.as_str()) {
            return Err(MalformedEventError::UnsupportedSpecVersion(spec_version));
        }
        self.spec_version = spec_version;
        Ok(self)
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_data_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(content_type.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// Opaque payload; its format is detector specific
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
