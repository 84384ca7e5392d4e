//! CloudEvent envelopes and their ingress decoding

mod envelope;
mod ingress;

pub use envelope::{EventEnvelope, SUPPORTED_SPEC_VERSIONS, UNKNOWN_SOURCE};
pub use ingress::{EventIngress, STRUCTURED_CONTENT_TYPE};
