//! Request payload protocols
//!
//! Each protocol is a JSON dialect for carrying a batch of feature vectors.
//! All of them decode into a rectangular [`Instances`] batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::InferenceError;

/// JSON dialect used by inbound payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    /// `{"instances": [[...], ...]}`
    #[default]
    #[serde(rename = "tensorflow.http")]
    Tensorflow,
    /// `{"data": {"ndarray": [[...]]}}` or `{"data": {"tensor": {...}}}`
    #[serde(rename = "seldon.http")]
    Seldon,
    /// Open Inference v2: `{"inputs": [{"shape": [...], "data": [...]}]}`
    #[serde(rename = "kfserving.http")]
    KfServing,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tensorflow => "tensorflow.http",
            Protocol::Seldon => "seldon.http",
            Protocol::KfServing => "kfserving.http",
        }
    }

    /// Decode a raw payload into a batch of instances
    pub fn decode(&self, payload: &[u8]) -> Result<Instances, InferenceError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| InferenceError::InvalidPayload(format!("payload is not JSON: {}", e)))?;

        match self {
            Protocol::Tensorflow => decode_tensorflow(&value),
            Protocol::Seldon => decode_seldon(&value),
            Protocol::KfServing => decode_kfserving(&value),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tensorflow.http" => Ok(Protocol::Tensorflow),
            "seldon.http" => Ok(Protocol::Seldon),
            "kfserving.http" | "v2" => Ok(Protocol::KfServing),
            other => Err(format!(
                "unknown protocol '{}', expected tensorflow.http, seldon.http or kfserving.http",
                other
            )),
        }
    }
}

/// Rectangular batch of feature vectors
#[derive(Debug, Clone, PartialEq)]
pub struct Instances {
    rows: Vec<Vec<f64>>,
    num_features: usize,
}

impl Instances {
    /// Build a batch, rejecting empty and ragged input
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, InferenceError> {
        let num_features = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            Some(_) => {
                return Err(InferenceError::InvalidPayload(
                    "instances must have at least one feature".to_string(),
                ))
            }
            None => {
                return Err(InferenceError::InvalidPayload(
                    "payload contains no instances".to_string(),
                ))
            }
        };

        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != num_features) {
            return Err(InferenceError::InvalidPayload(format!(
                "instance {} has {} features, expected {}",
                index,
                row.len(),
                num_features
            )));
        }

        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(InferenceError::InvalidPayload(
                "instances must contain finite numbers".to_string(),
            ));
        }

        Ok(Self { rows, num_features })
    }

    /// Build a batch from a flat buffer and a `[n, d, ...]` shape
    pub fn from_shape(shape: &[usize], values: Vec<f64>) -> Result<Self, InferenceError> {
        let (rows, width) = match shape {
            [] => {
                return Err(InferenceError::InvalidPayload(
                    "tensor shape must not be empty".to_string(),
                ))
            }
            [n] => (1, Some(*n)),
            [n, rest @ ..] => (*n, rest.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))),
        };
        let total = width.and_then(|w| rows.checked_mul(w).map(|total| (w, total)));
        let Some((width, total)) = total else {
            return Err(InferenceError::InvalidPayload(format!(
                "shape {:?} is too large",
                shape
            )));
        };

        if total != values.len() {
            return Err(InferenceError::InvalidPayload(format!(
                "shape {:?} does not match {} values",
                shape,
                values.len()
            )));
        }
        if width == 0 {
            return Err(InferenceError::InvalidPayload(
                "tensor shape has a zero dimension".to_string(),
            ));
        }

        Self::new(values.chunks(width).map(<[f64]>::to_vec).collect())
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

fn decode_tensorflow(value: &Value) -> Result<Instances, InferenceError> {
    let instances = value
        .get("instances")
        .ok_or_else(|| InferenceError::InvalidPayload("missing 'instances'".to_string()))?;
    Instances::new(to_rows(instances)?)
}

fn decode_seldon(value: &Value) -> Result<Instances, InferenceError> {
    let data = value
        .get("data")
        .ok_or_else(|| InferenceError::InvalidPayload("missing 'data'".to_string()))?;

    if let Some(ndarray) = data.get("ndarray") {
        return Instances::new(to_rows(ndarray)?);
    }

    if let Some(tensor) = data.get("tensor") {
        let shape = to_shape(tensor.get("shape"))?;
        let values = tensor
            .get("values")
            .ok_or_else(|| InferenceError::InvalidPayload("tensor missing 'values'".to_string()))?;
        return Instances::from_shape(&shape, to_numbers(values)?);
    }

    Err(InferenceError::InvalidPayload(
        "seldon payload needs 'data.ndarray' or 'data.tensor'".to_string(),
    ))
}

fn decode_kfserving(value: &Value) -> Result<Instances, InferenceError> {
    let input = value
        .get("inputs")
        .and_then(Value::as_array)
        .and_then(|inputs| inputs.first())
        .ok_or_else(|| InferenceError::InvalidPayload("missing 'inputs'".to_string()))?;

    let shape = to_shape(input.get("shape"))?;
    let data = input
        .get("data")
        .ok_or_else(|| InferenceError::InvalidPayload("input missing 'data'".to_string()))?;

    // Data may be flat or nested; flatten row-major before reshaping
    let mut flat = Vec::new();
    flatten_into(data, &mut flat)?;
    Instances::from_shape(&shape, flat)
}

fn to_rows(value: &Value) -> Result<Vec<Vec<f64>>, InferenceError> {
    let items = value
        .as_array()
        .ok_or_else(|| InferenceError::InvalidPayload("instances must be an array".to_string()))?;

    // A flat list of numbers is a single instance
    if items.iter().all(Value::is_number) && !items.is_empty() {
        return Ok(vec![to_numbers(value)?]);
    }

    items
        .iter()
        .map(|row| {
            let mut flat = Vec::new();
            flatten_into(row, &mut flat)?;
            Ok(flat)
        })
        .collect()
}

fn to_numbers(value: &Value) -> Result<Vec<f64>, InferenceError> {
    value
        .as_array()
        .ok_or_else(|| InferenceError::InvalidPayload("expected an array of numbers".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| InferenceError::InvalidPayload(format!("non-numeric value {}", v)))
        })
        .collect()
}

fn to_shape(value: Option<&Value>) -> Result<Vec<usize>, InferenceError> {
    let dims = value
        .and_then(Value::as_array)
        .ok_or_else(|| InferenceError::InvalidPayload("missing tensor 'shape'".to_string()))?;

    dims.iter()
        .map(|d| {
            d.as_u64()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| InferenceError::InvalidPayload(format!("invalid dimension {}", d)))
        })
        .collect()
}

fn flatten_into(value: &Value, out: &mut Vec<f64>) -> Result<(), InferenceError> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out)?;
            }
            Ok(())
        }
        Value::Number(n) => {
            let n = n.as_f64().ok_or_else(|| {
                InferenceError::InvalidPayload(format!("unrepresentable number {}", n))
            })?;
            out.push(n);
            Ok(())
        }
        other => Err(InferenceError::InvalidPayload(format!("non-numeric value {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensorflow_batch() {
        let batch = Protocol::Tensorflow
            .decode(br#"{"instances": [[1.0, 2.0], [3.0, 4.0]]}"#)
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.num_features(), 2);
        assert_eq!(batch.rows()[1], vec![3.0, 4.0]);
    }

    #[test]
    fn test_tensorflow_flat_list_is_one_instance() {
        let batch = Protocol::Tensorflow.decode(br#"{"instances": [1, 2, 3]}"#).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.num_features(), 3);
    }

    #[test]
    fn test_nested_instances_are_flattened() {
        // Image-like [2][2] instances become 4 features
        let batch = Protocol::Tensorflow
            .decode(br#"{"instances": [[[1, 2], [3, 4]], [[5, 6], [7, 8]]]}"#)
            .unwrap();
        assert_eq!(batch.num_features(), 4);
        assert_eq!(batch.rows()[1], vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_seldon_ndarray_and_tensor() {
        let ndarray = Protocol::Seldon
            .decode(br#"{"data": {"ndarray": [[1, 2, 3]]}}"#)
            .unwrap();
        let tensor = Protocol::Seldon
            .decode(br#"{"data": {"tensor": {"shape": [1, 3], "values": [1, 2, 3]}}}"#)
            .unwrap();
        assert_eq!(ndarray, tensor);
    }

    #[test]
    fn test_kfserving_inputs() {
        let payload = br#"{"inputs": [
            {"name": "x", "shape": [2, 2], "datatype": "FP32", "data": [1, 2, 3, 4]}
        ]}"#;
        let batch = Protocol::KfServing.decode(payload).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows()[0], vec![1.0, 2.0]);
    }

    #[test]
    fn test_ragged_rejected() {
        let result = Protocol::Tensorflow.decode(br#"{"instances": [[1, 2], [3]]}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = Protocol::KfServing
            .decode(br#"{"inputs": [{"shape": [2, 3], "data": [1, 2, 3, 4]}]}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let result = Protocol::KfServing
            .decode(br#"{"inputs": [{"shape": [4294967296, 4294967296], "data": []}]}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));

        let result = Protocol::KfServing
            .decode(br#"{"inputs": [{"shape": [1, 4294967296, 4294967296], "data": []}]}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let result = Protocol::Tensorflow.decode(br#"{"instances": [["a", "b"]]}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));
    }

    #[test]
    fn test_empty_rejected() {
        let result = Protocol::Tensorflow.decode(br#"{"instances": []}"#);
        assert!(matches!(result, Err(InferenceError::InvalidPayload(_))));
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("seldon.http".parse::<Protocol>().unwrap(), Protocol::Seldon);
        assert_eq!("v2".parse::<Protocol>().unwrap(), Protocol::KfServing);
        assert!("grpc".parse::<Protocol>().is_err());
    }
}
