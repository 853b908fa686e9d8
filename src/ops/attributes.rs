//! Typed access to layer attributes.

use crate::error::{Error, Result};
use crate::model::{Attribute, Layer};

/// Helper function to extract int attributes
pub fn extract_int_attribute(layer: &Layer, name: &str, default: i64) -> Result<i64> {
    match layer.attributes.get(name) {
        Some(Attribute::Int(value)) => Ok(*value),
        Some(_) => Err(Error::ValidationError(format!(
            "{}: attribute {} must be an int",
            layer.name, name
        ))),
        None => Ok(default),
    }
}

/// Helper function to extract non-negative ints attributes
pub fn extract_usizes_attribute(
    layer: &Layer,
    name: &str,
    default: &[usize],
) -> Result<Vec<usize>> {
    match layer.attributes.get(name) {
        Some(Attribute::Ints(values)) => values
            .iter()
            .map(|&v| {
                usize::try_from(v).map_err(|_| {
                    Error::ValidationError(format!(
                        "{}: attribute {} must be non-negative, got {}",
                        layer.name, name, v
                    ))
                })
            })
            .collect(),
        Some(_) => Err(Error::ValidationError(format!(
            "{}: attribute {} must be an array of ints",
            layer.name, name
        ))),
        None => Ok(default.to_vec()),
    }
}

/// Helper function to extract string attributes
pub fn extract_string_attribute(layer: &Layer, name: &str, default: &str) -> Result<String> {
    match layer.attributes.get(name) {
        Some(Attribute::String(value)) => Ok(value.clone()),
        Some(_) => Err(Error::ValidationError(format!(
            "{}: attribute {} must be a string",
            layer.name, name
        ))),
        None => Ok(default.to_string()),
    }
}

/// Helper function to ensure parameter vectors are the right size
pub fn ensure_params_size(
    params: &[usize],
    expected_size: usize,
    default_value: usize,
) -> Vec<usize> {
    let mut result = params.to_vec();
    if result.len() < expected_size {
        result.resize(expected_size, default_value);
    }
    result
}
