//! Named parameter values attached to entities.

use std::collections::BTreeMap;

use crate::error::{NodalError, Result};

/// Mapping from parameter name to value.
///
/// Names are case-insensitive. Values are read at bind time and stay fixed
/// for the lifetime of a simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value.
    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    /// Builder-style [`Self::set`].
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// A required parameter.
    pub fn require(&self, entity: &str, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| NodalError::invalid_parameter(entity, name, "missing value"))
    }

    /// A required, finite and strictly positive parameter.
    pub fn positive(&self, entity: &str, name: &str) -> Result<f64> {
        let value = self.require(entity, name)?;
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(NodalError::invalid_parameter(
                entity,
                name,
                format!("must be positive, got {value}"),
            ))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, &value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let params = ParameterSet::new().with("TC1", 0.01);
        assert_eq!(params.get("tc1"), Some(0.01));
        assert_eq!(params.get_or("tc2", 0.0), 0.0);
    }

    #[test]
    fn test_positive_rejects_zero() {
        let params = ParameterSet::new().with("resistance", 0.0);
        let err = params.positive("R1", "resistance").unwrap_err();
        assert!(matches!(err, NodalError::InvalidParameter { ref entity, .. } if entity == "R1"));
        assert!(params.require("R1", "missing").is_err());
    }
}
