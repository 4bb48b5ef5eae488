use crate::errors::{DomainError, DomainResult, ValidationError};

/// A trait that entities should implement for validation.
pub trait Validate {
    /// Validates the entity and returns an error if validation fails.
    fn validate(&self) -> DomainResult<()>;
}

/// Struct for configuring validations in a fluent style
pub struct ValidationBuilder<T> {
    field_name: String,
    value: Option<T>,
    errors: Vec<ValidationError>,
}

/// Generic validation implementations
impl<T> ValidationBuilder<T> {
    pub fn new(field_name: &str, value: Option<T>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value,
            errors: Vec::new(),
        }
    }

    /// The value must be present.
    pub fn required(mut self) -> Self {
        if self.value.is_none() {
            self.errors.push(ValidationError::required(&self.field_name));
        }
        self
    }

    pub fn validate_with<F>(mut self, validator: F) -> Self
    where F: FnOnce(&T) -> Result<(), ValidationError> {
        if let Some(value) = &self.value {
            if let Err(err) = validator(value) {
                self.errors.push(err);
            }
        }
        self
    }

    /// Complete validation and return result
    pub fn validate(self) -> DomainResult<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(DomainError::Validation(first)),
        }
    }
}

/// String-specific validations
impl ValidationBuilder<String> {
    pub fn not_blank(mut self) -> Self {
        if let Some(value) = &self.value {
            if value.trim().is_empty() {
                self.errors.push(ValidationError::required(&self.field_name));
            }
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let Some(value) = &self.value {
            if value.chars().count() > max {
                self.errors.push(ValidationError::range(&self.field_name, 0, max));
            }
        }
        self
    }
}

/// Numeric validations
impl<T> ValidationBuilder<T>
where T: PartialOrd + Clone + std::fmt::Display
{
    pub fn min(mut self, min: T) -> Self {
        if let Some(value) = &self.value {
            if value < &min {
                self.errors.push(ValidationError::range(
                    &self.field_name,
                    min.to_string(),
                    "maximum".to_string(),
                ));
            }
        }
        self
    }

    pub fn range(mut self, min: T, max: T) -> Self {
        if let Some(value) = &self.value {
            // NaN fails both comparisons, so reject it explicitly through partial_cmp
            let in_range = value.partial_cmp(&min).map_or(false, |o| o != std::cmp::Ordering::Less)
                && value.partial_cmp(&max).map_or(false, |o| o != std::cmp::Ordering::Greater);
            if !in_range {
                self.errors.push(ValidationError::range(
                    &self.field_name,
                    min.to_string(),
                    max.to_string(),
                ));
            }
        }
        self
    }
}

/// Common validations shared by the field record types
pub mod common {
    use super::*;

    /// Latitude in [-90, 90], longitude in [-180, 180].
    pub fn validate_coordinates(latitude: f64, longitude: f64) -> DomainResult<()> {
        ValidationBuilder::new("latitude", Some(latitude))
            .range(-90.0, 90.0)
            .validate()?;
        ValidationBuilder::new("longitude", Some(longitude))
            .range(-180.0, 180.0)
            .validate()
    }

    pub fn validate_identifier(field: &str, value: &str) -> DomainResult<()> {
        ValidationBuilder::new(field, Some(value.to_string()))
            .not_blank()
            .max_length(128)
            .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_builder() {
        let result = ValidationBuilder::new("name", Some("   ".to_string()))
            .not_blank()
            .validate();
        assert!(result.is_err());

        let result = ValidationBuilder::new("name", Some("abcdef".to_string()))
            .max_length(3)
            .validate();
        assert!(result.is_err());

        let result = ValidationBuilder::new("age", Some(15))
            .min(18)
            .validate();
        assert!(result.is_err());

        let result = ValidationBuilder::new("age", Some(25))
            .range(18, 65)
            .validate();
        assert!(result.is_ok());

        let value: Option<String> = None;
        let result = ValidationBuilder::new("name", value)
            .required()
            .validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_coordinates() {
        assert!(common::validate_coordinates(45.0, -122.0).is_ok());
        assert!(common::validate_coordinates(91.0, 0.0).is_err());
        assert!(common::validate_coordinates(0.0, 180.5).is_err());
        assert!(common::validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_identifier() {
        assert!(common::validate_identifier("checkpoint_id", "cp-1").is_ok());
        assert!(common::validate_identifier("checkpoint_id", "").is_err());
        assert!(common::validate_identifier("checkpoint_id", &"x".repeat(200)).is_err());
    }
}
