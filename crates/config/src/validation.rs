use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that an interval or timeout is reasonable
    pub fn validate_seconds(seconds: u64, field_name: &str) -> ConfigResult<()> {
        if seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if seconds > 3600 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate that a cost or factor is a finite, non-negative number
    pub fn validate_non_negative(value: f64, field_name: &str) -> ConfigResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a finite non-negative number"
            )));
        }
        Ok(())
    }

    /// Validate that a factor is strictly positive
    pub fn validate_positive(value: f64, field_name: &str) -> ConfigResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that a URL has a valid format and one of the expected schemes
    pub fn validate_url(url: &str, field_name: &str, schemes: &[&str]) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        let parsed = url::Url::parse(url)?;
        if !schemes.contains(&parsed.scheme()) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must use one of the schemes {schemes:?}"
            )));
        }

        Ok(())
    }
}
