//! Request checks performed before a pool slot is taken or any sandbox exists.

use crate::error::ServiceError;
use gradebox_common::config::ServiceConfig;
use gradebox_common::types::{ExecutionRequest, Language, ValidationRequest};
use std::time::Duration;

/// Checked parameters of an `execute` call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub language: Language,
    pub timeout: Duration,
}

pub fn check_code(code: &str, config: &ServiceConfig) -> Result<(), ServiceError> {
    if code.trim().is_empty() {
        return Err(ServiceError::invalid("code must not be empty"));
    }
    if code.len() > config.max_code_bytes {
        return Err(ServiceError::invalid(format!(
            "code is {} bytes, limit is {} bytes",
            code.len(),
            config.max_code_bytes
        )));
    }
    Ok(())
}

pub fn check_language(language: &str) -> Result<Language, ServiceError> {
    Language::from_str(language)
        .ok_or_else(|| ServiceError::invalid(format!("unsupported language '{}'", language)))
}

pub fn check_execution(
    request: &ExecutionRequest,
    config: &ServiceConfig,
) -> Result<ExecutionPlan, ServiceError> {
    check_code(&request.code, config)?;
    let language = check_language(&request.language)?;

    if let Some(input) = &request.input {
        if input.len() > config.max_input_bytes {
            return Err(ServiceError::invalid(format!(
                "input is {} bytes, limit is {} bytes",
                input.len(),
                config.max_input_bytes
            )));
        }
    }

    let timeout_secs = request.timeout_secs.unwrap_or(config.default_timeout_secs);
    if timeout_secs == 0 || timeout_secs > config.max_timeout_secs {
        return Err(ServiceError::invalid(format!(
            "timeout_secs must be between 1 and {}",
            config.max_timeout_secs
        )));
    }

    Ok(ExecutionPlan {
        language,
        timeout: Duration::from_secs(timeout_secs),
    })
}

pub fn check_exercise_id(exercise_id: &str) -> Result<(), ServiceError> {
    if exercise_id.trim().is_empty() {
        return Err(ServiceError::invalid("exercise_id must not be empty"));
    }
    Ok(())
}

pub fn check_validation(request: &ValidationRequest, config: &ServiceConfig) -> Result<(), ServiceError> {
    check_exercise_id(&request.exercise_id)?;
    check_code(&request.code, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            language: "python".to_string(),
            input: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_valid_request_uses_default_timeout() {
        let config = ServiceConfig::default();
        let plan = check_execution(&request("print(1)"), &config).unwrap();
        assert_eq!(plan.language, Language::Python);
        assert_eq!(plan.timeout, Duration::from_secs(config.default_timeout_secs));
    }

    #[test]
    fn test_empty_and_blank_code_rejected() {
        let config = ServiceConfig::default();
        for code in ["", "   \n\t"] {
            let err = check_execution(&request(code), &config).unwrap_err();
            assert_eq!(err.kind(), "invalid_request");
        }
    }

    #[test]
    fn test_oversized_code_rejected() {
        let config = ServiceConfig {
            max_code_bytes: 8,
            ..Default::default()
        };
        let err = check_execution(&request("print('too long')"), &config).unwrap_err();
        assert!(err.to_string().contains("limit is 8 bytes"));
    }

    #[test]
    fn test_unknown_language_rejected() {
        let config = ServiceConfig::default();
        let req = ExecutionRequest {
            language: "brainfuck".to_string(),
            ..request("+")
        };
        let err = check_execution(&req, &config).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn test_timeout_bounds() {
        let config = ServiceConfig::default();
        let zero = ExecutionRequest {
            timeout_secs: Some(0),
            ..request("print(1)")
        };
        assert!(check_execution(&zero, &config).is_err());

        let too_long = ExecutionRequest {
            timeout_secs: Some(config.max_timeout_secs + 1),
            ..request("print(1)")
        };
        assert!(check_execution(&too_long, &config).is_err());

        let ok = ExecutionRequest {
            timeout_secs: Some(3),
            ..request("print(1)")
        };
        assert_eq!(check_execution(&ok, &config).unwrap().timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_oversized_input_rejected() {
        let config = ServiceConfig {
            max_input_bytes: 4,
            ..Default::default()
        };
        let req = ExecutionRequest {
            input: Some("12345".to_string()),
            ..request("print(input())")
        };
        assert!(check_execution(&req, &config).is_err());
    }

    #[test]
    fn test_validation_request_checks() {
        let config = ServiceConfig::default();
        let blank_id = ValidationRequest {
            exercise_id: " ".to_string(),
            code: "x = 1".to_string(),
        };
        assert!(check_validation(&blank_id, &config).is_err());

        let ok = ValidationRequest {
            exercise_id: "sum-two".to_string(),
            code: "x = 1".to_string(),
        };
        assert!(check_validation(&ok, &config).is_ok());
    }
}
