//! Request validation
//!
//! Runs before any execution unit is created. Oversized input is rejected;
//! cost knobs (`timeout_ms`, `max_steps`) are clamped, never rejected.

use crate::config::RequestLimits;
use crate::error::ValidationError;
use crate::request::ExecutionRequest;
use std::collections::HashSet;
use std::time::Duration;

/// Smallest timeout a request can end up with
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Longest attached file name in bytes
const MAX_FILE_NAME_BYTES: usize = 255;

/// A request that passed validation, with its effective cost limits
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    request: ExecutionRequest,
    timeout: Duration,
    max_steps: u64,
}

impl ValidatedRequest {
    /// The request exactly as submitted
    #[must_use]
    pub const fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    /// Wall-clock budget after defaulting and clamping
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Step cap after defaulting and clamping
    #[must_use]
    pub const fn max_steps(&self) -> u64 {
        self.max_steps
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    limits: RequestLimits,
    main_file: String,
}

impl Validator {
    #[must_use]
    pub fn new(limits: RequestLimits, main_file: impl Into<String>) -> Self {
        Self {
            limits,
            main_file: main_file.into(),
        }
    }

    /// Check sizes and names, resolve effective timeout and step cap
    pub fn validate(
        &self,
        request: ExecutionRequest,
    ) -> std::result::Result<ValidatedRequest, ValidationError> {
        let limits = &self.limits;

        let len = request.code().len();
        if len > limits.max_code_bytes {
            return Err(ValidationError::CodeTooLarge {
                len,
                max: limits.max_code_bytes,
            });
        }

        let len = request.stdin().len();
        if len > limits.max_stdin_bytes {
            return Err(ValidationError::StdinTooLarge {
                len,
                max: limits.max_stdin_bytes,
            });
        }

        self.check_files(&request)?;

        if request.session_id().is_some_and(|id| id.as_str().is_empty()) {
            return Err(ValidationError::EmptySessionId);
        }

        let timeout = request
            .timeout()
            .unwrap_or(limits.default_timeout)
            .clamp(MIN_TIMEOUT, limits.max_timeout);
        let max_steps = request
            .max_steps()
            .unwrap_or(limits.default_max_steps)
            .clamp(1, limits.max_steps);

        Ok(ValidatedRequest {
            request,
            timeout,
            max_steps,
        })
    }

    fn check_files(&self, request: &ExecutionRequest) -> std::result::Result<(), ValidationError> {
        let files = request.attached_files();
        if files.len() > self.limits.max_attached_files {
            return Err(ValidationError::TooManyFiles {
                count: files.len(),
                max: self.limits.max_attached_files,
            });
        }

        let total: usize = files.iter().map(|f| f.content.len()).sum();
        if total > self.limits.max_attached_bytes {
            return Err(ValidationError::AttachedFilesTooLarge {
                total,
                max: self.limits.max_attached_bytes,
            });
        }

        let mut seen = HashSet::with_capacity(files.len());
        for file in files {
            if !is_plain_file_name(&file.name) {
                return Err(ValidationError::InvalidFileName(file.name.clone()));
            }
            if file.name == self.main_file {
                return Err(ValidationError::ReservedFileName(file.name.clone()));
            }
            if !seen.insert(file.name.as_str()) {
                return Err(ValidationError::DuplicateFileName(file.name.clone()));
            }
        }
        Ok(())
    }
}

/// A single path component that stays inside the unit's directory
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FILE_NAME_BYTES
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(RequestLimits::default(), "main.py")
    }

    #[test]
    fn rejects_oversized_code() {
        let code = "x".repeat(RequestLimits::default().max_code_bytes + 1);
        let err = validator().validate(ExecutionRequest::new(code)).unwrap_err();
        assert!(matches!(err, ValidationError::CodeTooLarge { .. }));
    }

    #[test]
    fn accepts_code_at_limit() {
        let code = "#".repeat(RequestLimits::default().max_code_bytes);
        assert!(validator().validate(ExecutionRequest::new(code)).is_ok());
    }

    #[test]
    fn rejects_oversized_stdin() {
        let stdin = "1\n".repeat(RequestLimits::default().max_stdin_bytes);
        let request = ExecutionRequest::builder("input()").stdin(stdin).build();
        assert!(matches!(
            validator().validate(request),
            Err(ValidationError::StdinTooLarge { .. })
        ));
    }

    #[test]
    fn applies_defaults() {
        let validated = validator().validate(ExecutionRequest::new("pass")).unwrap();
        let limits = RequestLimits::default();
        assert_eq!(validated.max_steps(), limits.default_max_steps);
        assert_eq!(validated.timeout(), limits.default_timeout);
    }

    #[test]
    fn clamps_requests_above_ceiling() {
        let limits = RequestLimits::default();
        for requested in [limits.max_steps + 1, limits.max_steps * 10, u64::MAX] {
            let request = ExecutionRequest::builder("pass").max_steps(requested).build();
            let validated = validator().validate(request).unwrap();
            assert_eq!(validated.max_steps(), limits.max_steps);
        }

        let request = ExecutionRequest::builder("pass").timeout_ms(u64::MAX).build();
        assert_eq!(validator().validate(request).unwrap().timeout(), limits.max_timeout);
    }

    #[test]
    fn clamps_zero_up() {
        let request = ExecutionRequest::builder("pass")
            .max_steps(0)
            .timeout_ms(0)
            .build();
        let validated = validator().validate(request).unwrap();
        assert_eq!(validated.max_steps(), 1);
        assert_eq!(validated.timeout(), MIN_TIMEOUT);
    }

    #[test]
    fn keeps_request_unchanged() {
        let request = ExecutionRequest::builder("print(input())")
            .stdin("hi\n")
            .random_seed(3)
            .build();
        let validated = validator().validate(request.clone()).unwrap();
        assert_eq!(validated.request().code(), request.code());
        assert_eq!(validated.request().stdin(), request.stdin());
        assert_eq!(validated.request().random_seed(), Some(3));
    }

    #[test]
    fn rejects_bad_file_names() {
        for name in ["", ".", "..", "../etc/passwd", "dir/file.txt", "a\0b"] {
            let request = ExecutionRequest::builder("pass").file(name, "x").build();
            assert!(
                matches!(
                    validator().validate(request),
                    Err(ValidationError::InvalidFileName(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_main_file_collision_and_duplicates() {
        let request = ExecutionRequest::builder("pass").file("main.py", "").build();
        assert!(matches!(
            validator().validate(request),
            Err(ValidationError::ReservedFileName(_))
        ));

        let request = ExecutionRequest::builder("pass")
            .file("data.txt", "1")
            .file("data.txt", "2")
            .build();
        assert!(matches!(
            validator().validate(request),
            Err(ValidationError::DuplicateFileName(_))
        ));
    }

    #[test]
    fn caps_attached_files() {
        let limits = RequestLimits {
            max_attached_files: 2,
            max_attached_bytes: 8,
            ..RequestLimits::default()
        };
        let validator = Validator::new(limits, "main.py");

        let request = ExecutionRequest::builder("pass")
            .file("a", "")
            .file("b", "")
            .file("c", "")
            .build();
        assert!(matches!(
            validator.validate(request),
            Err(ValidationError::TooManyFiles { count: 3, max: 2 })
        ));

        let request = ExecutionRequest::builder("pass")
            .file("a", "12345")
            .file("b", "6789")
            .build();
        assert!(matches!(
            validator.validate(request),
            Err(ValidationError::AttachedFilesTooLarge { total: 9, max: 8 })
        ));
    }

    #[test]
    fn rejects_empty_session_id() {
        let request = ExecutionRequest::builder("pass").session("").build();
        assert_eq!(
            validator().validate(request).unwrap_err(),
            ValidationError::EmptySessionId
        );
    }
}
