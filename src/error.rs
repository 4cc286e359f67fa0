//! Error type shared by the library and the `koop` binary.
//!
//! Every failure carries the process exit code it maps to:
//!
//! - `2`: invalid input (config, CLI flags, files, dataset layout)
//! - `3`: not enough data for the requested operation
//! - `4`: numerical or internal failure (singular systems, non-finite values, IO on outputs)

/// Exit code for invalid input.
pub const EXIT_INPUT: u8 = 2;
/// Exit code for insufficient data.
pub const EXIT_DATA: u8 = 3;
/// Exit code for numerical/internal failures.
pub const EXIT_NUMERIC: u8 = 4;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(EXIT_DATA, message)
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(EXIT_NUMERIC, message)
    }

    /// Error returned by estimator methods called before `fit`.
    pub fn not_fitted(what: &str) -> Self {
        Self::new(EXIT_INPUT, format!("{what} must be fitted first."))
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
