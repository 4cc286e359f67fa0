//! Tracing subscriber setup for the `koop` binary.
//!
//! Events go to stderr through a `fmt` layer. The filter defaults to `info`
//! and can be overridden with `RUST_LOG`. When `RUST_LOG` is unset, the
//! [`NUMERICS_TARGET`] warnings are silenced: they report rank reductions and
//! discarded imaginary parts, which are expected on every large sweep.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Target used for known-benign numerical warnings.
pub const NUMERICS_TARGET: &str = "koop::numerics";

/// Build the filter used by [`init`].
pub fn build_filter(default_level: tracing::Level) -> Result<EnvFilter, AppError> {
    let user_configured = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if user_configured {
        return Ok(filter);
    }

    let directive = format!("{NUMERICS_TARGET}=error")
        .parse()
        .map_err(|e| AppError::input(format!("Invalid log directive: {e}")))?;
    Ok(filter.add_directive(directive))
}

/// Install the global subscriber.
///
/// Calling this twice is harmless: the second installation attempt is ignored.
pub fn init(default_level: tracing::Level) -> Result<(), AppError> {
    let filter = build_filter(default_level)?;
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_mentions_numerics_target() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let filter = build_filter(tracing::Level::INFO).unwrap();
        assert!(filter.to_string().contains(NUMERICS_TARGET));
    }
}
