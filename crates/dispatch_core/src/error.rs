//! Error types for the scheduling core.
//!
//! Only misuse of a disposed scheduler and non-finite times surface as
//! errors. Handler faults are recovered and logged by the scheduler itself.

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SchedulerError {
    /// A mutating call was made after [crate::scheduler::Scheduler::dispose].
    #[error("scheduler has been disposed")]
    Disposed,

    /// An event or target time was NaN or infinite.
    #[error("simulation time must be finite, got {0}")]
    NonFiniteTime(f64),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed fine but a value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_error_display() {
        assert_eq!(
            SchedulerError::Disposed.to_string(),
            "scheduler has been disposed"
        );
    }

    #[test]
    fn non_finite_error_mentions_value() {
        let err = SchedulerError::NonFiniteTime(f64::INFINITY);
        assert!(err.to_string().contains("inf"));
    }

    #[test]
    fn invalid_config_names_the_problem() {
        let err = ConfigError::Invalid("retry_delay_ms must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid config value: retry_delay_ms must be positive"
        );
    }

    #[test]
    fn panic_message_handles_both_string_kinds() {
        let borrowed: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(&*borrowed), "boom");
        assert_eq!(panic_message(&*owned), "bang");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
