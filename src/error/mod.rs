//! The unified error handling system for the application.

pub use types::RelayError;

/// A unified `Result` type for the entire application.
///
/// Relay handlers return protocol envelopes instead, see [`crate::relay::error`].
pub type Result<T> = std::result::Result<T, RelayError>;

pub mod types;

/// Context trait for adding context to errors.
pub trait Context<T, E> {
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<RelayError>,
{
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(RelayError::Context {
                context: context().to_string(),
                source: Box::new(error.into()),
            }),
        }
    }
}
