use std::{
    error::Error,
    fmt::{Debug, Display},
};

use condynsate_macros::EnumToString;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, EnumToString)]
pub enum CondynsateErrorTypes {
    UnknownError,
    /// Bad shape, range or type passed to a mutator. The call was a no-op.
    InvalidArgument,
    /// The subsystem is not started yet, or was already terminated.
    NotRunning,
    /// The subsystem was not requested in the project configuration.
    NotAvailable,
    /// The render or scene backend closed its transport unexpectedly.
    TransportClosed,
    BackendError,
    RecordingError,
    ConfigError,
    ImplementationError,
}

#[derive(Clone)]
pub struct CondynsateError {
    error_type: CondynsateErrorTypes,
    what: String,
}

impl CondynsateError {
    pub fn new(error_type: CondynsateErrorTypes, what: String) -> Self {
        Self { error_type, what }
    }

    pub fn detailed_error(&self) -> String {
        format!("Condynsate Error of type {}: {}", self.error_type, self.what)
    }

    pub fn error_type(&self) -> CondynsateErrorTypes {
        self.error_type.clone()
    }

    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn chain(self, what: String) -> Self {
        Self {
            error_type: self.error_type,
            what: format!("{}\n↪ {}", self.what, what),
        }
    }
}

impl Display for CondynsateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Condynsate Error: {}", self.error_type)
    }
}

impl Debug for CondynsateError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.detailed_error())
    }
}

impl Error for CondynsateError {}

pub type CondynsateResult<T> = Result<T, CondynsateError>;

/// Merges the outcome of several independent teardown steps.
///
/// Every step has already run when this is called. The first error is kept
/// and the following ones are chained to it, so nothing is lost from the
/// report.
pub fn aggregate_results<I>(results: I) -> CondynsateResult<()>
where
    I: IntoIterator<Item = CondynsateResult<()>>,
{
    let mut aggregate: Option<CondynsateError> = None;
    for result in results {
        if let Err(e) = result {
            aggregate = Some(match aggregate {
                None => e,
                Some(first) => first.chain(e.detailed_error()),
            });
        }
    }
    match aggregate {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn aggregate_keeps_first_error_type() {
        let res = aggregate_results(vec![
            Ok(()),
            Err(CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "scene closed".to_string(),
            )),
            Err(CondynsateError::new(
                CondynsateErrorTypes::RecordingError,
                "no ffmpeg".to_string(),
            )),
        ]);
        let err = res.unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::TransportClosed);
        assert!(err.what().contains("scene closed"));
        assert!(err.what().contains("no ffmpeg"));
    }

    #[test]
    pub fn aggregate_of_successes_is_ok() {
        assert!(aggregate_results(vec![Ok(()), Ok(())]).is_ok());
        assert!(aggregate_results(Vec::new()).is_ok());
    }

    #[test]
    pub fn display_is_terse() {
        let err = CondynsateError::new(CondynsateErrorTypes::NotRunning, "details".to_string());
        assert_eq!(format!("{err}"), "Condynsate Error: NotRunning");
        assert!(err.detailed_error().ends_with("details"));
    }
}
