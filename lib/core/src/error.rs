//! Error handling foundation for portcullis.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums; clients that talk to the outside world wrap them in a
//! `rootcause::Report` so the failing layer travels with the error.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct ProbeError;

    impl fmt::Display for ProbeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "probe failed")
        }
    }

    impl std::error::Error for ProbeError {}

    fn fails() -> Result<(), ProbeError> {
        Err(ProbeError.into())
    }

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn report_carries_context_message() {
        let err = fails().expect_err("should fail");
        assert!(err.to_string().contains("probe failed"));
    }
}
