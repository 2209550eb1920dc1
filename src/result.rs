//! Result and error types for the analysis.

use failure_derive::Fail;

/// A fatal analysis error.
///
/// Any of these aborts the whole analysis; callers are expected to fall back
/// to a degraded (always may-alias) result rather than crash downstream
/// passes. Recoverable situations such as calls to unmodeled external
/// functions never surface here; they widen the computed sets instead.
#[derive(Fail, Debug, PartialEq, Eq)]
pub enum AnalysisError {
    /// The input IR violates an assumption the analysis relies on, such as
    /// a load through a non-pointer value.
    #[fail(display = "malformed IR: {}", _0)]
    IrMalformed(String),

    /// A global initializer uses a constant expression the object mapper
    /// does not handle.
    #[fail(display = "unhandled constant expression: {}", _0)]
    UnknownConstExpr(String),

    /// The auxiliary analysis reported an id with no corresponding object.
    /// This indicates a bug in id plumbing, not in the analyzed program.
    #[fail(display = "auxiliary id {} has no matching object", _0)]
    AuxMismatch(u32),
}

/// A convenient alias for a `Result` that uses `AnalysisError` as the error
/// type.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
