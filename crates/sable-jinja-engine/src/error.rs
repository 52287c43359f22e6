// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::Span;
use thiserror::Error;

/// Unified error type for the template engine.
///
/// The set of variants is closed and mirrors the failure taxonomy exposed at
/// the engine boundary: compile-time failures carry a `Span` into the template
/// source, render-time failures name the filter/test/function/template that
/// could not be resolved. Prefer the constructor helpers when propagating
/// errors that originate from a concrete region of the template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed template source. Aborts registration entirely.
    #[error("syntax error: {message}")]
    Syntax {
        /// Human-readable description of the problem.
        message: String,
        /// Location of the offending region, when known.
        span: Option<Span>,
    },
    /// An escape sequence in a string literal is not recognised.
    #[error("bad escape sequence '\\{sequence}'")]
    BadEscape {
        /// The character following the backslash.
        sequence: char,
        /// Location of the escape.
        span: Option<Span>,
    },
    /// A render or lookup referenced a template name that is not registered.
    #[error("template not found: {name}")]
    TemplateNotFound {
        /// The requested template name.
        name: String,
    },
    /// A filter name could not be resolved at evaluation time.
    #[error("unknown filter: {name}")]
    UnknownFilter {
        /// The unresolved filter name.
        name: String,
    },
    /// A test name (`is ...`) could not be resolved at evaluation time.
    #[error("unknown test: {name}")]
    UnknownTest {
        /// The unresolved test name.
        name: String,
    },
    /// A global function name could not be resolved at evaluation time.
    #[error("unknown function: {name}")]
    UnknownFunction {
        /// The unresolved function name.
        name: String,
    },
    /// A filter/test/function call received more arguments than it accepts.
    #[error("too many arguments for {name}")]
    TooManyArguments {
        /// The callable that was over-supplied.
        name: String,
    },
    /// A filter/test/function call is missing a required argument.
    #[error("missing argument for {name}")]
    MissingArgument {
        /// The callable that was under-supplied.
        name: String,
    },
    /// A name failed to resolve while strict evaluation is enabled.
    #[error("undefined variable: {name}")]
    Undefined {
        /// The unresolved name.
        name: String,
    },
    /// Host data could not be converted into the engine value model.
    #[error("serialization failure: {message}")]
    BadSerialization {
        /// Description from the conversion layer.
        message: String,
    },
    /// An `include` target is missing or includes recursed too deeply.
    #[error("bad include: {message}")]
    BadInclude {
        /// Description of the include failure.
        message: String,
    },
    /// A `for k, v in ...` target does not match the shape of the iterable.
    #[error("cannot unpack: {message}")]
    CannotUnpack {
        /// Description of the arity mismatch.
        message: String,
    },
    /// The output sink rejected a write.
    #[error("write failure")]
    WriteFailure,
    /// An operator was applied to operands it is not defined for.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the type mismatch.
        message: String,
    },
}

impl Error {
    pub(crate) fn syntax(message: impl Into<String>, span: Option<Span>) -> Self {
        Error::Syntax {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn syntax_with_span(message: impl Into<String>, span: Span) -> Self {
        Self::syntax(message, Some(span))
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    pub(crate) fn bad_include(message: impl Into<String>) -> Self {
        Error::BadInclude {
            message: message.into(),
        }
    }

    pub(crate) fn cannot_unpack(message: impl Into<String>) -> Self {
        Error::CannotUnpack {
            message: message.into(),
        }
    }

    /// Returns the source span associated with the error, when one exists.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Syntax { span, .. } | Error::BadEscape { span, .. } => *span,
            _ => None,
        }
    }
}

impl From<std::fmt::Error> for Error {
    fn from(_: std::fmt::Error) -> Self {
        Error::WriteFailure
    }
}
