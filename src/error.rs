//! Unified error type.
//!
//! Only programmer-caused conditions live here: a bad route declaration, a
//! handler parameter nothing can supply, a middleware identifier the
//! container does not know, a pipeline that runs dry. "No route" is never an
//! error; see [`Dispatch`](crate::Dispatch).

use http::Method;
use thiserror::Error;

use crate::container::Key;

/// The error type returned by kite's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bind address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    MalformedPattern(#[from] MalformedPattern),

    #[error("cannot register two routes matching `{pattern}` for method {method}")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("route table for {method}: {reason}")]
    RouteTable { method: Method, reason: String },

    #[error(transparent)]
    UnresolvedParameter(#[from] UnresolvedParameter),

    #[error("could not resolve middleware `{id}`")]
    MiddlewareResolution {
        id: String,
        #[source]
        source: Option<NotFound>,
    },

    #[error("could not resolve handler `{id}`")]
    UnresolvedHandler {
        id: String,
        #[source]
        source: Option<NotFound>,
    },

    #[error("reached the end of the middleware pipeline without a response; is a terminal handler appended?")]
    PipelineExhausted,

    #[error(transparent)]
    NotFound(#[from] NotFound),
}

/// The service registry has no entry under the requested key.
#[derive(Clone, Debug, Error)]
#[error("no service registered for {key}")]
pub struct NotFound {
    pub key: Key,
}

/// A route pattern that cannot be compiled.
#[derive(Debug, Error)]
#[error("malformed route pattern `{pattern}`: {kind}")]
pub struct MalformedPattern {
    pub pattern: String,
    pub kind: PatternErrorKind,
}

/// Why a route pattern was rejected.
#[derive(Debug, Error)]
pub enum PatternErrorKind {
    #[error("variable `{0}` appears more than once")]
    DuplicateVariable(String),

    #[error("invalid variable name `{name}` at byte {offset}")]
    InvalidVariableName { name: String, offset: usize },

    #[error("invalid regex for variable `{name}`: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("unbalanced `{delimiter}` at byte {offset}")]
    Unbalanced { delimiter: char, offset: usize },

    #[error("optional segments may only occur at the end of a route")]
    OptionalNotTrailing,

    #[error("empty optional segment")]
    EmptyOptional,

    #[error("pattern declares optional segments; compile its variants instead")]
    UnexpectedOptional,
}

/// No value could be found for one of a handler's declared parameters.
#[derive(Debug, Error)]
#[error(
    "unable to resolve a value for parameter ({} ${parameter}) of `{target}`",
    .declared_type.unwrap_or("_")
)]
pub struct UnresolvedParameter {
    pub parameter: String,
    pub declared_type: Option<&'static str>,
    pub target: String,
    #[source]
    pub cause: Option<NotFound>,
}
