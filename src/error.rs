//! Error taxonomy for module expansion and scene operations.
//!
//! Low-level failures (an expression that does not evaluate, a malformed range
//! descriptor, a loop that is too long) are wrapped in [`ExpansionError::Context`]
//! frames as they travel outward through the expander, so the message that
//! reaches a module instance reads as a chain from the outermost template
//! location down to the root cause.

use thiserror::Error;

/// An expression failed to parse or evaluate.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to evaluate `{expr}`: {message}")]
pub struct EvalError {
    pub expr: String,
    pub message: String,
}

impl EvalError {
    pub fn new(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            message: message.into(),
        }
    }
}

/// Why a range descriptor was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeParseCause {
    #[error("missing `=` between name and range")]
    MissingEquals,

    #[error("`{0}` is not a valid variable name")]
    InvalidName(String),

    #[error("expected `start:step:end[:default]`, found {0} field(s)")]
    FieldCount(usize),

    #[error("{field} is not a number: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error(transparent)]
    Evaluate(#[from] EvalError),
}

/// A `name=start:step:end[:default]` descriptor could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid range `{descriptor}` with {bindings}: {cause}")]
pub struct RangeParseError {
    pub descriptor: String,
    /// Rendering of the bindings the descriptor was evaluated against.
    pub bindings: String,
    pub cause: RangeParseCause,
}

/// A `for` loop (or the product of its ranges) exceeds the module's loop cap.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("loop over `{variable}` exceeds the limit of {limit} iterations")]
pub struct LoopTooLargeError {
    pub variable: String,
    /// Iterations counted when the cap was hit (counting stops just past the limit).
    pub count: usize,
    pub limit: usize,
}

/// A record's `type` tag has no registered constructor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown object type `{tag}`")]
pub struct UnknownTypeError {
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpansionError {
    #[error(transparent)]
    RangeParse(#[from] RangeParseError),

    #[error(transparent)]
    Evaluate(#[from] EvalError),

    #[error(transparent)]
    LoopTooLarge(#[from] LoopTooLargeError),

    #[error("invalid template at {path}: {message}")]
    InvalidTemplate { path: String, message: String },

    /// A failure inside a nested template, tagged with where it happened.
    #[error("in {location} with {bindings}\n{inner}")]
    Context {
        location: String,
        bindings: String,
        inner: Box<ExpansionError>,
    },
}

impl ExpansionError {
    pub fn invalid_template(path: impl Into<String>, message: impl Into<String>) -> Self {
        ExpansionError::InvalidTemplate {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap this error in a context frame.
    pub fn within(self, location: impl Into<String>, bindings: impl ToString) -> Self {
        ExpansionError::Context {
            location: location.into(),
            bindings: bindings.to_string(),
            inner: Box::new(self),
        }
    }

    /// The innermost error, with every context frame stripped.
    pub fn root(&self) -> &ExpansionError {
        let mut current = self;
        while let ExpansionError::Context { inner, .. } = current {
            current = inner;
        }
        current
    }

    /// Context locations from the outermost frame inward.
    pub fn trail(&self) -> Vec<&str> {
        let mut trail = Vec::new();
        let mut current = self;
        while let ExpansionError::Context {
            location, inner, ..
        } = current
        {
            trail.push(location.as_str());
            current = inner;
        }
        trail
    }
}

/// Errors raised by scene-level operations and object construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error(transparent)]
    UnknownType(#[from] UnknownTypeError),

    #[error("invalid `{tag}` record: {message}")]
    InvalidRecord { tag: String, message: String },

    #[error("invalid module definition `{name}`: {message}")]
    InvalidDefinition { name: String, message: String },

    #[error("unknown module `{0}`")]
    UnknownModule(String),

    #[error("module `{module}` has no parameter `{name}`")]
    UnknownParameter { module: String, name: String },

    #[error("object type `{0}` is registered twice")]
    DuplicateType(String),

    #[error("object type `{0}` has no registered constructor")]
    MissingType(String),

    #[error("modules nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("no object at index {index} (scene holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("object #{0} is not a module instance")]
    NotAModule(usize),

    #[error("module placement is already complete")]
    PlacementComplete,
}

impl SceneError {
    pub fn invalid_record(tag: impl Into<String>, message: impl ToString) -> Self {
        SceneError::InvalidRecord {
            tag: tag.into(),
            message: message.to_string(),
        }
    }
}
