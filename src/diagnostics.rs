//! Structured expansion diagnostics.
//!
//! Expansion errors are chains of context frames around a root cause. This
//! flattens them into a stable, JSON-serializable form the editor (or the
//! CLI) can show without parsing display strings.

use serde::Serialize;

use crate::error::{ExpansionError, SceneError};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Malformed range descriptor.
    RangeParse,
    /// An expression referred to a variable or function that does not exist.
    UnknownName,
    /// Any other expression failure (syntax, wrong types, non-finite result).
    Evaluation,
    LoopTooLarge,
    InvalidTemplate,
    UnknownType,
    InvalidRecord,
    InvalidDefinition,
    NestingTooDeep,
    /// The host used the scene API incorrectly (bad index, unknown parameter, ...).
    HostApiMisuse,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStage {
    Definition,
    Expansion,
    Instantiation,
    Edit,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExpansionDiagnostic {
    pub kind: DiagnosticKind,
    pub stage: ExpansionStage,
    /// The root cause, without context frames.
    pub message: String,
    /// Template locations from the outermost inward, e.g. `element [2]`, `field `x``.
    pub trail: Vec<String>,
    /// Bindings in scope at the innermost frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings: Option<String>,
    /// Full error chain as displayed.
    pub raw: String,
}

fn classify_eval(message: &str) -> DiagnosticKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("variable not found") || lower.contains("function not found") {
        return DiagnosticKind::UnknownName;
    }
    DiagnosticKind::Evaluation
}

fn classify_expansion(root: &ExpansionError) -> DiagnosticKind {
    match root {
        ExpansionError::RangeParse(_) => DiagnosticKind::RangeParse,
        ExpansionError::Evaluate(e) => classify_eval(&e.message),
        ExpansionError::LoopTooLarge(_) => DiagnosticKind::LoopTooLarge,
        ExpansionError::InvalidTemplate { .. } => DiagnosticKind::InvalidTemplate,
        // root() never stops on a context frame
        ExpansionError::Context { .. } => DiagnosticKind::Evaluation,
    }
}

fn innermost_bindings(err: &ExpansionError) -> Option<String> {
    let mut current = err;
    let mut bindings = None;
    while let ExpansionError::Context {
        bindings: b, inner, ..
    } = current
    {
        bindings = Some(b.clone());
        current = inner;
    }
    bindings
}

pub fn from_expansion_error(err: &ExpansionError) -> ExpansionDiagnostic {
    let root = err.root();
    ExpansionDiagnostic {
        kind: classify_expansion(root),
        stage: ExpansionStage::Expansion,
        message: root.to_string(),
        trail: err.trail().into_iter().map(str::to_string).collect(),
        bindings: innermost_bindings(err),
        raw: err.to_string(),
    }
}

impl ExpansionDiagnostic {
    pub fn from_scene_error(err: &SceneError) -> Self {
        let (kind, stage) = match err {
            SceneError::Expansion(inner) => return from_expansion_error(inner),
            SceneError::UnknownType(_) => (DiagnosticKind::UnknownType, ExpansionStage::Instantiation),
            SceneError::InvalidRecord { .. } | SceneError::UnknownModule(_) => {
                (DiagnosticKind::InvalidRecord, ExpansionStage::Instantiation)
            }
            SceneError::NestingTooDeep(_) => (DiagnosticKind::NestingTooDeep, ExpansionStage::Instantiation),
            SceneError::InvalidDefinition { .. } => {
                (DiagnosticKind::InvalidDefinition, ExpansionStage::Definition)
            }
            SceneError::DuplicateType(_) | SceneError::MissingType(_) => {
                (DiagnosticKind::HostApiMisuse, ExpansionStage::Definition)
            }
            SceneError::UnknownParameter { .. }
            | SceneError::IndexOutOfRange { .. }
            | SceneError::NotAModule(_)
            | SceneError::PlacementComplete => (DiagnosticKind::HostApiMisuse, ExpansionStage::Edit),
        };
        let raw = err.to_string();
        ExpansionDiagnostic {
            kind,
            stage,
            message: raw.clone(),
            trail: Vec::new(),
            bindings: None,
            raw,
        }
    }
}
