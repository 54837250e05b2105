#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use naia_ast::{Loc, SourceMap};

/// Everything the core can report. `ForeignCapabilityDenied` is the one
/// fatal kind; all others accumulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticKind {
    TypeMismatch,
    UnresolvedTypeVariable,
    SubtypeViolation,
    SubtypeAmbiguous,
    UseAfterMove,
    DoubleMove,
    ForeignCapabilityDenied,
    ForeignConversionUnsupported,
    UnresolvedName,
    AssignToImmutable,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::TypeMismatch => "type mismatch",
            DiagnosticKind::UnresolvedTypeVariable => "unresolved type variable",
            DiagnosticKind::SubtypeViolation => "subtype violation",
            DiagnosticKind::SubtypeAmbiguous => "ambiguous subtype",
            DiagnosticKind::UseAfterMove => "use after move",
            DiagnosticKind::DoubleMove => "double move",
            DiagnosticKind::ForeignCapabilityDenied => "foreign capability denied",
            DiagnosticKind::ForeignConversionUnsupported => "foreign conversion unsupported",
            DiagnosticKind::UnresolvedName => "unresolved name",
            DiagnosticKind::AssignToImmutable => "assignment to immutable",
        }
    }

    /// Fatal kinds stop the pipeline at the next boundary; nothing after
    /// them is analyzed.
    pub fn is_fatal(self) -> bool {
        matches!(self, DiagnosticKind::ForeignCapabilityDenied)
    }

    pub fn is_ownership(self) -> bool {
        matches!(self, DiagnosticKind::UseAfterMove | DiagnosticKind::DoubleMove)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub loc: Loc,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind,
            loc,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// `<file>:<line>:<col>: <kind>: <message>` plus an optional
    /// `hint: ...` line.
    pub fn render(&self, map: &SourceMap) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: {}",
            map.name(self.loc.file),
            self.loc.line,
            self.loc.col,
            self.kind.as_str(),
            self.message
        );
        if let Some(hint) = &self.hint {
            out.push_str("\nhint: ");
            out.push_str(hint);
        }
        out
    }

    pub fn type_mismatch(loc: Loc, expected: &str, found: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("expected `{expected}`, found `{found}`"),
        )
    }

    pub fn unresolved_name(loc: Loc, name: &str) -> Self {
        Self::new(
            DiagnosticKind::UnresolvedName,
            loc,
            format!("`{name}` is not defined"),
        )
    }

    pub fn unresolved_type_variable(loc: Loc, name: &str) -> Self {
        Self::new(
            DiagnosticKind::UnresolvedTypeVariable,
            loc,
            format!("the type of `{name}` could not be inferred"),
        )
        .with_hint(format!("add a type annotation to `{name}`"))
    }

    pub fn assign_to_immutable(loc: Loc, name: &str) -> Self {
        Self::new(
            DiagnosticKind::AssignToImmutable,
            loc,
            format!("`{name}` is declared `const` and cannot be reassigned"),
        )
        .with_hint(format!("declare `{name}` with `let` to allow reassignment"))
    }

    pub fn use_after_move(loc: Loc, name: &str, moved_at: Loc) -> Self {
        Self::new(
            DiagnosticKind::UseAfterMove,
            loc,
            format!(
                "`{name}` was moved at {}:{} and cannot be used here",
                moved_at.line, moved_at.col
            ),
        )
        .with_hint(format!("clone `{name}` before this use"))
    }

    pub fn double_move(loc: Loc, name: &str, moved_at: Loc) -> Self {
        Self::new(
            DiagnosticKind::DoubleMove,
            loc,
            format!(
                "`{name}` is moved a second time; the first move was at {}:{}",
                moved_at.line, moved_at.col
            ),
        )
        .with_hint(format!("clone `{name}` before this use"))
    }

    pub fn capability_denied(loc: Loc, module: &str) -> Self {
        Self::new(
            DiagnosticKind::ForeignCapabilityDenied,
            loc,
            format!("host module `{module}` is not in the project capability allowlist"),
        )
        .with_hint(format!("add \"{module}\" to `capabilities` in Naia.toml"))
    }

    pub fn conversion_unsupported(loc: Loc, ty: &str) -> Self {
        Self::new(
            DiagnosticKind::ForeignConversionUnsupported,
            loc,
            format!("a value of type `{ty}` cannot cross the host boundary"),
        )
        .with_hint("only Int, Float, Str, Bool, List, and Dict values convert to host values")
    }

    pub fn arity_mismatch(loc: Loc, expected: usize, found: usize) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("call expects {expected} arguments, found {found}"),
        )
    }

    pub fn not_callable(loc: Loc, ty: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("cannot call a value of type `{ty}`"),
        )
    }

    pub fn no_field(loc: Loc, ty: &str, field: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("`{ty}` has no field `{field}`"),
        )
    }

    pub fn bad_operand(loc: Loc, op: &str, ty: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("operator `{op}` cannot be applied to a value of type `{ty}`"),
        )
    }

    pub fn infinite_type(loc: Loc, var: &str, ty: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("type `{var}` would be infinite: it occurs inside `{ty}`"),
        )
    }

    pub fn recursive_struct(loc: Loc, name: &str) -> Self {
        Self::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("struct `{name}` recursively contains itself"),
        )
        .with_hint("remove the recursive field or store a key instead of the value")
    }

    pub fn struct_lit_missing(loc: Loc, name: &str, field: &str) -> Self {
        Self::new(
            DiagnosticKind::SubtypeViolation,
            loc,
            format!("literal for `{name}` is missing field `{field}`"),
        )
    }

    pub fn struct_lit_unknown_field(loc: Loc, name: &str, field: &str) -> Self {
        Self::new(
            DiagnosticKind::SubtypeViolation,
            loc,
            format!("literal for `{name}` has unknown field `{field}`"),
        )
    }

    pub fn subtype_violation(loc: Loc, expected: &str, found: &str, missing: &[String]) -> Self {
        let message = if missing.is_empty() {
            format!("`{found}` cannot be used where `{expected}` is expected; the shapes disagree on field types")
        } else {
            let mut list = String::new();
            for (i, name) in missing.iter().enumerate() {
                if i > 0 {
                    list.push_str(", ");
                }
                list.push('`');
                list.push_str(name);
                list.push('`');
            }
            format!("`{found}` cannot be used where `{expected}` is expected; missing {list}")
        };
        Self::new(DiagnosticKind::SubtypeViolation, loc, message)
    }

    pub fn subtype_ambiguous(loc: Loc, fields: &[String], candidates: &[String]) -> Self {
        let mut field_list = String::new();
        for (i, name) in fields.iter().enumerate() {
            if i > 0 {
                field_list.push_str(", ");
            }
            field_list.push_str(name);
        }
        let mut cand_list = String::new();
        for (i, name) in candidates.iter().enumerate() {
            if i > 0 {
                cand_list.push_str(", ");
            }
            cand_list.push('`');
            cand_list.push_str(name);
            cand_list.push('`');
        }
        Self::new(
            DiagnosticKind::SubtypeAmbiguous,
            loc,
            format!("inferred fields {{{field_list}}} match unrelated structs {cand_list}"),
        )
        .with_hint("annotate the binding with the intended struct")
    }

    pub fn unresolved_module(loc: Loc, module: &str) -> Self {
        Self::new(
            DiagnosticKind::UnresolvedName,
            loc,
            format!("`{module}` is not a module in this program"),
        )
    }

    pub fn unresolved_export(loc: Loc, module: &str, name: &str) -> Self {
        Self::new(
            DiagnosticKind::UnresolvedName,
            loc,
            format!("module `{module}` has no export named `{name}`"),
        )
    }
}

/// Collects diagnostics from every pass: deduplicates by (location, kind),
/// enforces the per-unit bound, and orders output by file name, line, and
/// column.
#[derive(Debug)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
    seen: BTreeSet<(Loc, DiagnosticKind)>,
    max: usize,
    dropped: usize,
    fatal: bool,
}

impl DiagnosticSink {
    pub fn new(max: usize) -> Self {
        Self {
            diags: Vec::new(),
            seen: BTreeSet::new(),
            max,
            dropped: 0,
            fatal: false,
        }
    }

    /// Records a diagnostic. Returns false when it was dropped as a
    /// duplicate or because the bound is exhausted; fatal diagnostics are
    /// always kept.
    pub fn push(&mut self, diag: Diagnostic) -> bool {
        if !self.seen.insert((diag.loc, diag.kind)) {
            return false;
        }
        if diag.kind.is_fatal() {
            self.fatal = true;
        } else if self.diags.len() >= self.max {
            self.dropped += 1;
            return false;
        }
        self.diags.push(diag);
        true
    }

    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        for d in diags {
            self.push(d);
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    /// How many non-fatal diagnostics fell past the bound.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// The ordered output: by file name, then line, then column; insertion
    /// order breaks ties.
    pub fn into_sorted(self, map: &SourceMap) -> Vec<Diagnostic> {
        let mut diags = self.diags;
        diags.sort_by(|a, b| {
            (map.name(a.loc.file), a.loc.line, a.loc.col).cmp(&(
                map.name(b.loc.file),
                b.loc.line,
                b.loc.col,
            ))
        });
        diags
    }
}

/// Renders a sorted diagnostic list the way a driver would print it.
pub fn render_all(diags: &[Diagnostic], map: &SourceMap) -> String {
    diags
        .iter()
        .map(|d| d.render(map))
        .collect::<Vec<_>>()
        .join("\n")
}
