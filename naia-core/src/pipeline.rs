#![forbid(unsafe_code)]

//! The pass pipeline over a source unit.
//!
//! Order is fixed: the capability gate runs first and a denial ends the
//! run with that single diagnostic. File-local inference then runs one
//! worker per file over disjoint id spaces, linking merges the files and
//! closes every type, the ownership pass annotates moves and ledger
//! operations, and the bridge pass finalizes the module ledgers. A cancel
//! token is honored between passes, never inside one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use naia_ast as ast;
use naia_ast::SourceMap;

use crate::bridge::{self, CapabilityAllowlist, HostRegistry};
use crate::checked::CheckedUnit;
use crate::diag::{self, Diagnostic, DiagnosticSink};
use crate::infer::{self, LEDGER_STRIDE, VAR_STRIDE};
use crate::link;
use crate::ownership;

#[derive(Clone, Debug)]
pub struct CheckOptions {
    /// Non-fatal diagnostics kept per run; the rest are counted and
    /// dropped.
    pub max_diagnostics: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            max_diagnostics: 100,
        }
    }
}

/// Cooperative cancellation handle. Cancelling never corrupts a report:
/// the pipeline finishes the pass it is in and stops at the next
/// boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    Canceled,
}

/// What a run produced: final status plus the sorted, deduplicated,
/// bounded diagnostics.
#[derive(Debug)]
pub struct CheckReport {
    pub status: CheckStatus,
    pub diagnostics: Vec<Diagnostic>,
    map: SourceMap,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    /// Driver exit code: 0 clean, 1 diagnostics, 2 canceled.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CheckStatus::Passed => 0,
            CheckStatus::Failed => 1,
            CheckStatus::Canceled => 2,
        }
    }

    pub fn render(&self) -> String {
        diag::render_all(&self.diagnostics, &self.map)
    }
}

/// Runs every pass and returns the annotated unit alongside the report.
/// The unit is present whenever analysis ran to completion, diagnostics
/// or not; a gate denial or cancellation yields `None`.
pub fn analyze(
    unit: &ast::SourceUnit,
    allow: &CapabilityAllowlist,
    options: &CheckOptions,
    token: &CancelToken,
) -> (Option<CheckedUnit>, CheckReport) {
    let mut sink = DiagnosticSink::new(options.max_diagnostics);

    let caps = match bridge::capability_gate(unit, allow) {
        Ok(caps) => caps,
        Err(denied) => {
            sink.push(denied);
            return (None, finish(CheckStatus::Failed, sink, &unit.map));
        }
    };
    if token.is_canceled() {
        return (None, finish(CheckStatus::Canceled, sink, &unit.map));
    }

    let outcomes: Vec<infer::LocalOutcome> = unit
        .modules
        .par_iter()
        .enumerate()
        .map(|(idx, module)| {
            infer::check_module(
                module,
                &caps,
                &HostRegistry,
                idx as u32 * VAR_STRIDE,
                idx as u32 * LEDGER_STRIDE,
            )
        })
        .collect();
    if token.is_canceled() {
        return (None, finish(CheckStatus::Canceled, sink, &unit.map));
    }

    let linked = link::link_unit(outcomes);
    sink.extend(linked.diags);
    let mut modules = linked.modules;
    if token.is_canceled() {
        return (None, finish(CheckStatus::Canceled, sink, &unit.map));
    }

    for module in &mut modules {
        let mut diags = Vec::new();
        ownership::check_ownership(module, &mut diags);
        sink.extend(diags);
    }
    if token.is_canceled() {
        return (None, finish(CheckStatus::Canceled, sink, &unit.map));
    }

    for module in &mut modules {
        bridge::finalize_ledgers(module);
    }
    for module in &modules {
        debug_assert!(
            bridge::replay_ledgers(module).is_ok(),
            "ledger count went negative in `{}`",
            module.name
        );
    }

    let status = if sink.is_empty() {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed
    };
    let checked = CheckedUnit {
        map: unit.map.clone(),
        capabilities: caps,
        modules,
    };
    (Some(checked), finish(status, sink, &unit.map))
}

/// `analyze` without the annotated unit, for callers that only report.
pub fn check(
    unit: &ast::SourceUnit,
    allow: &CapabilityAllowlist,
    options: &CheckOptions,
    token: &CancelToken,
) -> CheckReport {
    analyze(unit, allow, options, token).1
}

fn finish(status: CheckStatus, sink: DiagnosticSink, map: &SourceMap) -> CheckReport {
    CheckReport {
        status,
        diagnostics: sink.into_sorted(map),
        map: map.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checked::{CheckedItem, CheckedStmt};
    use crate::diag::DiagnosticKind;
    use crate::types::Type;
    use naia_ast::{FileId, Loc, build, loc};

    fn at(file: u32, line: u32, col: u32) -> Loc {
        loc(FileId(file), line, col)
    }

    fn unit_of(files: Vec<(&str, &str, Vec<naia_ast::Item>)>) -> ast::SourceUnit {
        let mut unit = ast::SourceUnit::new();
        for (file_name, module_name, items) in files {
            let file = unit.map.intern(file_name);
            unit.add_module(build::module(file, module_name, items));
        }
        unit
    }

    fn run(unit: &ast::SourceUnit, allow: CapabilityAllowlist) -> CheckReport {
        check(
            unit,
            &allow,
            &CheckOptions::default(),
            &CancelToken::new(),
        )
    }

    #[test]
    fn a_clean_unit_passes_with_exit_code_zero() {
        let unit = unit_of(vec![
            (
                "lib.na",
                "lib",
                vec![build::fn_def(
                    at(0, 1, 1),
                    "one",
                    Vec::new(),
                    Some(build::ann_name(at(0, 1, 10), "Int")),
                    build::yielding(at(0, 1, 15), Vec::new(), build::int(at(0, 2, 5), 1)),
                )],
            ),
            (
                "main.na",
                "main",
                vec![
                    build::import(at(1, 1, 1), "lib", &["one"]),
                    build::top(build::let_(
                        at(1, 2, 1),
                        "x",
                        build::call(
                            at(1, 2, 9),
                            build::name(at(1, 2, 9), "one"),
                            Vec::new(),
                        ),
                    )),
                ],
            ),
        ]);
        let (checked, report) = analyze(
            &unit,
            &CapabilityAllowlist::default(),
            &CheckOptions::default(),
            &CancelToken::new(),
        );
        assert_eq!(report.status, CheckStatus::Passed);
        assert_eq!(report.exit_code(), 0);
        let checked = checked.unwrap();
        let CheckedItem::Stmt(CheckedStmt::Let { decl_ty, .. }) = &checked.modules[1].items[1]
        else {
            panic!("expected a let statement");
        };
        assert_eq!(*decl_ty, Type::INT);
    }

    #[test]
    fn type_errors_fail_the_run() {
        let unit = unit_of(vec![(
            "main.na",
            "main",
            vec![build::top(build::let_ann(
                at(0, 1, 1),
                "x",
                build::ann_name(at(0, 1, 8), "Int"),
                build::str_(at(0, 1, 14), "oops"),
            ))],
        )]);
        let report = run(&unit, CapabilityAllowlist::default());
        assert_eq!(report.status, CheckStatus::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn a_capability_denial_ends_the_run_with_one_diagnostic() {
        // the second module carries a type error that must never surface
        let unit = unit_of(vec![
            (
                "io.na",
                "io",
                vec![build::foreign_import(at(0, 1, 1), "fs", &["read_text"])],
            ),
            (
                "main.na",
                "main",
                vec![build::top(build::let_ann(
                    at(1, 1, 1),
                    "x",
                    build::ann_name(at(1, 1, 8), "Int"),
                    build::str_(at(1, 1, 14), "oops"),
                ))],
            ),
        ]);
        let (checked, report) = analyze(
            &unit,
            &CapabilityAllowlist::default(),
            &CheckOptions::default(),
            &CancelToken::new(),
        );
        assert!(checked.is_none());
        assert_eq!(report.status, CheckStatus::Failed);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(
            report.diagnostics[0].kind,
            DiagnosticKind::ForeignCapabilityDenied
        );
    }

    #[test]
    fn a_granted_capability_lets_the_gate_through() {
        let unit = unit_of(vec![(
            "io.na",
            "io",
            vec![
                build::foreign_import(at(0, 1, 1), "fs", &["read_text"]),
                build::top(build::let_(
                    at(0, 2, 1),
                    "text",
                    build::call(
                        at(0, 2, 12),
                        build::name(at(0, 2, 12), "read_text"),
                        vec![build::str_(at(0, 2, 22), "notes.txt")],
                    ),
                )),
            ],
        )]);
        let report = run(&unit, CapabilityAllowlist::from_names(["fs"]));
        assert_eq!(report.status, CheckStatus::Passed, "{:?}", report.diagnostics);
    }

    #[test]
    fn cancellation_reports_canceled_and_exit_code_two() {
        let unit = unit_of(vec![(
            "main.na",
            "main",
            vec![build::top(build::let_(
                at(0, 1, 1),
                "x",
                build::int(at(0, 1, 9), 1),
            ))],
        )]);
        let token = CancelToken::new();
        token.cancel();
        let (checked, report) = analyze(
            &unit,
            &CapabilityAllowlist::default(),
            &CheckOptions::default(),
            &token,
        );
        assert!(checked.is_none());
        assert_eq!(report.status, CheckStatus::Canceled);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn rendered_diagnostics_carry_file_line_and_kind() {
        let unit = unit_of(vec![(
            "shapes.na",
            "shapes",
            vec![build::top(build::expr_stmt(build::name(
                at(0, 3, 7),
                "ghost",
            )))],
        )]);
        let report = run(&unit, CapabilityAllowlist::default());
        let rendered = report.render();
        assert_eq!(
            rendered,
            "shapes.na:3:7: unresolved name: `ghost` is not defined"
        );
    }

    #[test]
    fn diagnostics_arrive_sorted_by_file_then_position() {
        let unit = unit_of(vec![
            (
                "b.na",
                "b",
                vec![build::top(build::expr_stmt(build::name(
                    at(0, 2, 1),
                    "ghost_b",
                )))],
            ),
            (
                "a.na",
                "a",
                vec![build::top(build::expr_stmt(build::name(
                    at(1, 5, 1),
                    "ghost_a",
                )))],
            ),
        ]);
        let report = run(&unit, CapabilityAllowlist::default());
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.diagnostics[0].message.contains("ghost_a"));
        assert!(report.diagnostics[1].message.contains("ghost_b"));
    }

    #[test]
    fn the_diagnostic_bound_drops_the_overflow() {
        let items = (1..=5)
            .map(|line| {
                build::top(build::expr_stmt(build::name(
                    at(0, line, 1),
                    &format!("ghost{line}"),
                )))
            })
            .collect();
        let unit = unit_of(vec![("main.na", "main", items)]);
        let report = check(
            &unit,
            &CapabilityAllowlist::default(),
            &CheckOptions { max_diagnostics: 3 },
            &CancelToken::new(),
        );
        assert_eq!(report.status, CheckStatus::Failed);
        assert_eq!(report.diagnostics.len(), 3);
    }

    #[test]
    fn repeated_runs_produce_identical_reports() {
        let unit = unit_of(vec![
            (
                "geometry.na",
                "geometry",
                vec![build::struct_def(
                    at(0, 1, 1),
                    "Point",
                    vec![
                        build::field_def(at(0, 1, 14), "x", build::ann_name(at(0, 1, 17), "Int")),
                        build::field_def(at(0, 1, 22), "y", build::ann_name(at(0, 1, 25), "Int")),
                    ],
                )],
            ),
            (
                "main.na",
                "main",
                vec![
                    build::import(at(1, 1, 1), "geometry", &["Point"]),
                    build::top(build::let_(
                        at(1, 2, 1),
                        "p",
                        build::struct_lit(
                            at(1, 2, 9),
                            "Point",
                            vec![
                                ("x", build::int(at(1, 2, 20), 1)),
                                ("y", build::str_(at(1, 2, 28), "oops")),
                            ],
                        ),
                    )),
                    build::top(build::expr_stmt(build::name(at(1, 3, 1), "ghost"))),
                ],
            ),
        ]);
        let allow = CapabilityAllowlist::default();
        let options = CheckOptions::default();
        let first = check(&unit, &allow, &options, &CancelToken::new());
        let second = check(&unit, &allow, &options, &CancelToken::new());
        assert_eq!(first.status, second.status);
        assert_eq!(first.diagnostics, second.diagnostics);
    }
}
