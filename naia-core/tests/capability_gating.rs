use naia_ast::{self as ast, FileId, Loc, build, loc};
use naia_core::bridge;
use naia_core::checked::{CheckedItem, CheckedStmt, RcKind};
use naia_core::{
    CancelToken, CapabilityAllowlist, CheckOptions, CheckReport, CheckStatus, CheckedUnit,
    DiagnosticKind, analyze,
};

fn at(file: u32, line: u32, col: u32) -> Loc {
    loc(FileId(file), line, col)
}

fn unit_of(files: Vec<(&str, &str, Vec<ast::Item>)>) -> ast::SourceUnit {
    let mut unit = ast::SourceUnit::new();
    for (file_name, module_name, items) in files {
        let file = unit.map.intern(file_name);
        unit.add_module(build::module(file, module_name, items));
    }
    unit
}

fn run(unit: &ast::SourceUnit, allow: &CapabilityAllowlist) -> (Option<CheckedUnit>, CheckReport) {
    analyze(unit, allow, &CheckOptions::default(), &CancelToken::new())
}

#[test]
fn an_unlisted_host_module_stops_analysis_at_the_gate() {
    let unit = unit_of(vec![
        (
            "db.na",
            "db",
            vec![build::foreign_import(at(0, 1, 1), "sqlite", &["open"])],
        ),
        (
            "main.na",
            "main",
            vec![
                build::top(build::let_(at(1, 1, 1), "x", build::int(at(1, 1, 9), 10))),
                build::top(build::assign(
                    at(1, 2, 1),
                    "x",
                    build::str_(at(1, 2, 5), "oops"),
                )),
            ],
        ),
    ]);
    let (checked, report) = run(&unit, &CapabilityAllowlist::from_names(["fs"]));
    assert!(checked.is_none(), "a denied unit must not be produced");
    assert_eq!(report.status, CheckStatus::Failed);
    assert_eq!(report.exit_code(), 1);
    // the type error in main.na is never reached
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    let diag = &report.diagnostics[0];
    assert_eq!(diag.kind, DiagnosticKind::ForeignCapabilityDenied);
    assert_eq!(diag.loc, at(0, 1, 1));
    assert_eq!(
        diag.message,
        "host module `sqlite` is not in the project capability allowlist"
    );
    assert!(
        report
            .render()
            .contains("hint: add \"sqlite\" to `capabilities` in Naia.toml"),
        "unexpected render: {}",
        report.render()
    );
}

#[test]
fn registry_symbols_bind_with_typed_signatures() {
    let unit = unit_of(vec![(
        "main.na",
        "main",
        vec![
            build::foreign_import(at(0, 1, 1), "json", &["parse"]),
            build::top(build::let_(
                at(0, 2, 1),
                "v",
                build::call(
                    at(0, 2, 9),
                    build::name(at(0, 2, 9), "parse"),
                    vec![build::int(at(0, 2, 15), 7)],
                ),
            )),
        ],
    )]);
    let (_, report) = run(&unit, &CapabilityAllowlist::from_names(["json"]));
    assert_eq!(report.status, CheckStatus::Failed);
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    let diag = &report.diagnostics[0];
    assert_eq!(diag.kind, DiagnosticKind::TypeMismatch);
    assert_eq!(diag.loc, at(0, 2, 15));
    assert_eq!(diag.message, "expected `Str`, found `Int`");
}

#[test]
fn opaque_handles_share_one_ledger_across_aliases() {
    let unit = unit_of(vec![(
        "main.na",
        "main",
        vec![
            build::foreign_import(at(0, 1, 1), "gpu", &["device"]),
            build::top(build::let_(at(0, 2, 1), "first", build::name(at(0, 2, 13), "device"))),
            build::top(build::let_(at(0, 3, 1), "second", build::name(at(0, 3, 14), "first"))),
        ],
    )]);
    let (checked, report) = run(&unit, &CapabilityAllowlist::from_names(["gpu"]));
    assert_eq!(report.status, CheckStatus::Passed, "{:?}", report.diagnostics);
    let checked = checked.expect("analysis should produce a unit");
    let module = &checked.modules[0];

    let CheckedItem::ForeignImport(imp) = &module.items[0] else {
        panic!("expected a foreign import");
    };
    let ledger = imp.symbols[0].ledger.expect("opaque handles are refcounted");
    assert_eq!(imp.symbols[0].rc_ops.len(), 1);
    assert_eq!(imp.symbols[0].rc_ops[0].kind, RcKind::Retain);

    let CheckedItem::Stmt(CheckedStmt::Let { rc_ops: first_ops, .. }) = &module.items[1] else {
        panic!("expected a let");
    };
    let CheckedItem::Stmt(CheckedStmt::Let { rc_ops: second_ops, .. }) = &module.items[2] else {
        panic!("expected a let");
    };
    assert_eq!(first_ops.len(), 1);
    assert_eq!(first_ops[0].kind, RcKind::Retain);
    assert_eq!(first_ops[0].ledger, ledger);
    assert_eq!(second_ops.len(), 1);
    assert_eq!(second_ops[0].ledger, ledger);

    // two alias releases plus the import's own
    assert_eq!(module.exit_ops.len(), 3);
    assert!(
        module
            .exit_ops
            .iter()
            .all(|op| op.kind == RcKind::Release && op.ledger == ledger),
        "{:?}",
        module.exit_ops
    );
    let counts = bridge::replay_ledgers(module).expect("retains and releases must balance");
    assert_eq!(counts.get(&ledger), Some(&0));
}

#[test]
fn local_structs_do_not_cross_the_host_boundary() {
    let unit = unit_of(vec![(
        "main.na",
        "main",
        vec![
            build::struct_def(
                at(0, 1, 1),
                "Payload",
                vec![build::field_def(at(0, 1, 16), "x", build::ann_name(at(0, 1, 19), "Int"))],
            ),
            build::foreign_import(at(0, 2, 1), "gpu", &["upload"]),
            build::top(build::let_(
                at(0, 3, 1),
                "p",
                build::struct_lit(at(0, 3, 9), "Payload", vec![("x", build::int(at(0, 3, 22), 1))]),
            )),
            build::top(build::expr_stmt(build::call(
                at(0, 4, 1),
                build::name(at(0, 4, 1), "upload"),
                vec![build::name(at(0, 4, 8), "p")],
            ))),
        ],
    )]);
    let (checked, report) = run(&unit, &CapabilityAllowlist::from_names(["gpu"]));
    assert!(checked.is_some(), "conversion errors do not drop the unit");
    assert_eq!(report.status, CheckStatus::Failed);
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    let diag = &report.diagnostics[0];
    assert_eq!(diag.kind, DiagnosticKind::ForeignConversionUnsupported);
    assert_eq!(diag.loc, at(0, 4, 8));
    assert_eq!(
        diag.message,
        "a value of type `{x: Int}` cannot cross the host boundary"
    );
    assert!(
        report
            .render()
            .contains("only Int, Float, Str, Bool, List, and Dict values convert to host values"),
        "unexpected render: {}",
        report.render()
    );
}

#[test]
fn container_payloads_cross_and_discarded_results_settle() {
    let unit = unit_of(vec![(
        "main.na",
        "main",
        vec![
            build::foreign_import(at(0, 1, 1), "net.http", &["fetch_stream"]),
            build::top(build::let_(
                at(0, 2, 1),
                "payload",
                build::list(
                    at(0, 2, 15),
                    vec![build::str_(at(0, 2, 16), "a"), build::str_(at(0, 2, 21), "b")],
                ),
            )),
            build::top(build::expr_stmt(build::call(
                at(0, 3, 1),
                build::name(at(0, 3, 1), "fetch_stream"),
                vec![build::name(at(0, 3, 14), "payload")],
            ))),
        ],
    )]);
    let (checked, report) = run(&unit, &CapabilityAllowlist::from_names(["net.http"]));
    assert_eq!(report.status, CheckStatus::Passed, "{:?}", report.diagnostics);
    let checked = checked.expect("analysis should produce a unit");
    let module = &checked.modules[0];

    // the discarded handle retains and releases within the statement
    let CheckedItem::Stmt(CheckedStmt::Expr { rc_ops, .. }) = &module.items[2] else {
        panic!("expected an expression statement");
    };
    assert_eq!(rc_ops.len(), 2, "{rc_ops:?}");
    assert_eq!(rc_ops[0].kind, RcKind::Retain);
    assert_eq!(rc_ops[1].kind, RcKind::Release);

    // only the import itself is released at module exit; the list is not
    assert_eq!(module.exit_ops.len(), 1);
    let counts = bridge::replay_ledgers(module).expect("retains and releases must balance");
    assert!(counts.values().all(|c| *c == 0), "{counts:?}");
}
