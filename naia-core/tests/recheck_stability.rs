use naia_ast::{self as ast, BinOp, FileId, Loc, build, loc};
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

/// A unit touching every statement and expression form: imports, an opaque
/// handle, struct literals for an imported shape, a lambda, branches, a
/// loop, and a discarded host call.
fn rich_unit() -> ast::SourceUnit {
    unit_of(vec![
        (
            "geometry.na",
            "geometry",
            vec![
                build::struct_def(
                    at(0, 1, 1),
                    "Point",
                    vec![
                        build::field_def(at(0, 1, 14), "x", build::ann_name(at(0, 1, 17), "Int")),
                        build::field_def(at(0, 1, 22), "y", build::ann_name(at(0, 1, 25), "Int")),
                    ],
                ),
                build::fn_def(
                    at(0, 2, 1),
                    "norm",
                    vec![build::param(
                        at(0, 2, 9),
                        "p",
                        Some(build::ann_name(at(0, 2, 12), "Point")),
                    )],
                    Some(build::ann_name(at(0, 2, 22), "Int")),
                    build::yielding(
                        at(0, 2, 27),
                        Vec::new(),
                        build::binary(
                            at(0, 3, 5),
                            build::member(at(0, 3, 5), build::name(at(0, 3, 5), "p"), "x"),
                            BinOp::Add,
                            build::member(at(0, 3, 11), build::name(at(0, 3, 11), "p"), "y"),
                        ),
                    ),
                ),
            ],
        ),
        (
            "app.na",
            "app",
            vec![
                build::import(at(1, 1, 1), "geometry", &["Point", "norm"]),
                build::foreign_import(at(1, 2, 1), "gpu", &["device"]),
                build::top(build::let_(
                    at(1, 3, 1),
                    "origin",
                    build::struct_lit(
                        at(1, 3, 14),
                        "Point",
                        vec![
                            ("x", build::int(at(1, 3, 25), 0)),
                            ("y", build::int(at(1, 3, 31), 0)),
                        ],
                    ),
                )),
                build::top(build::let_(
                    at(1, 4, 1),
                    "n",
                    build::call(
                        at(1, 4, 9),
                        build::name(at(1, 4, 9), "norm"),
                        vec![build::name(at(1, 4, 14), "origin")],
                    ),
                )),
                build::top(build::let_(
                    at(1, 5, 1),
                    "alias",
                    build::name(at(1, 5, 13), "device"),
                )),
                build::top(build::if_else(
                    at(1, 6, 1),
                    build::binary(
                        at(1, 6, 4),
                        build::name(at(1, 6, 4), "n"),
                        BinOp::Gt,
                        build::int(at(1, 6, 8), 0),
                    ),
                    build::block(
                        at(1, 6, 11),
                        vec![build::let_(
                            at(1, 7, 5),
                            "t",
                            build::binary(
                                at(1, 7, 13),
                                build::name(at(1, 7, 13), "n"),
                                BinOp::Add,
                                build::int(at(1, 7, 17), 1),
                            ),
                        )],
                    ),
                    build::block(
                        at(1, 8, 5),
                        vec![build::let_(at(1, 9, 5), "e", build::int(at(1, 9, 13), 0))],
                    ),
                )),
                build::top(build::match_(
                    at(1, 10, 1),
                    build::name(at(1, 10, 7), "n"),
                    vec![
                        build::arm(
                            at(1, 11, 5),
                            build::pat_int(at(1, 11, 5), 0),
                            build::block(at(1, 11, 10), Vec::new()),
                        ),
                        build::arm(
                            at(1, 12, 5),
                            build::pat_wild(at(1, 12, 5)),
                            build::block(at(1, 12, 10), Vec::new()),
                        ),
                    ],
                )),
                build::top(build::let_(
                    at(1, 13, 1),
                    "double_x",
                    build::lambda(
                        at(1, 13, 16),
                        vec![build::param(
                            at(1, 13, 17),
                            "q",
                            Some(build::ann_name(at(1, 13, 20), "Point")),
                        )],
                        build::yielding(
                            at(1, 13, 27),
                            Vec::new(),
                            build::member(at(1, 13, 28), build::name(at(1, 13, 28), "q"), "x"),
                        ),
                    ),
                )),
                build::top(build::let_(
                    at(1, 14, 1),
                    "v",
                    build::call(
                        at(1, 14, 9),
                        build::name(at(1, 14, 9), "double_x"),
                        vec![build::struct_lit(
                            at(1, 14, 18),
                            "Point",
                            vec![
                                ("x", build::int(at(1, 14, 29), 1)),
                                ("y", build::int(at(1, 14, 35), 2)),
                            ],
                        )],
                    ),
                )),
                build::top(build::let_(at(1, 15, 1), "count", build::int(at(1, 15, 13), 0))),
                build::top(build::while_(
                    at(1, 16, 1),
                    build::binary(
                        at(1, 16, 7),
                        build::name(at(1, 16, 7), "count"),
                        BinOp::Lt,
                        build::int(at(1, 16, 15), 3),
                    ),
                    build::block(
                        at(1, 16, 18),
                        vec![build::assign(
                            at(1, 17, 5),
                            "count",
                            build::binary(
                                at(1, 17, 13),
                                build::name(at(1, 17, 13), "count"),
                                BinOp::Add,
                                build::int(at(1, 17, 21), 1),
                            ),
                        )],
                    ),
                )),
                build::top(build::expr_stmt(build::call(
                    at(1, 18, 1),
                    build::name(at(1, 18, 1), "device"),
                    vec![build::int(at(1, 18, 8), 1)],
                ))),
            ],
        ),
    ])
}

fn failing_unit() -> ast::SourceUnit {
    unit_of(vec![
        (
            "b.na",
            "b",
            vec![build::top(build::expr_stmt(build::name(at(0, 2, 3), "ghost")))],
        ),
        (
            "a.na",
            "a",
            vec![build::top(build::let_ann(
                at(1, 5, 1),
                "w",
                build::ann_name(at(1, 5, 8), "Int"),
                build::str_(at(1, 5, 14), "w"),
            ))],
        ),
        (
            "c.na",
            "c",
            vec![
                build::top(build::let_(
                    at(2, 1, 1),
                    "xs",
                    build::list(at(2, 1, 10), vec![build::int(at(2, 1, 11), 1)]),
                )),
                build::top(build::let_(at(2, 2, 1), "ys", build::name(at(2, 2, 10), "xs"))),
                build::top(build::expr_stmt(build::name(at(2, 3, 1), "xs"))),
            ],
        ),
    ])
}

#[test]
fn erasure_reproduces_the_input_and_rechecks_identically() {
    let unit = rich_unit();
    let allow = CapabilityAllowlist::from_names(["gpu"]);
    let (first, report) = run(&unit, &allow);
    assert_eq!(report.status, CheckStatus::Passed, "{:?}", report.diagnostics);
    let first = first.expect("analysis should produce a unit");

    let erased = first.erase();
    assert_eq!(erased, unit, "erasure must reproduce the input tree");

    let (second, second_report) = run(&erased, &allow);
    assert_eq!(second_report.status, CheckStatus::Passed);
    assert!(
        second_report.diagnostics.is_empty(),
        "{:?}",
        second_report.diagnostics
    );
    assert_eq!(second.expect("reanalysis should produce a unit"), first);
}

#[test]
fn failing_reports_render_identically_across_runs() {
    let unit = failing_unit();
    let allow = CapabilityAllowlist::default();
    let (_, first) = run(&unit, &allow);
    let (_, second) = run(&unit, &allow);
    let (_, third) = run(&unit, &allow);
    assert_eq!(first.status, CheckStatus::Failed);
    assert_eq!(first.exit_code(), 1);
    let kinds: Vec<DiagnosticKind> = first.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::TypeMismatch,
            DiagnosticKind::UnresolvedName,
            DiagnosticKind::UseAfterMove,
        ]
    );
    // ordered by file name, not by the order modules were added
    assert_eq!(first.diagnostics[0].loc.file, FileId(1));
    assert_eq!(first.diagnostics[1].loc.file, FileId(0));
    assert_eq!(first.diagnostics[2].loc.file, FileId(2));
    let expected = "a.na:5:1: type mismatch: expected `Int`, found `Str`\n\
                    b.na:2:3: unresolved name: `ghost` is not defined\n\
                    c.na:3:1: use after move: `xs` was moved at 2:10 and cannot be used here\n\
                    hint: clone `xs` before this use";
    assert_eq!(first.render(), expected);
    assert_eq!(second.render(), expected);
    assert_eq!(third.render(), expected);
}

#[test]
fn reanalysis_of_a_failing_unit_is_deterministic() {
    let unit = failing_unit();
    let allow = CapabilityAllowlist::default();
    let (first, r1) = run(&unit, &allow);
    let (second, r2) = run(&unit, &allow);
    assert_eq!(r1.status, CheckStatus::Failed);
    assert_eq!(r2.status, CheckStatus::Failed);
    let first = first.expect("non-fatal failures still produce a unit");
    let second = second.expect("non-fatal failures still produce a unit");
    assert_eq!(first, second);
}
