#![forbid(unsafe_code)]

//! Whole-unit linking. File-local inference leaves four kinds of loose
//! ends: cross-module imports, struct literals naming imported structs,
//! field obligations on still-open receivers, and foreign arguments whose
//! types carried variables. This pass absorbs every file's substitution
//! into one unifier, settles the loose ends in a fixed order, and closes
//! the trees: leftover variables become `Unknown`, with a diagnostic for
//! every named binding whose type never settled.

use naia_ast::Loc;

use crate::bridge;
use crate::checked::{CheckedBlock, CheckedItem, CheckedModule, CheckedStmt};
use crate::diag::Diagnostic;
use crate::infer::{
    self, FieldObligation, LocalOutcome, ModuleExports, PendingImport, PendingMerge,
    PendingStructLit, Unifier,
};
use crate::subtype::{self, ShapeResolution};
use crate::types::{StructShape, Type, TypeVarId};

pub struct LinkedUnit {
    pub modules: Vec<CheckedModule>,
    pub diags: Vec<Diagnostic>,
}

/// Merges the per-file outcomes into one linked unit. Outcomes must arrive
/// in file order; every diagnostic and resolution step below follows that
/// order, so linking is deterministic regardless of how the files were
/// checked.
pub fn link_unit(outcomes: Vec<LocalOutcome>) -> LinkedUnit {
    let mut unifier = Unifier::new();
    let mut diags = Vec::new();
    let mut obligations = Vec::new();
    let mut pending_imports = Vec::new();
    let mut pending_lits = Vec::new();
    let mut pending_merges = Vec::new();
    let mut foreign_args = Vec::new();
    let mut exports: Vec<ModuleExports> = Vec::new();
    let mut modules = Vec::new();

    // the per-file id spaces are disjoint, so the substitutions merge
    // without collision
    for outcome in outcomes {
        unifier.subst.absorb(outcome.unifier.subst);
        diags.extend(outcome.diags);
        obligations.extend(outcome.obligations);
        pending_imports.extend(outcome.pending_imports);
        pending_lits.extend(outcome.pending_lits);
        pending_merges.extend(outcome.pending_merges);
        foreign_args.extend(outcome.foreign_args);
        exports.push(outcome.exports);
        modules.push(outcome.checked);
    }

    resolve_imports(&pending_imports, &exports, &mut unifier, &mut diags);
    resolve_struct_lits(pending_lits, &mut unifier, &mut diags);
    resolve_merges(pending_merges, &mut unifier, &mut diags);

    let open = infer::resolve_obligations(obligations, &mut unifier, &mut diags);
    let open = bind_open_receivers(open, &exports, &mut unifier, &mut diags);
    // receivers bound by shape resolution can settle their members now
    let _ = infer::resolve_obligations(open, &mut unifier, &mut diags);

    for check in foreign_args {
        let ty = unifier.resolve(&check.ty);
        if let Some(diag) = bridge::conversion_diag(&ty, check.loc) {
            diags.push(diag);
        }
    }

    for module in &modules {
        report_open_bindings(module, &unifier, &mut diags);
    }
    for module in &mut modules {
        module.for_each_type_mut(&mut |ty| {
            let resolved = unifier.resolve(ty);
            *ty = close_type(resolved);
        });
    }

    LinkedUnit { modules, diags }
}

fn resolve_imports(
    imports: &[PendingImport],
    exports: &[ModuleExports],
    unifier: &mut Unifier,
    diags: &mut Vec<Diagnostic>,
) {
    for import in imports {
        let Some(exporter) = exports.iter().find(|e| e.name == import.module) else {
            diags.push(Diagnostic::unresolved_module(import.loc, &import.module));
            continue;
        };
        let found = exporter
            .structs
            .iter()
            .find(|(name, _)| *name == import.name)
            .map(|(_, shape)| Type::Struct(shape.clone()))
            .or_else(|| {
                exporter
                    .fns
                    .iter()
                    .find(|(name, _)| *name == import.name)
                    .map(|(_, ty)| ty.clone())
            });
        match found {
            Some(ty) => {
                if let Err(err) = unifier.unify(&Type::Var(import.var), &ty) {
                    diags.push(err.into_diagnostic(import.loc));
                }
            }
            None => diags.push(Diagnostic::unresolved_export(
                import.loc,
                &import.module,
                &import.name,
            )),
        }
    }
}

/// Exactness check for literals whose struct came from another module,
/// mirroring the file-local rule: every declared field present, no extras,
/// field types unified.
fn resolve_struct_lits(
    lits: Vec<PendingStructLit>,
    unifier: &mut Unifier,
    diags: &mut Vec<Diagnostic>,
) {
    for lit in lits {
        let receiver = unifier.resolve(&Type::Var(lit.var));
        match receiver {
            Type::Struct(shape) => {
                for (field_name, _) in &shape.fields {
                    if !lit.fields.iter().any(|(name, _, _)| name == field_name) {
                        diags.push(Diagnostic::struct_lit_missing(lit.loc, &lit.name, field_name));
                    }
                }
                for (field_name, field_ty, field_loc) in &lit.fields {
                    match shape.field(field_name) {
                        Some(declared) => {
                            let declared = declared.clone();
                            if let Err(err) = unifier.unify(&declared, field_ty) {
                                diags.push(err.into_diagnostic(*field_loc));
                            }
                        }
                        None => diags.push(Diagnostic::struct_lit_unknown_field(
                            *field_loc, &lit.name, field_name,
                        )),
                    }
                }
            }
            // the import never resolved; that failure is already reported
            Type::Var(_) => {}
            Type::Unknown => {}
            other => diags.push(Diagnostic::type_mismatch(
                lit.loc,
                &lit.name,
                &other.display(),
            )),
        }
    }
}

/// Branch joins deferred from file-local solving, settled once imports
/// and literals have bound their shapes. Sides still open here join by
/// unification, which keeps gradual bodies quiet.
fn resolve_merges(merges: Vec<PendingMerge>, unifier: &mut Unifier, diags: &mut Vec<Diagnostic>) {
    for merge in merges {
        let joined = subtype::merge_branches(unifier, &merge.lhs, &merge.rhs, merge.loc, diags);
        if let Err(err) = unifier.unify(&Type::Var(merge.result), &joined) {
            diags.push(err.into_diagnostic(merge.loc));
        }
    }
}

/// Receivers still open after obligation resolution are matched against
/// every declared shape in the unit: the widest candidate carrying all the
/// accessed fields wins.
fn bind_open_receivers(
    open: Vec<FieldObligation>,
    exports: &[ModuleExports],
    unifier: &mut Unifier,
    diags: &mut Vec<Diagnostic>,
) -> Vec<FieldObligation> {
    let shapes: Vec<(String, StructShape)> = exports
        .iter()
        .flat_map(|e| e.structs.iter().cloned())
        .collect();

    let mut groups: Vec<(TypeVarId, Vec<&FieldObligation>)> = Vec::new();
    for ob in &open {
        let receiver = unifier.resolve(&Type::Var(ob.var));
        let Type::Var(root) = receiver else {
            continue;
        };
        match groups.iter_mut().find(|(var, _)| *var == root) {
            Some((_, members)) => members.push(ob),
            None => groups.push((root, vec![ob])),
        }
    }

    for (var, members) in &groups {
        let mut fields: Vec<String> = Vec::new();
        for ob in members {
            if !fields.iter().any(|f| *f == ob.field) {
                fields.push(ob.field.clone());
            }
        }
        match subtype::resolve_open_shape(&fields, &shapes) {
            ShapeResolution::Bound(_, shape) => {
                if let Err(err) = unifier.unify(&Type::Var(*var), &Type::Struct(shape)) {
                    diags.push(err.into_diagnostic(members[0].loc));
                }
            }
            ShapeResolution::Ambiguous(candidates) => {
                diags.push(Diagnostic::subtype_ambiguous(
                    members[0].loc,
                    &fields,
                    &candidates,
                ));
                // collapse to Unknown so one ambiguity does not multiply
                // into unresolved-binding reports
                let _ = unifier.unify(&Type::Var(*var), &Type::Unknown);
            }
            ShapeResolution::NoMatch => {}
        }
    }

    open
}

/// Turns every leftover variable into `Unknown`.
pub(crate) fn close_type(ty: Type) -> Type {
    match ty {
        Type::Var(_) => Type::Unknown,
        Type::ListOf(elem) => Type::list_of(close_type(*elem)),
        Type::DictOf(key, value) => Type::dict_of(close_type(*key), close_type(*value)),
        Type::Struct(shape) => Type::Struct(StructShape::new(
            shape
                .fields
                .into_iter()
                .map(|(name, field)| (name, close_type(field)))
                .collect(),
        )),
        Type::Function { params, ret } => Type::function(
            params.into_iter().map(close_type).collect(),
            close_type(*ret),
        ),
        Type::Primitive(_) | Type::Foreign(_) | Type::Unknown => ty,
    }
}

/// A `let`, parameter, or function return whose type still carries a
/// variable never settled; each one gets a diagnostic naming the binding
/// before the variable collapses to `Unknown`.
fn report_open_bindings(module: &CheckedModule, unifier: &Unifier, diags: &mut Vec<Diagnostic>) {
    for item in &module.items {
        match item {
            CheckedItem::Fn(func) => {
                for param in &func.params {
                    report_open(&param.ty, param.loc, &param.name, unifier, diags);
                }
                report_open(&func.ret, func.loc, &func.name, unifier, diags);
                open_in_block(&func.body, unifier, diags);
            }
            CheckedItem::Stmt(stmt) => open_in_stmt(stmt, unifier, diags),
            _ => {}
        }
    }
}

fn open_in_block(block: &CheckedBlock, unifier: &Unifier, diags: &mut Vec<Diagnostic>) {
    for stmt in &block.stmts {
        open_in_stmt(stmt, unifier, diags);
    }
}

fn open_in_stmt(stmt: &CheckedStmt, unifier: &Unifier, diags: &mut Vec<Diagnostic>) {
    match stmt {
        CheckedStmt::Let {
            loc, name, decl_ty, ..
        } => report_open(decl_ty, *loc, name, unifier, diags),
        CheckedStmt::If {
            then_block,
            else_block,
            ..
        } => {
            open_in_block(then_block, unifier, diags);
            if let Some(block) = else_block {
                open_in_block(block, unifier, diags);
            }
        }
        CheckedStmt::While { body, .. } => open_in_block(body, unifier, diags),
        CheckedStmt::Match { arms, .. } => {
            for arm in arms {
                open_in_block(&arm.body, unifier, diags);
            }
        }
        CheckedStmt::Assign { .. } | CheckedStmt::Expr { .. } => {}
    }
}

fn report_open(ty: &Type, loc: Loc, name: &str, unifier: &Unifier, diags: &mut Vec<Diagnostic>) {
    if unifier.resolve(ty).has_vars() {
        diags.push(Diagnostic::unresolved_type_variable(loc, name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CapabilityTable, HostRegistry};
    use crate::checked::CheckedExprKind;
    use crate::diag::DiagnosticKind;
    use crate::infer::{check_module, LEDGER_STRIDE, VAR_STRIDE};
    use naia_ast::{build, loc, FileId};

    fn linked(files: Vec<(&str, Vec<naia_ast::Item>)>) -> LinkedUnit {
        let caps = CapabilityTable::new();
        let outcomes = files
            .into_iter()
            .enumerate()
            .map(|(idx, (name, items))| {
                let module = build::module(FileId(idx as u32), name, items);
                check_module(
                    &module,
                    &caps,
                    &HostRegistry,
                    idx as u32 * VAR_STRIDE,
                    idx as u32 * LEDGER_STRIDE,
                )
            })
            .collect();
        link_unit(outcomes)
    }

    fn at(file: u32, line: u32, col: u32) -> Loc {
        loc(FileId(file), line, col)
    }

    #[test]
    fn imported_functions_flow_their_signatures_across_files() {
        let unit = linked(vec![
            (
                "lib",
                vec![build::fn_def(
                    at(0, 1, 1),
                    "double",
                    vec![build::param(
                        at(0, 1, 11),
                        "n",
                        Some(build::ann_name(at(0, 1, 14), "Int")),
                    )],
                    Some(build::ann_name(at(0, 1, 20), "Int")),
                    build::yielding(
                        at(0, 1, 25),
                        Vec::new(),
                        build::binary(
                            at(0, 2, 5),
                            build::name(at(0, 2, 5), "n"),
                            naia_ast::BinOp::Add,
                            build::name(at(0, 2, 9), "n"),
                        ),
                    ),
                )],
            ),
            (
                "main",
                vec![
                    build::import(at(1, 1, 1), "lib", &["double"]),
                    build::top(build::let_(
                        at(1, 2, 1),
                        "x",
                        build::call(
                            at(1, 2, 9),
                            build::name(at(1, 2, 9), "double"),
                            vec![build::int(at(1, 2, 16), 4)],
                        ),
                    )),
                ],
            ),
        ]);
        assert!(unit.diags.is_empty(), "{:?}", unit.diags);
        let CheckedItem::Stmt(CheckedStmt::Let { decl_ty, .. }) = &unit.modules[1].items[1] else {
            panic!("expected a let statement");
        };
        assert_eq!(*decl_ty, Type::INT);
    }

    #[test]
    fn importing_from_a_missing_module_is_reported() {
        let unit = linked(vec![(
            "main",
            vec![build::import(at(0, 1, 1), "nowhere", &["thing"])],
        )]);
        assert_eq!(unit.diags.len(), 1);
        assert_eq!(unit.diags[0].kind, DiagnosticKind::UnresolvedName);
        assert!(unit.diags[0].message.contains("nowhere"));
    }

    #[test]
    fn importing_a_name_the_module_does_not_export_is_reported() {
        let unit = linked(vec![
            ("lib", Vec::new()),
            (
                "main",
                vec![build::import(at(1, 1, 1), "lib", &["ghost"])],
            ),
        ]);
        assert_eq!(unit.diags.len(), 1);
        assert!(unit.diags[0].message.contains("ghost"));
    }

    #[test]
    fn literals_of_imported_structs_are_checked_against_the_shape() {
        let unit = linked(vec![
            (
                "shapes",
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
                "main",
                vec![
                    build::import(at(1, 1, 1), "shapes", &["Point"]),
                    build::top(build::let_(
                        at(1, 2, 1),
                        "p",
                        build::struct_lit(
                            at(1, 2, 9),
                            "Point",
                            vec![("x", build::int(at(1, 2, 20), 1))],
                        ),
                    )),
                ],
            ),
        ]);
        assert_eq!(unit.diags.len(), 1);
        assert_eq!(unit.diags[0].kind, DiagnosticKind::SubtypeViolation);
        assert!(unit.diags[0].message.contains('y'), "{}", unit.diags[0].message);
    }

    #[test]
    fn open_receivers_resolve_to_the_widest_declared_shape() {
        // `detailed` has every field of `brief`; a parameter read for
        // `title` alone must land on the wider shape
        let unit = linked(vec![(
            "main",
            vec![
                build::struct_def(
                    at(0, 1, 1),
                    "Brief",
                    vec![build::field_def(
                        at(0, 1, 14),
                        "title",
                        build::ann_name(at(0, 1, 21), "Str"),
                    )],
                ),
                build::struct_def(
                    at(0, 2, 1),
                    "Detailed",
                    vec![
                        build::field_def(at(0, 2, 17), "title", build::ann_name(at(0, 2, 24), "Str")),
                        build::field_def(at(0, 2, 29), "body", build::ann_name(at(0, 2, 35), "Str")),
                    ],
                ),
                build::fn_def(
                    at(0, 3, 1),
                    "headline",
                    vec![build::param(at(0, 3, 13), "doc", None)],
                    None,
                    build::yielding(
                        at(0, 3, 18),
                        Vec::new(),
                        build::member(at(0, 4, 5), build::name(at(0, 4, 5), "doc"), "title"),
                    ),
                ),
            ],
        )]);
        assert!(unit.diags.is_empty(), "{:?}", unit.diags);
        let CheckedItem::Fn(func) = &unit.modules[0].items[2] else {
            panic!("expected a function");
        };
        let Type::Struct(shape) = &func.params[0].ty else {
            panic!("expected a struct parameter, got {}", func.params[0].ty.display());
        };
        assert!(shape.has_field("title"));
        assert!(!shape.has_field("body"));
    }

    #[test]
    fn unrelated_open_receivers_are_ambiguous() {
        let unit = linked(vec![(
            "main",
            vec![
                build::struct_def(
                    at(0, 1, 1),
                    "Circle",
                    vec![
                        build::field_def(at(0, 1, 14), "size", build::ann_name(at(0, 1, 20), "Int")),
                        build::field_def(at(0, 1, 25), "radius", build::ann_name(at(0, 1, 33), "Int")),
                    ],
                ),
                build::struct_def(
                    at(0, 2, 1),
                    "Square",
                    vec![
                        build::field_def(at(0, 2, 14), "size", build::ann_name(at(0, 2, 20), "Int")),
                        build::field_def(at(0, 2, 25), "side", build::ann_name(at(0, 2, 31), "Int")),
                    ],
                ),
                build::fn_def(
                    at(0, 3, 1),
                    "measure",
                    vec![build::param(at(0, 3, 12), "shape", None)],
                    None,
                    build::yielding(
                        at(0, 3, 19),
                        Vec::new(),
                        build::member(at(0, 4, 5), build::name(at(0, 4, 5), "shape"), "size"),
                    ),
                ),
            ],
        )]);
        assert_eq!(unit.diags.len(), 1);
        assert_eq!(unit.diags[0].kind, DiagnosticKind::SubtypeAmbiguous);
        assert!(unit.diags[0].message.contains("Circle"));
        assert!(unit.diags[0].message.contains("Square"));
    }

    #[test]
    fn bindings_that_never_settle_are_named_and_closed() {
        let unit = linked(vec![(
            "main",
            vec![build::fn_def(
                at(0, 1, 1),
                "pass_through",
                vec![build::param(at(0, 1, 14), "value", None)],
                None,
                build::yielding(
                    at(0, 1, 21),
                    Vec::new(),
                    build::name(at(0, 2, 5), "value"),
                ),
            )],
        )]);
        // the parameter and the return type never pick up a constraint
        assert_eq!(unit.diags.len(), 2);
        assert!(unit
            .diags
            .iter()
            .all(|d| d.kind == DiagnosticKind::UnresolvedTypeVariable));
        assert!(unit.diags[0].message.contains("value"));
        let CheckedItem::Fn(func) = &unit.modules[0].items[0] else {
            panic!("expected a function");
        };
        assert_eq!(func.params[0].ty, Type::Unknown);
        assert_eq!(func.ret, Type::Unknown);
    }

    #[test]
    fn deferred_foreign_arguments_are_revalidated_after_linking() {
        let mut caps = CapabilityTable::new();
        caps.intern("gpu");
        let lib = build::module(
            FileId(0),
            "lib",
            vec![build::struct_def(
                at(0, 1, 1),
                "Blob",
                vec![build::field_def(
                    at(0, 1, 12),
                    "bytes",
                    build::ann_name(at(0, 1, 19), "Str"),
                )],
            )],
        );
        let main = build::module(
            FileId(1),
            "main",
            vec![
                build::import(at(1, 1, 1), "lib", &["Blob"]),
                build::foreign_import(at(1, 2, 1), "gpu", &["upload"]),
                build::top(build::let_(
                    at(1, 3, 1),
                    "payload",
                    build::struct_lit(
                        at(1, 3, 15),
                        "Blob",
                        vec![("bytes", build::str_(at(1, 3, 28), "abc"))],
                    ),
                )),
                build::top(build::expr_stmt(build::call(
                    at(1, 4, 1),
                    build::name(at(1, 4, 1), "upload"),
                    vec![build::name(at(1, 4, 8), "payload")],
                ))),
            ],
        );
        let outcomes = vec![
            check_module(&lib, &caps, &HostRegistry, 0, 0),
            check_module(&main, &caps, &HostRegistry, VAR_STRIDE, LEDGER_STRIDE),
        ];
        let unit = link_unit(outcomes);
        assert_eq!(unit.diags.len(), 1);
        assert_eq!(
            unit.diags[0].kind,
            DiagnosticKind::ForeignConversionUnsupported
        );
        assert_eq!(unit.diags[0].loc, at(1, 4, 8));
    }
}
