#![forbid(unsafe_code)]

//! Structural width subtyping. A struct with more fields is usable where
//! one with fewer is expected; the relation is reflexive and transitive
//! by construction. Directed checks also give function types their
//! variance: parameters contravariant, the return covariant.

use naia_ast::Loc;

use crate::diag::Diagnostic;
use crate::infer::Unifier;
use crate::types::{StructShape, Type};

/// Can `found` be used where `expected` is required? Everything except
/// struct and function pairs degenerates to unification.
pub fn check_assignable(
    unifier: &mut Unifier,
    found: &Type,
    expected: &Type,
    loc: Loc,
    diags: &mut Vec<Diagnostic>,
) {
    let found = unifier.resolve(found);
    let expected = unifier.resolve(expected);
    match (&found, &expected) {
        (Type::Struct(sub), Type::Struct(sup)) => match width_subtype(unifier, sub, sup) {
            WidthCheck::Ok => {}
            WidthCheck::Missing(missing) => diags.push(Diagnostic::subtype_violation(
                loc,
                &expected.display(),
                &found.display(),
                &missing,
            )),
            WidthCheck::FieldConflict => diags.push(Diagnostic::subtype_violation(
                loc,
                &expected.display(),
                &found.display(),
                &[],
            )),
        },
        (
            Type::Function {
                params: fparams,
                ret: fret,
            },
            Type::Function {
                params: eparams,
                ret: eret,
            },
        ) => {
            if fparams.len() != eparams.len() {
                diags.push(Diagnostic::type_mismatch(
                    loc,
                    &expected.display(),
                    &found.display(),
                ));
                return;
            }
            for (fp, ep) in fparams.iter().zip(eparams.iter()) {
                check_assignable(unifier, ep, fp, loc, diags);
            }
            check_assignable(unifier, fret, eret, loc, diags);
        }
        _ => {
            if let Err(err) = unifier.unify(&expected, &found) {
                diags.push(err.into_diagnostic(loc));
            }
        }
    }
}

/// Joins the types two branches yield. Width-related shapes meet at
/// their common supertype, the shape either branch can stand in for;
/// everything else must unify. The join collapses to `Unknown` after a
/// diagnostic so one bad branch does not cascade.
pub fn merge_branches(
    unifier: &mut Unifier,
    a: &Type,
    b: &Type,
    loc: Loc,
    diags: &mut Vec<Diagnostic>,
) -> Type {
    let a = unifier.resolve(a);
    let b = unifier.resolve(b);
    match (&a, &b) {
        (Type::Struct(sa), Type::Struct(sb)) => {
            if width_subtype(unifier, sa, sb) == WidthCheck::Ok {
                b
            } else if width_subtype(unifier, sb, sa) == WidthCheck::Ok {
                a
            } else {
                diags.push(Diagnostic::type_mismatch(loc, &a.display(), &b.display()));
                Type::Unknown
            }
        }
        _ => match unifier.unify(&a, &b) {
            Ok(ty) => ty,
            Err(err) => {
                diags.push(err.into_diagnostic(loc));
                Type::Unknown
            }
        },
    }
}

#[derive(Debug, PartialEq)]
pub enum WidthCheck {
    Ok,
    /// Fields of the supertype the subtype candidate lacks.
    Missing(Vec<String>),
    /// Every field is present but at least one has an incompatible type.
    FieldConflict,
}

/// `sub` must carry every field of `sup` with a compatible type.
pub fn width_subtype(unifier: &mut Unifier, sub: &StructShape, sup: &StructShape) -> WidthCheck {
    let missing: Vec<String> = sup
        .fields
        .iter()
        .filter(|(name, _)| !sub.has_field(name))
        .map(|(name, _)| name.clone())
        .collect();
    if !missing.is_empty() {
        return WidthCheck::Missing(missing);
    }
    for (name, want) in &sup.fields {
        let Some(have) = sub.field(name) else {
            continue;
        };
        let have = have.clone();
        if unifier.unify(want, &have).is_err() {
            return WidthCheck::FieldConflict;
        }
    }
    WidthCheck::Ok
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeResolution {
    Bound(String, StructShape),
    /// Unrelated candidates; their names, in declaration order.
    Ambiguous(Vec<String>),
    NoMatch,
}

/// Resolves a receiver known only through its field accesses against the
/// declared shapes. A single candidate wins; width-ordered candidates
/// resolve to the widest supertype among them; unrelated candidates are
/// ambiguous and the caller reports them.
pub fn resolve_open_shape(
    fields: &[String],
    shapes: &[(String, StructShape)],
) -> ShapeResolution {
    let candidates: Vec<&(String, StructShape)> = shapes
        .iter()
        .filter(|(_, shape)| fields.iter().all(|f| shape.has_field(f)))
        .collect();
    match candidates.len() {
        0 => ShapeResolution::NoMatch,
        1 => ShapeResolution::Bound(candidates[0].0.clone(), candidates[0].1.clone()),
        _ => {
            'outer: for (name, shape) in &candidates {
                for (other_name, other) in &candidates {
                    if other_name == name {
                        continue;
                    }
                    if !shape.fields.iter().all(|(f, _)| other.has_field(f)) {
                        continue 'outer;
                    }
                }
                return ShapeResolution::Bound(name.clone(), shape.clone());
            }
            ShapeResolution::Ambiguous(candidates.iter().map(|(n, _)| n.clone()).collect())
        }
    }
}
