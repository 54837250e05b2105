#![forbid(unsafe_code)]

//! Gradual type inference. Each module is walked twice: a registration
//! pass hoists struct shapes, function signatures, and imports, then a
//! checking pass types every body, queueing constraints for the solver.
//! The walk never stops at an error; unresolved positions recover as
//! `Unknown` so one mistake does not cascade.

use std::collections::{HashMap, VecDeque};

use naia_ast as ast;
use naia_ast::{Loc, Pattern};

use crate::bridge::{self, CapabilityTable, HostRegistry};
use crate::checked::{
    CheckedArm, CheckedBlock, CheckedExpr, CheckedExprKind, CheckedFn, CheckedForeignImport,
    CheckedForeignSymbol, CheckedImport, CheckedItem, CheckedModule, CheckedParam, CheckedStmt,
    CheckedStructDef,
};
use crate::diag::Diagnostic;
use crate::env::{Binding, OwnershipState, TypeEnv};
use crate::subtype;
use crate::types::{LedgerId, StructShape, Type, TypeVarId};

/// Id space reserved per file, so parallel per-file inference allocates
/// disjoint variables without coordination.
pub const VAR_STRIDE: u32 = 1 << 20;
pub const LEDGER_STRIDE: u32 = 1 << 20;

#[derive(Debug)]
pub struct VarSource {
    next: u32,
}

impl VarSource {
    pub fn with_base(base: u32) -> Self {
        Self { next: base }
    }

    pub fn fresh(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug)]
pub struct LedgerSource {
    next: u32,
}

impl LedgerSource {
    pub fn with_base(base: u32) -> Self {
        Self { next: base }
    }

    pub fn fresh(&mut self) -> LedgerId {
        let id = LedgerId(self.next);
        self.next += 1;
        id
    }
}

/// Variable bindings accumulated by unification. `apply` chases chains, so
/// a bound variable never leaks into a resolved type.
#[derive(Clone, Debug, Default)]
pub struct Substitution {
    map: HashMap<TypeVarId, Type>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, var: TypeVarId, ty: Type) {
        self.map.insert(var, ty);
    }

    pub fn lookup(&self, var: TypeVarId) -> Option<&Type> {
        self.map.get(&var)
    }

    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.map.get(v) {
                Some(bound) => self.apply(bound),
                None => ty.clone(),
            },
            Type::ListOf(elem) => Type::list_of(self.apply(elem)),
            Type::DictOf(key, value) => Type::dict_of(self.apply(key), self.apply(value)),
            Type::Struct(shape) => Type::Struct(StructShape::new(
                shape
                    .fields
                    .iter()
                    .map(|(name, field)| (name.clone(), self.apply(field)))
                    .collect(),
            )),
            Type::Function { params, ret } => Type::function(
                params.iter().map(|p| self.apply(p)).collect(),
                self.apply(ret),
            ),
            Type::Primitive(_) | Type::Foreign(_) | Type::Unknown => ty.clone(),
        }
    }

    /// Merges another file's bindings in. Per-file id bases keep the
    /// domains disjoint.
    pub fn absorb(&mut self, other: Substitution) {
        self.map.extend(other.map);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Both sides must resolve to the same type.
    Equal,
    /// The left (found) side must be usable where the right (expected)
    /// side is required; structs relax to width subtyping.
    Assignable,
    /// Both sides are branch yields; `result` binds to their join, the
    /// common supertype when the shapes are width-related.
    Merge { result: TypeVarId },
}

#[derive(Clone, Debug)]
pub struct Constraint {
    pub lhs: Type,
    pub rhs: Type,
    pub kind: ConstraintKind,
    pub loc: Loc,
}

/// FIFO worklist of pending constraints, drained in order once a whole
/// body has been checked. Merge results feed later constraints through
/// the substitution, so the queue order is the body order.
#[derive(Debug, Default)]
pub struct Constraints {
    queue: VecDeque<Constraint>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_equal(&mut self, lhs: Type, rhs: Type, loc: Loc) {
        self.queue.push_back(Constraint {
            lhs,
            rhs,
            kind: ConstraintKind::Equal,
            loc,
        });
    }

    pub fn push_assignable(&mut self, found: Type, expected: Type, loc: Loc) {
        self.queue.push_back(Constraint {
            lhs: found,
            rhs: expected,
            kind: ConstraintKind::Assignable,
            loc,
        });
    }

    pub fn push_merge(&mut self, lhs: Type, rhs: Type, result: TypeVarId, loc: Loc) {
        self.queue.push_back(Constraint {
            lhs,
            rhs,
            kind: ConstraintKind::Merge { result },
            loc,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains the queue. Merges still carrying variables come back as
    /// pending work for the link phase.
    pub fn solve(
        &mut self,
        unifier: &mut Unifier,
        diags: &mut Vec<Diagnostic>,
    ) -> Vec<PendingMerge> {
        let mut deferred = Vec::new();
        while let Some(c) = self.queue.pop_front() {
            match c.kind {
                ConstraintKind::Equal => {
                    if let Err(err) = unifier.unify(&c.lhs, &c.rhs) {
                        diags.push(err.into_diagnostic(c.loc));
                    }
                }
                ConstraintKind::Assignable => {
                    subtype::check_assignable(unifier, &c.lhs, &c.rhs, c.loc, diags);
                }
                ConstraintKind::Merge { result } => {
                    let lhs = unifier.resolve(&c.lhs);
                    let rhs = unifier.resolve(&c.rhs);
                    if lhs.has_vars() || rhs.has_vars() {
                        deferred.push(PendingMerge {
                            lhs,
                            rhs,
                            result,
                            loc: c.loc,
                        });
                        continue;
                    }
                    let joined = subtype::merge_branches(unifier, &lhs, &rhs, c.loc, diags);
                    if let Err(err) = unifier.unify(&Type::Var(result), &joined) {
                        diags.push(err.into_diagnostic(c.loc));
                    }
                }
            }
        }
        deferred
    }
}

#[derive(Clone, Debug)]
pub enum UnifyError {
    Mismatch {
        expected: Type,
        found: Type,
    },
    /// Struct shapes with different field sets. `missing` lists the
    /// expected fields the found shape lacks.
    Shapes {
        expected: Type,
        found: Type,
        missing: Vec<String>,
    },
    Infinite {
        var: TypeVarId,
        ty: Type,
    },
}

impl UnifyError {
    pub fn into_diagnostic(self, loc: Loc) -> Diagnostic {
        match self {
            UnifyError::Mismatch { expected, found } => {
                Diagnostic::type_mismatch(loc, &expected.display(), &found.display())
            }
            UnifyError::Shapes {
                expected,
                found,
                missing,
            } => Diagnostic::subtype_violation(loc, &expected.display(), &found.display(), &missing),
            UnifyError::Infinite { var, ty } => {
                Diagnostic::infinite_type(loc, &Type::Var(var).display(), &ty.display())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Unifier {
    pub subst: Substitution,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, ty: &Type) -> Type {
        self.subst.apply(ty)
    }

    /// Makes both types the same, binding variables as needed. `Unknown`
    /// absorbs anything and the result stays `Unknown`; a variable binds
    /// before the gradual rule so partial information is kept.
    pub fn unify(&mut self, a: &Type, b: &Type) -> Result<Type, UnifyError> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) if x == y => Ok(a),
            (Type::Var(x), _) => self.bind_var(*x, b),
            (_, Type::Var(y)) => self.bind_var(*y, a),
            (Type::Unknown, _) | (_, Type::Unknown) => Ok(Type::Unknown),
            (Type::Primitive(p), Type::Primitive(q)) if p == q => Ok(a),
            (Type::Foreign(c), Type::Foreign(_)) => Ok(Type::Foreign(*c)),
            (Type::ListOf(x), Type::ListOf(y)) => {
                let elem = self.unify(x, y)?;
                Ok(Type::list_of(elem))
            }
            (Type::DictOf(k1, v1), Type::DictOf(k2, v2)) => {
                let key = self.unify(k1, k2)?;
                let value = self.unify(v1, v2)?;
                Ok(Type::dict_of(key, value))
            }
            (
                Type::Function {
                    params: p1,
                    ret: r1,
                },
                Type::Function {
                    params: p2,
                    ret: r2,
                },
            ) => {
                if p1.len() != p2.len() {
                    return Err(UnifyError::Mismatch {
                        expected: a.clone(),
                        found: b.clone(),
                    });
                }
                let mut params = Vec::with_capacity(p1.len());
                for (x, y) in p1.iter().zip(p2.iter()) {
                    params.push(self.unify(x, y)?);
                }
                let ret = self.unify(r1, r2)?;
                Ok(Type::function(params, ret))
            }
            (Type::Struct(s1), Type::Struct(s2)) => self.unify_shapes(s1, s2),
            _ => Err(UnifyError::Mismatch {
                expected: a,
                found: b,
            }),
        }
    }

    /// Shape equality: the same field names on both sides, fields unified
    /// pairwise. Width differences are only accepted at directed
    /// (assignment) positions, not here.
    fn unify_shapes(&mut self, s1: &StructShape, s2: &StructShape) -> Result<Type, UnifyError> {
        let missing: Vec<String> = s1
            .fields
            .iter()
            .filter(|(name, _)| !s2.has_field(name))
            .map(|(name, _)| name.clone())
            .collect();
        let extra = s2.fields.iter().any(|(name, _)| !s1.has_field(name));
        if !missing.is_empty() || extra {
            return Err(UnifyError::Shapes {
                expected: Type::Struct(s1.clone()),
                found: Type::Struct(s2.clone()),
                missing,
            });
        }
        let mut fields = Vec::with_capacity(s1.field_count());
        for (name, left) in &s1.fields {
            // field sets are equal, so the lookup always succeeds
            let right = s2.field(name).cloned().unwrap_or(Type::Unknown);
            fields.push((name.clone(), self.unify(left, &right)?));
        }
        Ok(Type::Struct(StructShape::new(fields)))
    }

    fn bind_var(&mut self, var: TypeVarId, ty: Type) -> Result<Type, UnifyError> {
        if ty.contains_var(var) {
            return Err(UnifyError::Infinite { var, ty });
        }
        self.subst.bind(var, ty.clone());
        Ok(ty)
    }
}

/// A deferred `receiver.field` access: `var` was still open when the
/// member expression was typed. Resolved once the receiver's shape is
/// known, or against the declared shapes at link time.
#[derive(Clone, Debug)]
pub struct FieldObligation {
    pub var: TypeVarId,
    pub field: String,
    pub result: TypeVarId,
    pub loc: Loc,
}

/// Resolves every obligation whose receiver is now concrete and returns
/// the rest. Obligations are created outside-in, so one ordered pass
/// settles chains like `a.b.c`.
pub fn resolve_obligations(
    obligations: Vec<FieldObligation>,
    unifier: &mut Unifier,
    diags: &mut Vec<Diagnostic>,
) -> Vec<FieldObligation> {
    let mut open = Vec::new();
    for ob in obligations {
        let receiver = unifier.resolve(&Type::Var(ob.var));
        match receiver {
            Type::Var(_) => open.push(ob),
            Type::Struct(shape) => match shape.field(&ob.field) {
                Some(field_ty) => {
                    let field_ty = field_ty.clone();
                    if let Err(err) = unifier.unify(&Type::Var(ob.result), &field_ty) {
                        diags.push(err.into_diagnostic(ob.loc));
                    }
                }
                None => diags.push(Diagnostic::no_field(ob.loc, &shape.display(), &ob.field)),
            },
            Type::Unknown => {
                let _ = unifier.unify(&Type::Var(ob.result), &Type::Unknown);
            }
            Type::Foreign(cap) => {
                let _ = unifier.unify(&Type::Var(ob.result), &Type::Foreign(cap));
            }
            other => diags.push(Diagnostic::no_field(ob.loc, &other.display(), &ob.field)),
        }
    }
    open
}

/// A name imported from a sibling module; `var` stands for the export's
/// type until the link pass sees every module.
#[derive(Clone, Debug)]
pub struct PendingImport {
    pub module: String,
    pub name: String,
    pub var: TypeVarId,
    pub loc: Loc,
}

/// A struct literal naming an imported struct. Field exactness is checked
/// at link time once the shape is known.
#[derive(Clone, Debug)]
pub struct PendingStructLit {
    pub var: TypeVarId,
    pub name: String,
    pub fields: Vec<(String, Type, Loc)>,
    pub loc: Loc,
}

/// An argument crossing the host boundary whose type still contained
/// variables when the call was checked.
#[derive(Clone, Debug)]
pub struct ForeignArgCheck {
    pub ty: Type,
    pub loc: Loc,
}

/// A branch join whose sides still carried variables when the body was
/// solved, e.g. literals of imported shapes. Joined at link time once
/// those shapes are bound.
#[derive(Clone, Debug)]
pub struct PendingMerge {
    pub lhs: Type,
    pub rhs: Type,
    pub result: TypeVarId,
    pub loc: Loc,
}

#[derive(Clone, Debug, Default)]
pub struct ModuleExports {
    pub name: String,
    pub structs: Vec<(String, StructShape)>,
    pub fns: Vec<(String, Type)>,
}

/// Everything file-local inference produces for one module. The link pass
/// merges these across the unit.
#[derive(Debug)]
pub struct LocalOutcome {
    pub checked: CheckedModule,
    pub unifier: Unifier,
    pub obligations: Vec<FieldObligation>,
    pub pending_imports: Vec<PendingImport>,
    pub pending_lits: Vec<PendingStructLit>,
    pub pending_merges: Vec<PendingMerge>,
    pub foreign_args: Vec<ForeignArgCheck>,
    pub exports: ModuleExports,
    pub diags: Vec<Diagnostic>,
}

pub fn check_module(
    module: &ast::Module,
    caps: &CapabilityTable,
    registry: &HostRegistry,
    var_base: u32,
    ledger_base: u32,
) -> LocalOutcome {
    let mut checker = ModuleChecker {
        caps,
        registry,
        vars: VarSource::with_base(var_base),
        ledgers: LedgerSource::with_base(ledger_base),
        unifier: Unifier::new(),
        constraints: Constraints::new(),
        obligations: Vec::new(),
        pending_imports: Vec::new(),
        pending_lits: Vec::new(),
        foreign_args: Vec::new(),
        diags: Vec::new(),
        env: TypeEnv::new(),
        structs: HashMap::new(),
        imported: HashMap::new(),
        exports: ModuleExports {
            name: module.name.clone(),
            structs: Vec::new(),
            fns: Vec::new(),
        },
        prepared_foreign: HashMap::new(),
        fn_sigs: HashMap::new(),
    };
    checker.register(module);
    let items = checker.check_items(module);

    let ModuleChecker {
        mut unifier,
        mut constraints,
        obligations,
        pending_imports,
        pending_lits,
        foreign_args,
        mut diags,
        exports,
        ..
    } = checker;

    let pending_merges = constraints.solve(&mut unifier, &mut diags);
    let obligations = resolve_obligations(obligations, &mut unifier, &mut diags);
    let mut deferred_args = Vec::new();
    for check in foreign_args {
        let ty = unifier.resolve(&check.ty);
        if ty.has_vars() {
            deferred_args.push(ForeignArgCheck { ty, loc: check.loc });
        } else if let Some(diag) = bridge::conversion_diag(&ty, check.loc) {
            diags.push(diag);
        }
    }

    LocalOutcome {
        checked: CheckedModule {
            file: module.file,
            name: module.name.clone(),
            items,
            exit_ops: Vec::new(),
        },
        unifier,
        obligations,
        pending_imports,
        pending_lits,
        pending_merges,
        foreign_args: deferred_args,
        exports,
        diags,
    }
}

struct ModuleChecker<'a> {
    caps: &'a CapabilityTable,
    registry: &'a HostRegistry,
    vars: VarSource,
    ledgers: LedgerSource,
    unifier: Unifier,
    constraints: Constraints,
    obligations: Vec<FieldObligation>,
    pending_imports: Vec<PendingImport>,
    pending_lits: Vec<PendingStructLit>,
    foreign_args: Vec<ForeignArgCheck>,
    diags: Vec<Diagnostic>,
    env: TypeEnv,
    structs: HashMap<String, StructShape>,
    imported: HashMap<String, TypeVarId>,
    exports: ModuleExports,
    prepared_foreign: HashMap<usize, CheckedForeignImport>,
    fn_sigs: HashMap<usize, (Vec<Type>, Type)>,
}

impl ModuleChecker<'_> {
    /// Registration pass: imports, foreign bindings, struct shapes, and
    /// function signatures, in that order. Structs and functions are
    /// hoisted; top-level `let` bindings are not.
    fn register(&mut self, module: &ast::Module) {
        for item in &module.items {
            if let ast::Item::Import(imp) = item {
                for n in &imp.names {
                    let var = self.vars.fresh();
                    self.imported.insert(n.node.clone(), var);
                    self.pending_imports.push(PendingImport {
                        module: imp.module.node.clone(),
                        name: n.node.clone(),
                        var,
                        loc: n.loc,
                    });
                    self.env
                        .declare(&n.node, Binding::new(Type::Var(var), false, n.loc));
                }
            }
        }

        for (idx, item) in module.items.iter().enumerate() {
            let ast::Item::ForeignImport(imp) = item else {
                continue;
            };
            // the capability gate interned every granted module before
            // this pass ran
            let Some(cap) = self.caps.id_of(&imp.module.node) else {
                continue;
            };
            let mut symbols = Vec::new();
            for sym in &imp.symbols {
                match self.registry.signature_of(&imp.module.node, &sym.node) {
                    Some(ty) => {
                        self.env
                            .declare(&sym.node, Binding::new(ty.clone(), false, sym.loc));
                        symbols.push(CheckedForeignSymbol {
                            loc: sym.loc,
                            name: sym.node.clone(),
                            ty,
                            ledger: None,
                            rc_ops: Vec::new(),
                        });
                    }
                    None => {
                        let ledger = self.ledgers.fresh();
                        let ty = Type::Foreign(cap);
                        let mut binding = Binding::new(ty.clone(), false, sym.loc);
                        binding.state = OwnershipState::Shared(ledger);
                        self.env.declare(&sym.node, binding);
                        symbols.push(CheckedForeignSymbol {
                            loc: sym.loc,
                            name: sym.node.clone(),
                            ty,
                            ledger: Some(ledger),
                            rc_ops: Vec::new(),
                        });
                    }
                }
            }
            self.prepared_foreign.insert(
                idx,
                CheckedForeignImport {
                    loc: imp.loc,
                    module: imp.module.node.clone(),
                    capability: cap,
                    symbols,
                },
            );
        }

        let mut def_map: HashMap<&str, &ast::StructDef> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for item in &module.items {
            if let ast::Item::StructDef(def) = item {
                if def_map.insert(def.name.node.as_str(), def).is_none() {
                    order.push(def.name.node.as_str());
                }
            }
        }
        let mut visiting = Vec::new();
        for name in &order {
            self.ensure_shape(name, &def_map, &mut visiting);
        }
        for name in &order {
            if let Some(shape) = self.structs.get(*name) {
                self.exports.structs.push((name.to_string(), shape.clone()));
            }
        }

        for (idx, item) in module.items.iter().enumerate() {
            if let ast::Item::FnDef(f) = item {
                let params: Vec<Type> = f
                    .params
                    .iter()
                    .map(|p| match &p.ann {
                        Some(ann) => self.resolve_ann(ann),
                        None => Type::Var(self.vars.fresh()),
                    })
                    .collect();
                let ret = match &f.ret {
                    Some(ann) => self.resolve_ann(ann),
                    None => Type::Var(self.vars.fresh()),
                };
                let ty = Type::function(params.clone(), ret.clone());
                self.env
                    .declare(&f.name.node, Binding::new(ty.clone(), false, f.loc));
                self.exports.fns.push((f.name.node.clone(), ty));
                self.fn_sigs.insert(idx, (params, ret));
            }
        }
    }

    fn ensure_shape(
        &mut self,
        name: &str,
        defs: &HashMap<&str, &ast::StructDef>,
        visiting: &mut Vec<String>,
    ) {
        if self.structs.contains_key(name) {
            return;
        }
        if visiting.iter().any(|n| n == name) {
            if let Some(def) = defs.get(name) {
                self.diags.push(Diagnostic::recursive_struct(def.loc, name));
            }
            return;
        }
        let Some(def) = defs.get(name).copied() else {
            return;
        };
        visiting.push(name.to_string());
        let mut fields = Vec::with_capacity(def.fields.len());
        for fd in &def.fields {
            let ty = self.field_ann_type(&fd.ann, defs, visiting);
            fields.push((fd.name.node.clone(), ty));
        }
        visiting.pop();
        self.structs.insert(name.to_string(), StructShape::new(fields));
    }

    fn field_ann_type(
        &mut self,
        ann: &ast::TypeAnn,
        defs: &HashMap<&str, &ast::StructDef>,
        visiting: &mut Vec<String>,
    ) -> Type {
        match &ann.kind {
            ast::TypeAnnKind::Name(n) => {
                if defs.contains_key(n.as_str()) {
                    self.ensure_shape(n, defs, visiting);
                    return match self.structs.get(n.as_str()) {
                        Some(shape) => Type::Struct(shape.clone()),
                        // cycle: the diagnostic is already recorded
                        None => Type::Unknown,
                    };
                }
                self.named_type(n, ann.loc)
            }
            ast::TypeAnnKind::List(elem) => {
                Type::list_of(self.field_ann_type(elem, defs, visiting))
            }
            ast::TypeAnnKind::Dict(key, value) => Type::dict_of(
                self.field_ann_type(key, defs, visiting),
                self.field_ann_type(value, defs, visiting),
            ),
            ast::TypeAnnKind::Func { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.field_ann_type(p, defs, visiting))
                    .collect();
                let ret = self.field_ann_type(ret, defs, visiting);
                Type::function(params, ret)
            }
        }
    }

    fn resolve_ann(&mut self, ann: &ast::TypeAnn) -> Type {
        match &ann.kind {
            ast::TypeAnnKind::Name(n) => self.named_type(n, ann.loc),
            ast::TypeAnnKind::List(elem) => Type::list_of(self.resolve_ann(elem)),
            ast::TypeAnnKind::Dict(key, value) => {
                Type::dict_of(self.resolve_ann(key), self.resolve_ann(value))
            }
            ast::TypeAnnKind::Func { params, ret } => {
                let params = params.iter().map(|p| self.resolve_ann(p)).collect();
                let ret = self.resolve_ann(ret);
                Type::function(params, ret)
            }
        }
    }

    fn named_type(&mut self, name: &str, loc: Loc) -> Type {
        match name {
            "Int" => Type::INT,
            "Float" => Type::FLOAT,
            "Str" => Type::STR,
            "Bool" => Type::BOOL,
            "Unit" => Type::UNIT,
            "any" => Type::Unknown,
            _ => {
                if let Some(shape) = self.structs.get(name) {
                    Type::Struct(shape.clone())
                } else if let Some(&var) = self.imported.get(name) {
                    Type::Var(var)
                } else {
                    self.diags.push(Diagnostic::unresolved_name(loc, name));
                    Type::Unknown
                }
            }
        }
    }

    fn check_items(&mut self, module: &ast::Module) -> Vec<CheckedItem> {
        let mut items = Vec::with_capacity(module.items.len());
        for (idx, item) in module.items.iter().enumerate() {
            match item {
                ast::Item::FnDef(f) => items.push(CheckedItem::Fn(self.check_fn(idx, f))),
                ast::Item::StructDef(s) => {
                    let shape = self
                        .structs
                        .get(&s.name.node)
                        .cloned()
                        .unwrap_or_else(|| StructShape::new(Vec::new()));
                    items.push(CheckedItem::Struct(CheckedStructDef {
                        loc: s.loc,
                        name: s.name.node.clone(),
                        fields: s.fields.clone(),
                        shape,
                    }));
                }
                ast::Item::Import(imp) => {
                    let names = imp
                        .names
                        .iter()
                        .map(|n| {
                            let ty = match self.imported.get(&n.node) {
                                Some(&var) => Type::Var(var),
                                None => Type::Unknown,
                            };
                            (n.node.clone(), ty)
                        })
                        .collect();
                    items.push(CheckedItem::Import(CheckedImport {
                        loc: imp.loc,
                        module: imp.module.node.clone(),
                        names,
                    }));
                }
                ast::Item::ForeignImport(_) => {
                    if let Some(prepared) = self.prepared_foreign.remove(&idx) {
                        items.push(CheckedItem::ForeignImport(prepared));
                    }
                }
                ast::Item::Stmt(stmt) => items.push(CheckedItem::Stmt(self.check_stmt(stmt))),
            }
        }
        items
    }

    fn check_fn(&mut self, idx: usize, f: &ast::FnDef) -> CheckedFn {
        let (param_tys, ret) = self
            .fn_sigs
            .remove(&idx)
            .unwrap_or_else(|| (vec![Type::Unknown; f.params.len()], Type::Unknown));
        self.env.push_scope();
        let mut params = Vec::with_capacity(f.params.len());
        for (p, ty) in f.params.iter().zip(&param_tys) {
            self.env
                .declare(&p.name.node, Binding::new(ty.clone(), false, p.loc));
            params.push(CheckedParam {
                loc: p.loc,
                name: p.name.node.clone(),
                ty: ty.clone(),
                ann: p.ann.clone(),
            });
        }
        let body = self.check_block(&f.body);
        self.env.pop_scope();
        match &body.yield_expr {
            Some(y) => self
                .constraints
                .push_assignable(body.ty.clone(), ret.clone(), y.loc),
            None => self
                .constraints
                .push_assignable(Type::UNIT, ret.clone(), f.loc),
        }
        CheckedFn {
            loc: f.loc,
            name: f.name.node.clone(),
            params,
            ret: ret.clone(),
            ret_ann: f.ret.clone(),
            body,
            ty: Type::function(param_tys, ret),
        }
    }

    fn check_block(&mut self, block: &ast::Block) -> CheckedBlock {
        self.env.push_scope();
        let stmts = block.stmts.iter().map(|s| self.check_stmt(s)).collect();
        let yield_expr = block.yield_expr.as_ref().map(|e| self.infer_expr(e));
        self.env.pop_scope();
        let ty = yield_expr
            .as_ref()
            .map(|e| e.ty.clone())
            .unwrap_or(Type::UNIT);
        CheckedBlock {
            loc: block.loc,
            stmts,
            yield_expr,
            ty,
            exit_ops: Vec::new(),
        }
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> CheckedStmt {
        match stmt {
            ast::Stmt::Let(s) => {
                let value = self.infer_expr(&s.value);
                let decl_ty = match &s.ann {
                    Some(ann) => {
                        let ty = self.resolve_ann(ann);
                        self.constraints
                            .push_assignable(value.ty.clone(), ty.clone(), s.loc);
                        ty
                    }
                    None => {
                        let var = Type::Var(self.vars.fresh());
                        self.constraints
                            .push_equal(var.clone(), value.ty.clone(), s.loc);
                        var
                    }
                };
                self.env.declare(
                    &s.name.node,
                    Binding::new(decl_ty.clone(), s.mutable, s.loc),
                );
                CheckedStmt::Let {
                    loc: s.loc,
                    name: s.name.node.clone(),
                    mutable: s.mutable,
                    ann: s.ann.clone(),
                    decl_ty,
                    value,
                    rc_ops: Vec::new(),
                }
            }
            ast::Stmt::Assign(s) => {
                let value = self.infer_expr(&s.value);
                match self.env.lookup(&s.target.node) {
                    Some(binding) => {
                        let target_ty = binding.ty.clone();
                        if !binding.mutable {
                            self.diags
                                .push(Diagnostic::assign_to_immutable(s.loc, &s.target.node));
                        }
                        self.constraints
                            .push_assignable(value.ty.clone(), target_ty, s.loc);
                    }
                    None => self
                        .diags
                        .push(Diagnostic::unresolved_name(s.loc, &s.target.node)),
                }
                CheckedStmt::Assign {
                    loc: s.loc,
                    target: s.target.node.clone(),
                    value,
                    rc_ops: Vec::new(),
                }
            }
            ast::Stmt::If(s) => {
                let cond = self.infer_expr(&s.cond);
                self.constraints
                    .push_equal(Type::BOOL, cond.ty.clone(), cond.loc);
                let then_block = self.check_block(&s.then_block);
                let else_block = s.else_block.as_ref().map(|b| self.check_block(b));
                if let (Some(_), Some(eb)) = (&then_block.yield_expr, &else_block) {
                    if eb.yield_expr.is_some() {
                        let joined = self.vars.fresh();
                        self.constraints.push_merge(
                            then_block.ty.clone(),
                            eb.ty.clone(),
                            joined,
                            s.loc,
                        );
                    }
                }
                CheckedStmt::If {
                    loc: s.loc,
                    cond,
                    then_block,
                    else_block,
                }
            }
            ast::Stmt::While(s) => {
                let cond = self.infer_expr(&s.cond);
                self.constraints
                    .push_equal(Type::BOOL, cond.ty.clone(), cond.loc);
                let body = self.check_block(&s.body);
                CheckedStmt::While {
                    loc: s.loc,
                    cond,
                    body,
                }
            }
            ast::Stmt::Match(s) => {
                let scrutinee = self.infer_expr(&s.scrutinee);
                let mut arms = Vec::with_capacity(s.arms.len());
                let mut anchor: Option<Type> = None;
                for arm in &s.arms {
                    match &arm.pat {
                        Pattern::IntLit { loc, .. } => self.constraints.push_equal(
                            Type::INT,
                            scrutinee.ty.clone(),
                            *loc,
                        ),
                        Pattern::StrLit { loc, .. } => self.constraints.push_equal(
                            Type::STR,
                            scrutinee.ty.clone(),
                            *loc,
                        ),
                        Pattern::Wildcard { .. } | Pattern::Binding { .. } => {}
                    }
                    self.env.push_scope();
                    if let Pattern::Binding { name, .. } = &arm.pat {
                        self.env.declare(
                            &name.node,
                            Binding::new(scrutinee.ty.clone(), false, name.loc),
                        );
                    }
                    let body = self.check_block(&arm.body);
                    self.env.pop_scope();
                    if body.yield_expr.is_some() {
                        match &anchor {
                            // fold the join through the arms in order
                            Some(ty) => {
                                let joined = self.vars.fresh();
                                self.constraints.push_merge(
                                    ty.clone(),
                                    body.ty.clone(),
                                    joined,
                                    arm.loc,
                                );
                                anchor = Some(Type::Var(joined));
                            }
                            None => anchor = Some(body.ty.clone()),
                        }
                    }
                    arms.push(CheckedArm {
                        loc: arm.loc,
                        pat: arm.pat.clone(),
                        body,
                        rc_ops: Vec::new(),
                    });
                }
                CheckedStmt::Match {
                    loc: s.loc,
                    scrutinee,
                    arms,
                }
            }
            ast::Stmt::ExprStmt(e) => CheckedStmt::Expr {
                value: self.infer_expr(e),
                rc_ops: Vec::new(),
            },
        }
    }

    fn infer_expr(&mut self, expr: &ast::Expr) -> CheckedExpr {
        let loc = expr.loc;
        let (ty, kind) = match &expr.kind {
            ast::ExprKind::Ident(name) => {
                let ty = match self.env.lookup(&name.node) {
                    Some(binding) => binding.ty.clone(),
                    None => {
                        self.diags
                            .push(Diagnostic::unresolved_name(loc, &name.node));
                        Type::Unknown
                    }
                };
                (
                    ty,
                    CheckedExprKind::Name {
                        name: name.node.clone(),
                        note: None,
                    },
                )
            }
            ast::ExprKind::IntLit(v) => (Type::INT, CheckedExprKind::Int(*v)),
            ast::ExprKind::FloatLit(v) => (Type::FLOAT, CheckedExprKind::Float(*v)),
            ast::ExprKind::StrLit(v) => (Type::STR, CheckedExprKind::Str(v.clone())),
            ast::ExprKind::BoolLit(v) => (Type::BOOL, CheckedExprKind::Bool(*v)),
            ast::ExprKind::UnitLit => (Type::UNIT, CheckedExprKind::Unit),
            ast::ExprKind::ListLit(items) => {
                let elem = Type::Var(self.vars.fresh());
                let mut checked = Vec::with_capacity(items.len());
                for item in items {
                    let c = self.infer_expr(item);
                    self.constraints
                        .push_equal(elem.clone(), c.ty.clone(), c.loc);
                    checked.push(c);
                }
                (Type::list_of(elem), CheckedExprKind::List(checked))
            }
            ast::ExprKind::DictLit(entries) => {
                let key = Type::Var(self.vars.fresh());
                let value = Type::Var(self.vars.fresh());
                let mut checked = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let ck = self.infer_expr(k);
                    let cv = self.infer_expr(v);
                    self.constraints
                        .push_equal(key.clone(), ck.ty.clone(), ck.loc);
                    self.constraints
                        .push_equal(value.clone(), cv.ty.clone(), cv.loc);
                    checked.push((ck, cv));
                }
                (
                    Type::dict_of(key, value),
                    CheckedExprKind::Dict(checked),
                )
            }
            ast::ExprKind::StructLit { name, fields } => {
                let mut checked = Vec::with_capacity(fields.len());
                for (fname, fvalue) in fields {
                    checked.push((fname.node.clone(), self.infer_expr(fvalue)));
                }
                let ty = self.struct_lit_type(&name.node, &checked, loc);
                (
                    ty,
                    CheckedExprKind::StructLit {
                        name: name.node.clone(),
                        fields: checked,
                    },
                )
            }
            ast::ExprKind::Unary { op, expr: inner } => {
                let operand = self.infer_expr(inner);
                let ty = match op {
                    ast::UnaryOp::Neg => {
                        let resolved = self.unifier.resolve(&operand.ty);
                        match resolved {
                            Type::Primitive(p)
                                if matches!(
                                    p,
                                    crate::types::Primitive::Int | crate::types::Primitive::Float
                                ) =>
                            {
                                resolved
                            }
                            Type::Unknown | Type::Var(_) => operand.ty.clone(),
                            other => {
                                self.diags.push(Diagnostic::bad_operand(
                                    loc,
                                    "-",
                                    &other.display(),
                                ));
                                Type::Unknown
                            }
                        }
                    }
                    ast::UnaryOp::Not => {
                        self.constraints
                            .push_equal(Type::BOOL, operand.ty.clone(), operand.loc);
                        Type::BOOL
                    }
                };
                (
                    ty,
                    CheckedExprKind::Unary {
                        op: *op,
                        expr: Box::new(operand),
                    },
                )
            }
            ast::ExprKind::Binary { left, op, right } => {
                let l = self.infer_expr(left);
                let r = self.infer_expr(right);
                let ty = self.binary_type(&l, *op, &r, loc);
                (
                    ty,
                    CheckedExprKind::Binary {
                        left: Box::new(l),
                        op: *op,
                        right: Box::new(r),
                    },
                )
            }
            ast::ExprKind::Member { base, member } => {
                let base_c = self.infer_expr(base);
                let ty = match self.unifier.resolve(&base_c.ty) {
                    Type::Struct(shape) => match shape.field(&member.node) {
                        Some(field_ty) => field_ty.clone(),
                        None => {
                            self.diags.push(Diagnostic::no_field(
                                loc,
                                &shape.display(),
                                &member.node,
                            ));
                            Type::Unknown
                        }
                    },
                    Type::Var(var) => {
                        let result = self.vars.fresh();
                        self.obligations.push(FieldObligation {
                            var,
                            field: member.node.clone(),
                            result,
                            loc,
                        });
                        Type::Var(result)
                    }
                    Type::Unknown => Type::Unknown,
                    Type::Foreign(cap) => Type::Foreign(cap),
                    other => {
                        self.diags
                            .push(Diagnostic::no_field(loc, &other.display(), &member.node));
                        Type::Unknown
                    }
                };
                (
                    ty,
                    CheckedExprKind::Member {
                        base: Box::new(base_c),
                        member: member.node.clone(),
                    },
                )
            }
            ast::ExprKind::Call { callee, args } => {
                let callee_c = self.infer_expr(callee);
                let args_c: Vec<CheckedExpr> =
                    args.iter().map(|a| self.infer_expr(a)).collect();
                let ty = match self.unifier.resolve(&callee_c.ty) {
                    Type::Function { params, ret } => {
                        if params.len() != args_c.len() {
                            self.diags.push(Diagnostic::arity_mismatch(
                                loc,
                                params.len(),
                                args_c.len(),
                            ));
                        }
                        for (arg, param) in args_c.iter().zip(params.iter()) {
                            self.constraints.push_assignable(
                                arg.ty.clone(),
                                param.clone(),
                                arg.loc,
                            );
                        }
                        *ret
                    }
                    Type::Foreign(cap) => {
                        for arg in &args_c {
                            self.foreign_args.push(ForeignArgCheck {
                                ty: arg.ty.clone(),
                                loc: arg.loc,
                            });
                        }
                        Type::Foreign(cap)
                    }
                    Type::Unknown => Type::Unknown,
                    Type::Var(_) => {
                        let ret = Type::Var(self.vars.fresh());
                        let fty = Type::function(
                            args_c.iter().map(|a| a.ty.clone()).collect(),
                            ret.clone(),
                        );
                        self.constraints.push_equal(callee_c.ty.clone(), fty, loc);
                        ret
                    }
                    other => {
                        self.diags
                            .push(Diagnostic::not_callable(loc, &other.display()));
                        Type::Unknown
                    }
                };
                (
                    ty,
                    CheckedExprKind::Call {
                        callee: Box::new(callee_c),
                        args: args_c,
                    },
                )
            }
            ast::ExprKind::Lambda { params, body } => {
                self.env.push_scope();
                let mut checked_params = Vec::with_capacity(params.len());
                let mut param_tys = Vec::with_capacity(params.len());
                for p in params {
                    let ty = match &p.ann {
                        Some(ann) => self.resolve_ann(ann),
                        None => Type::Var(self.vars.fresh()),
                    };
                    self.env
                        .declare(&p.name.node, Binding::new(ty.clone(), false, p.loc));
                    param_tys.push(ty.clone());
                    checked_params.push(CheckedParam {
                        loc: p.loc,
                        name: p.name.node.clone(),
                        ty,
                        ann: p.ann.clone(),
                    });
                }
                let body_c = self.check_block(body);
                self.env.pop_scope();
                let ty = Type::function(param_tys, body_c.ty.clone());
                (
                    ty,
                    CheckedExprKind::Lambda {
                        params: checked_params,
                        body: Box::new(body_c),
                    },
                )
            }
        };
        CheckedExpr { loc, ty, kind }
    }

    /// Literals must spell out exactly the declared fields. Literals for
    /// imported structs defer the check to link time.
    fn struct_lit_type(
        &mut self,
        name: &str,
        fields: &[(String, CheckedExpr)],
        loc: Loc,
    ) -> Type {
        if let Some(shape) = self.structs.get(name).cloned() {
            for (fname, fty) in &shape.fields {
                match fields.iter().find(|(n, _)| n == fname) {
                    Some((_, value)) => self.constraints.push_assignable(
                        value.ty.clone(),
                        fty.clone(),
                        value.loc,
                    ),
                    None => self
                        .diags
                        .push(Diagnostic::struct_lit_missing(loc, name, fname)),
                }
            }
            for (fname, value) in fields {
                if !shape.has_field(fname) {
                    self.diags
                        .push(Diagnostic::struct_lit_unknown_field(value.loc, name, fname));
                }
            }
            return Type::Struct(shape);
        }
        if let Some(&var) = self.imported.get(name) {
            self.pending_lits.push(PendingStructLit {
                var,
                name: name.to_string(),
                fields: fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.ty.clone(), v.loc))
                    .collect(),
                loc,
            });
            return Type::Var(var);
        }
        self.diags.push(Diagnostic::unresolved_name(loc, name));
        Type::Unknown
    }

    fn binary_type(
        &mut self,
        left: &CheckedExpr,
        op: ast::BinOp,
        right: &CheckedExpr,
        loc: Loc,
    ) -> Type {
        use ast::BinOp;
        if op.is_logical() {
            self.constraints
                .push_equal(Type::BOOL, left.ty.clone(), left.loc);
            self.constraints
                .push_equal(Type::BOOL, right.ty.clone(), right.loc);
            return Type::BOOL;
        }
        if op.is_comparison() {
            self.constraints
                .push_equal(left.ty.clone(), right.ty.clone(), loc);
            return Type::BOOL;
        }
        // arithmetic: both sides agree, and the operand type must be
        // numeric (or Str for `+`)
        self.constraints
            .push_equal(left.ty.clone(), right.ty.clone(), loc);
        let resolved = self.unifier.resolve(&left.ty);
        match &resolved {
            Type::Primitive(crate::types::Primitive::Int)
            | Type::Primitive(crate::types::Primitive::Float) => resolved,
            Type::Primitive(crate::types::Primitive::Str) if op == BinOp::Add => resolved,
            Type::Unknown => Type::Unknown,
            Type::Var(_) => left.ty.clone(),
            other => {
                self.diags
                    .push(Diagnostic::bad_operand(loc, op_symbol(op), &other.display()));
                Type::Unknown
            }
        }
    }
}

fn op_symbol(op: ast::BinOp) -> &'static str {
    use ast::BinOp::*;
    match op {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Eq => "==",
        Ne => "!=",
        Lt => "<",
        Gt => ">",
        Le => "<=",
        Ge => ">=",
        And => "and",
        Or => "or",
    }
}
