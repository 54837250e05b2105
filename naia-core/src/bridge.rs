#![forbid(unsafe_code)]

//! Foreign-host boundary: capability gating, host symbol signatures, the
//! value conversion table, and the refcount ledger audit.

use std::collections::{BTreeMap, BTreeSet};

use naia_ast as ast;
use naia_ast::Loc;

use crate::checked::{CheckedBlock, CheckedItem, CheckedModule, CheckedStmt, RcKind, RcOp};
use crate::diag::Diagnostic;
use crate::types::{CapabilityId, LedgerId, Primitive, Type};

/// The set of host modules a project has granted itself access to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityAllowlist {
    names: BTreeSet<String>,
}

impl CapabilityAllowlist {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, module: &str) -> bool {
        self.names.contains(module)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// Interned capability names, one id per granted host module that the
/// program actually imports. Ids are assigned in first-seen unit order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    names: Vec<String>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> CapabilityId {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return CapabilityId(pos as u32);
        }
        self.names.push(name.to_string());
        CapabilityId((self.names.len() - 1) as u32)
    }

    pub fn id_of(&self, name: &str) -> Option<CapabilityId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|pos| CapabilityId(pos as u32))
    }

    pub fn name_of(&self, id: CapabilityId) -> &str {
        self.names
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Checks every foreign import against the allowlist before any other
/// analysis runs. The first denied module aborts the whole unit, so a
/// rejected program never reaches inference.
pub fn capability_gate(
    unit: &ast::SourceUnit,
    allow: &CapabilityAllowlist,
) -> Result<CapabilityTable, Diagnostic> {
    let mut table = CapabilityTable::new();
    for module in &unit.modules {
        for item in &module.items {
            if let ast::Item::ForeignImport(imp) = item {
                if !allow.allows(&imp.module.node) {
                    return Err(Diagnostic::capability_denied(imp.loc, &imp.module.node));
                }
                table.intern(&imp.module.node);
            }
        }
    }
    Ok(table)
}

/// Signatures for the host symbols the runtime ships. A symbol found here
/// binds as a plain function; anything else imported from a granted module
/// binds as an opaque refcounted handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostRegistry;

impl HostRegistry {
    pub fn signature_of(&self, module: &str, symbol: &str) -> Option<Type> {
        let ty = match (module, symbol) {
            ("json", "parse") => Type::function(vec![Type::STR], Type::Unknown),
            ("json", "stringify") => Type::function(vec![Type::Unknown], Type::STR),
            ("math", "sqrt") => Type::function(vec![Type::FLOAT], Type::FLOAT),
            ("math", "pow") => Type::function(vec![Type::FLOAT, Type::FLOAT], Type::FLOAT),
            ("math", "floor") => Type::function(vec![Type::FLOAT], Type::INT),
            ("fs", "read_text") => Type::function(vec![Type::STR], Type::STR),
            ("fs", "write_text") => Type::function(vec![Type::STR, Type::STR], Type::UNIT),
            ("fs", "exists") => Type::function(vec![Type::STR], Type::BOOL),
            ("net.http", "get") => Type::function(vec![Type::STR], Type::STR),
            ("net.http", "post") => Type::function(vec![Type::STR, Type::STR], Type::STR),
            ("base64", "encode") => Type::function(vec![Type::STR], Type::STR),
            ("base64", "decode") => Type::function(vec![Type::STR], Type::STR),
            _ => return None,
        };
        Some(ty)
    }
}

/// Whether a value of this type crosses the host boundary without an
/// explicit conversion. Lists and dicts convert elementwise; handles are
/// already host values; `Unknown` defers to the runtime check.
pub fn bridges_natively(ty: &Type) -> bool {
    match ty {
        Type::Primitive(Primitive::Int)
        | Type::Primitive(Primitive::Float)
        | Type::Primitive(Primitive::Str)
        | Type::Primitive(Primitive::Bool) => true,
        Type::Primitive(Primitive::Unit) => false,
        Type::ListOf(elem) => bridges_natively(elem),
        Type::DictOf(key, value) => bridges_natively(key) && bridges_natively(value),
        Type::Struct(_) | Type::Function { .. } => false,
        Type::Foreign(_) => true,
        Type::Var(_) | Type::Unknown => true,
    }
}

pub fn conversion_diag(ty: &Type, loc: Loc) -> Option<Diagnostic> {
    if bridges_natively(ty) {
        None
    } else {
        Some(Diagnostic::conversion_unsupported(loc, &ty.display()))
    }
}

/// Inserts the initial Retain for every opaque imported symbol. Runs after
/// ownership analysis so the import Retain is the first operation on each
/// ledger.
pub fn finalize_ledgers(module: &mut CheckedModule) {
    for item in &mut module.items {
        if let CheckedItem::ForeignImport(imp) = item {
            for sym in &mut imp.symbols {
                if let Some(ledger) = sym.ledger {
                    sym.rc_ops = vec![RcOp {
                        ledger,
                        kind: RcKind::Retain,
                        loc: sym.loc,
                    }];
                }
            }
        }
    }
}

/// Every ledger operation in the module, in source order.
pub fn collect_rc_ops(module: &CheckedModule) -> Vec<RcOp> {
    let mut ops = Vec::new();
    for item in &module.items {
        match item {
            CheckedItem::ForeignImport(imp) => {
                for sym in &imp.symbols {
                    ops.extend_from_slice(&sym.rc_ops);
                }
            }
            CheckedItem::Fn(func) => collect_block(&func.body, &mut ops),
            CheckedItem::Stmt(stmt) => collect_stmt(stmt, &mut ops),
            CheckedItem::Struct(_) | CheckedItem::Import(_) => {}
        }
    }
    ops.extend_from_slice(&module.exit_ops);
    ops
}

fn collect_stmt(stmt: &CheckedStmt, ops: &mut Vec<RcOp>) {
    match stmt {
        CheckedStmt::Let { value, rc_ops, .. } => {
            collect_expr_blocks(value, ops);
            ops.extend_from_slice(rc_ops);
        }
        CheckedStmt::Assign { value, rc_ops, .. } => {
            collect_expr_blocks(value, ops);
            ops.extend_from_slice(rc_ops);
        }
        CheckedStmt::If {
            then_block,
            else_block,
            ..
        } => {
            collect_block(then_block, ops);
            if let Some(block) = else_block {
                collect_block(block, ops);
            }
        }
        CheckedStmt::While { body, .. } => collect_block(body, ops),
        CheckedStmt::Match { arms, .. } => {
            for arm in arms {
                ops.extend_from_slice(&arm.rc_ops);
                collect_block(&arm.body, ops);
            }
        }
        CheckedStmt::Expr { value, rc_ops } => {
            collect_expr_blocks(value, ops);
            ops.extend_from_slice(rc_ops);
        }
    }
}

fn collect_block(block: &CheckedBlock, ops: &mut Vec<RcOp>) {
    for stmt in &block.stmts {
        collect_stmt(stmt, ops);
    }
    if let Some(expr) = &block.yield_expr {
        collect_expr_blocks(expr, ops);
    }
    ops.extend_from_slice(&block.exit_ops);
}

fn collect_expr_blocks(expr: &crate::checked::CheckedExpr, ops: &mut Vec<RcOp>) {
    use crate::checked::CheckedExprKind as K;
    match &expr.kind {
        K::Lambda { body, .. } => collect_block(body, ops),
        K::List(items) => {
            for item in items {
                collect_expr_blocks(item, ops);
            }
        }
        K::Dict(entries) => {
            for (k, v) in entries {
                collect_expr_blocks(k, ops);
                collect_expr_blocks(v, ops);
            }
        }
        K::StructLit { fields, .. } => {
            for (_, value) in fields {
                collect_expr_blocks(value, ops);
            }
        }
        K::Unary { expr, .. } => collect_expr_blocks(expr, ops),
        K::Binary { left, right, .. } => {
            collect_expr_blocks(left, ops);
            collect_expr_blocks(right, ops);
        }
        K::Member { base, .. } => collect_expr_blocks(base, ops),
        K::Call { callee, args } => {
            collect_expr_blocks(callee, ops);
            for arg in args {
                collect_expr_blocks(arg, ops);
            }
        }
        K::Name { .. }
        | K::Int(_)
        | K::Float(_)
        | K::Str(_)
        | K::Bool(_)
        | K::Unit => {}
    }
}

/// Replays the module's ledger operations in source order and returns the
/// final count per ledger. A count that dips below zero means a handle was
/// released before anything retained it.
pub fn replay_ledgers(module: &CheckedModule) -> Result<BTreeMap<LedgerId, i64>, RcOp> {
    let mut counts: BTreeMap<LedgerId, i64> = BTreeMap::new();
    for op in collect_rc_ops(module) {
        let count = counts.entry(op.ledger).or_insert(0);
        match op.kind {
            RcKind::Retain => *count += 1,
            RcKind::Release => *count -= 1,
        }
        if *count < 0 {
            return Err(op);
        }
    }
    Ok(counts)
}
