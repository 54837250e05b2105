#![forbid(unsafe_code)]

use naia_ast as ast;
use naia_ast::{FileId, Loc, Pattern, SourceMap, TypeAnn};

use crate::bridge::CapabilityTable;
use crate::types::{CapabilityId, LedgerId, StructShape, Type};

/// One refcount-ledger operation the code generator must realize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RcKind {
    Retain,
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RcOp {
    pub ledger: LedgerId,
    pub kind: RcKind,
    pub loc: Loc,
}

/// Ownership transition recorded at a name use: `Owned -> Moved` for a
/// whole-value read of a movable binding, `Owned -> BorrowedRead` for a
/// field-only read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UseNote {
    Moved,
    Borrowed,
}

/// The core's output: same shape as the input unit, with types, ownership
/// transitions, and bridge annotations filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckedUnit {
    pub map: SourceMap,
    pub capabilities: CapabilityTable,
    pub modules: Vec<CheckedModule>,
}

impl CheckedUnit {
    /// Drops every annotation, recovering the untyped tree. Re-running the
    /// pipeline over the result reproduces this unit exactly.
    pub fn erase(&self) -> ast::SourceUnit {
        ast::SourceUnit {
            map: self.map.clone(),
            modules: self.modules.iter().map(CheckedModule::erase).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedModule {
    pub file: FileId,
    pub name: String,
    pub items: Vec<CheckedItem>,
    /// Ledger releases for module-scope foreign bindings, in scope-exit
    /// order.
    pub exit_ops: Vec<RcOp>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CheckedItem {
    Fn(CheckedFn),
    Struct(CheckedStructDef),
    Import(CheckedImport),
    ForeignImport(CheckedForeignImport),
    Stmt(CheckedStmt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedFn {
    pub loc: Loc,
    pub name: String,
    pub params: Vec<CheckedParam>,
    pub ret: Type,
    pub ret_ann: Option<TypeAnn>,
    pub body: CheckedBlock,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedParam {
    pub loc: Loc,
    pub name: String,
    pub ty: Type,
    pub ann: Option<TypeAnn>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedStructDef {
    pub loc: Loc,
    pub name: String,
    pub fields: Vec<ast::FieldDef>,
    pub shape: StructShape,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedImport {
    pub loc: Loc,
    pub module: String,
    pub names: Vec<(String, Type)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedForeignImport {
    pub loc: Loc,
    pub module: String,
    pub capability: CapabilityId,
    pub symbols: Vec<CheckedForeignSymbol>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedForeignSymbol {
    pub loc: Loc,
    pub name: String,
    pub ty: Type,
    /// Present for opaque handles; registry-typed symbols are plain
    /// functions and are not refcounted.
    pub ledger: Option<LedgerId>,
    pub rc_ops: Vec<RcOp>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CheckedStmt {
    Let {
        loc: Loc,
        name: String,
        mutable: bool,
        ann: Option<TypeAnn>,
        decl_ty: Type,
        value: CheckedExpr,
        rc_ops: Vec<RcOp>,
    },
    Assign {
        loc: Loc,
        target: String,
        value: CheckedExpr,
        rc_ops: Vec<RcOp>,
    },
    If {
        loc: Loc,
        cond: CheckedExpr,
        then_block: CheckedBlock,
        else_block: Option<CheckedBlock>,
    },
    While {
        loc: Loc,
        cond: CheckedExpr,
        body: CheckedBlock,
    },
    Match {
        loc: Loc,
        scrutinee: CheckedExpr,
        arms: Vec<CheckedArm>,
    },
    Expr {
        value: CheckedExpr,
        rc_ops: Vec<RcOp>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedArm {
    pub loc: Loc,
    pub pat: Pattern,
    pub body: CheckedBlock,
    /// Retain for a binding pattern that takes a refcounted scrutinee.
    pub rc_ops: Vec<RcOp>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedBlock {
    pub loc: Loc,
    pub stmts: Vec<CheckedStmt>,
    pub yield_expr: Option<CheckedExpr>,
    pub ty: Type,
    /// Releases for the scope's refcounted bindings, in declaration order.
    pub exit_ops: Vec<RcOp>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckedExpr {
    pub loc: Loc,
    pub ty: Type,
    pub kind: CheckedExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CheckedExprKind {
    Name {
        name: String,
        note: Option<UseNote>,
    },
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Unit,
    List(Vec<CheckedExpr>),
    Dict(Vec<(CheckedExpr, CheckedExpr)>),
    StructLit {
        name: String,
        fields: Vec<(String, CheckedExpr)>,
    },
    Unary {
        op: ast::UnaryOp,
        expr: Box<CheckedExpr>,
    },
    Binary {
        left: Box<CheckedExpr>,
        op: ast::BinOp,
        right: Box<CheckedExpr>,
    },
    Member {
        base: Box<CheckedExpr>,
        member: String,
    },
    Call {
        callee: Box<CheckedExpr>,
        args: Vec<CheckedExpr>,
    },
    Lambda {
        params: Vec<CheckedParam>,
        body: Box<CheckedBlock>,
    },
}

impl CheckedModule {
    /// Applies `f` to every type stored anywhere in the module.
    pub fn for_each_type_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        for item in &mut self.items {
            match item {
                CheckedItem::Fn(func) => {
                    for p in &mut func.params {
                        f(&mut p.ty);
                    }
                    f(&mut func.ret);
                    f(&mut func.ty);
                    func.body.for_each_type_mut(f);
                }
                CheckedItem::Struct(def) => {
                    for (_, ty) in &mut def.shape.fields {
                        f(ty);
                    }
                }
                CheckedItem::Import(imp) => {
                    for (_, ty) in &mut imp.names {
                        f(ty);
                    }
                }
                CheckedItem::ForeignImport(imp) => {
                    for sym in &mut imp.symbols {
                        f(&mut sym.ty);
                    }
                }
                CheckedItem::Stmt(stmt) => stmt.for_each_type_mut(f),
            }
        }
    }

    pub fn erase(&self) -> ast::Module {
        ast::Module {
            file: self.file,
            name: self.name.clone(),
            items: self.items.iter().map(CheckedItem::erase).collect(),
        }
    }
}

impl CheckedItem {
    fn erase(&self) -> ast::Item {
        match self {
            CheckedItem::Fn(func) => ast::Item::FnDef(ast::FnDef {
                loc: func.loc,
                name: ast::Located::new(func.loc, func.name.clone()),
                params: func.params.iter().map(CheckedParam::erase).collect(),
                ret: func.ret_ann.clone(),
                body: func.body.erase(),
            }),
            CheckedItem::Struct(def) => ast::Item::StructDef(ast::StructDef {
                loc: def.loc,
                name: ast::Located::new(def.loc, def.name.clone()),
                fields: def.fields.clone(),
            }),
            CheckedItem::Import(imp) => ast::Item::Import(ast::ImportStmt {
                loc: imp.loc,
                module: ast::Located::new(imp.loc, imp.module.clone()),
                names: imp
                    .names
                    .iter()
                    .map(|(n, _)| ast::Located::new(imp.loc, n.clone()))
                    .collect(),
            }),
            CheckedItem::ForeignImport(imp) => {
                ast::Item::ForeignImport(ast::ForeignImportStmt {
                    loc: imp.loc,
                    module: ast::Located::new(imp.loc, imp.module.clone()),
                    symbols: imp
                        .symbols
                        .iter()
                        .map(|s| ast::Located::new(s.loc, s.name.clone()))
                        .collect(),
                })
            }
            CheckedItem::Stmt(stmt) => ast::Item::Stmt(stmt.erase()),
        }
    }
}

impl CheckedParam {
    fn erase(&self) -> ast::Param {
        ast::Param {
            loc: self.loc,
            name: ast::Located::new(self.loc, self.name.clone()),
            ann: self.ann.clone(),
        }
    }
}

impl CheckedStmt {
    fn for_each_type_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        match self {
            CheckedStmt::Let { decl_ty, value, .. } => {
                f(decl_ty);
                value.for_each_type_mut(f);
            }
            CheckedStmt::Assign { value, .. } => value.for_each_type_mut(f),
            CheckedStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                cond.for_each_type_mut(f);
                then_block.for_each_type_mut(f);
                if let Some(block) = else_block {
                    block.for_each_type_mut(f);
                }
            }
            CheckedStmt::While { cond, body, .. } => {
                cond.for_each_type_mut(f);
                body.for_each_type_mut(f);
            }
            CheckedStmt::Match {
                scrutinee, arms, ..
            } => {
                scrutinee.for_each_type_mut(f);
                for arm in arms {
                    arm.body.for_each_type_mut(f);
                }
            }
            CheckedStmt::Expr { value, .. } => value.for_each_type_mut(f),
        }
    }

    fn erase(&self) -> ast::Stmt {
        match self {
            CheckedStmt::Let {
                loc,
                name,
                mutable,
                ann,
                value,
                ..
            } => ast::Stmt::Let(ast::LetStmt {
                loc: *loc,
                name: ast::Located::new(*loc, name.clone()),
                mutable: *mutable,
                ann: ann.clone(),
                value: value.erase(),
            }),
            CheckedStmt::Assign {
                loc,
                target,
                value,
                ..
            } => ast::Stmt::Assign(ast::AssignStmt {
                loc: *loc,
                target: ast::Located::new(*loc, target.clone()),
                value: value.erase(),
            }),
            CheckedStmt::If {
                loc,
                cond,
                then_block,
                else_block,
            } => ast::Stmt::If(ast::IfStmt {
                loc: *loc,
                cond: cond.erase(),
                then_block: then_block.erase(),
                else_block: else_block.as_ref().map(CheckedBlock::erase),
            }),
            CheckedStmt::While { loc, cond, body } => ast::Stmt::While(ast::WhileStmt {
                loc: *loc,
                cond: cond.erase(),
                body: body.erase(),
            }),
            CheckedStmt::Match {
                loc,
                scrutinee,
                arms,
            } => ast::Stmt::Match(ast::MatchStmt {
                loc: *loc,
                scrutinee: scrutinee.erase(),
                arms: arms
                    .iter()
                    .map(|arm| ast::MatchArm {
                        loc: arm.loc,
                        pat: arm.pat.clone(),
                        body: arm.body.erase(),
                    })
                    .collect(),
            }),
            CheckedStmt::Expr { value, .. } => ast::Stmt::ExprStmt(value.erase()),
        }
    }
}

impl CheckedBlock {
    fn for_each_type_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        f(&mut self.ty);
        for stmt in &mut self.stmts {
            stmt.for_each_type_mut(f);
        }
        if let Some(expr) = &mut self.yield_expr {
            expr.for_each_type_mut(f);
        }
    }

    fn erase(&self) -> ast::Block {
        ast::Block {
            loc: self.loc,
            stmts: self.stmts.iter().map(CheckedStmt::erase).collect(),
            yield_expr: self.yield_expr.as_ref().map(CheckedExpr::erase),
        }
    }
}

impl CheckedExpr {
    fn for_each_type_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        f(&mut self.ty);
        match &mut self.kind {
            CheckedExprKind::Name { .. }
            | CheckedExprKind::Int(_)
            | CheckedExprKind::Float(_)
            | CheckedExprKind::Str(_)
            | CheckedExprKind::Bool(_)
            | CheckedExprKind::Unit => {}
            CheckedExprKind::List(items) => {
                for item in items {
                    item.for_each_type_mut(f);
                }
            }
            CheckedExprKind::Dict(entries) => {
                for (k, v) in entries {
                    k.for_each_type_mut(f);
                    v.for_each_type_mut(f);
                }
            }
            CheckedExprKind::StructLit { fields, .. } => {
                for (_, value) in fields {
                    value.for_each_type_mut(f);
                }
            }
            CheckedExprKind::Unary { expr, .. } => expr.for_each_type_mut(f),
            CheckedExprKind::Binary { left, right, .. } => {
                left.for_each_type_mut(f);
                right.for_each_type_mut(f);
            }
            CheckedExprKind::Member { base, .. } => base.for_each_type_mut(f),
            CheckedExprKind::Call { callee, args } => {
                callee.for_each_type_mut(f);
                for arg in args {
                    arg.for_each_type_mut(f);
                }
            }
            CheckedExprKind::Lambda { params, body } => {
                for p in params {
                    f(&mut p.ty);
                }
                body.for_each_type_mut(f);
            }
        }
    }

    fn erase(&self) -> ast::Expr {
        let kind = match &self.kind {
            CheckedExprKind::Name { name, .. } => {
                ast::ExprKind::Ident(ast::Located::new(self.loc, name.clone()))
            }
            CheckedExprKind::Int(v) => ast::ExprKind::IntLit(*v),
            CheckedExprKind::Float(v) => ast::ExprKind::FloatLit(*v),
            CheckedExprKind::Str(v) => ast::ExprKind::StrLit(v.clone()),
            CheckedExprKind::Bool(v) => ast::ExprKind::BoolLit(*v),
            CheckedExprKind::Unit => ast::ExprKind::UnitLit,
            CheckedExprKind::List(items) => {
                ast::ExprKind::ListLit(items.iter().map(CheckedExpr::erase).collect())
            }
            CheckedExprKind::Dict(entries) => ast::ExprKind::DictLit(
                entries
                    .iter()
                    .map(|(k, v)| (k.erase(), v.erase()))
                    .collect(),
            ),
            CheckedExprKind::StructLit { name, fields } => ast::ExprKind::StructLit {
                name: ast::Located::new(self.loc, name.clone()),
                fields: fields
                    .iter()
                    .map(|(n, v)| (ast::Located::new(self.loc, n.clone()), v.erase()))
                    .collect(),
            },
            CheckedExprKind::Unary { op, expr } => ast::ExprKind::Unary {
                op: *op,
                expr: Box::new(expr.erase()),
            },
            CheckedExprKind::Binary { left, op, right } => ast::ExprKind::Binary {
                left: Box::new(left.erase()),
                op: *op,
                right: Box::new(right.erase()),
            },
            CheckedExprKind::Member { base, member } => ast::ExprKind::Member {
                base: Box::new(base.erase()),
                member: ast::Located::new(self.loc, member.clone()),
            },
            CheckedExprKind::Call { callee, args } => ast::ExprKind::Call {
                callee: Box::new(callee.erase()),
                args: args.iter().map(CheckedExpr::erase).collect(),
            },
            CheckedExprKind::Lambda { params, body } => ast::ExprKind::Lambda {
                params: params.iter().map(CheckedParam::erase).collect(),
                body: Box::new(body.erase()),
            },
        };
        ast::Expr {
            loc: self.loc,
            kind,
        }
    }
}
