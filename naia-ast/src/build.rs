//! Constructor helpers for assembling trees without a parser in front.
//!
//! The semantic core consumes parser output; embedders and this workspace's
//! own tests produce that shape directly with these functions.

use crate::*;

pub fn ident(loc: Loc, name: &str) -> Ident {
    Located::new(loc, name.to_string())
}

pub fn module(file: FileId, name: &str, items: Vec<Item>) -> Module {
    Module {
        file,
        name: name.to_string(),
        items,
    }
}

// --- items -----------------------------------------------------------------

pub fn fn_def(
    loc: Loc,
    name: &str,
    params: Vec<Param>,
    ret: Option<TypeAnn>,
    body: Block,
) -> Item {
    Item::FnDef(FnDef {
        loc,
        name: ident(loc, name),
        params,
        ret,
        body,
    })
}

pub fn param(loc: Loc, name: &str, ann: Option<TypeAnn>) -> Param {
    Param {
        loc,
        name: ident(loc, name),
        ann,
    }
}

pub fn struct_def(loc: Loc, name: &str, fields: Vec<FieldDef>) -> Item {
    Item::StructDef(StructDef {
        loc,
        name: ident(loc, name),
        fields,
    })
}

pub fn field_def(loc: Loc, name: &str, ann: TypeAnn) -> FieldDef {
    FieldDef {
        loc,
        name: ident(loc, name),
        ann,
    }
}

pub fn import(loc: Loc, module: &str, names: &[&str]) -> Item {
    Item::Import(ImportStmt {
        loc,
        module: ident(loc, module),
        names: names.iter().map(|n| ident(loc, n)).collect(),
    })
}

pub fn foreign_import(loc: Loc, module: &str, symbols: &[&str]) -> Item {
    Item::ForeignImport(ForeignImportStmt {
        loc,
        module: ident(loc, module),
        symbols: symbols.iter().map(|s| ident(loc, s)).collect(),
    })
}

pub fn top(stmt: Stmt) -> Item {
    Item::Stmt(stmt)
}

// --- statements ------------------------------------------------------------

pub fn let_(loc: Loc, name: &str, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        loc,
        name: ident(loc, name),
        mutable: true,
        ann: None,
        value,
    })
}

pub fn let_ann(loc: Loc, name: &str, ann: TypeAnn, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        loc,
        name: ident(loc, name),
        mutable: true,
        ann: Some(ann),
        value,
    })
}

pub fn const_(loc: Loc, name: &str, value: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        loc,
        name: ident(loc, name),
        mutable: false,
        ann: None,
        value,
    })
}

pub fn assign(loc: Loc, target: &str, value: Expr) -> Stmt {
    Stmt::Assign(AssignStmt {
        loc,
        target: ident(loc, target),
        value,
    })
}

pub fn if_(loc: Loc, cond: Expr, then_block: Block) -> Stmt {
    Stmt::If(IfStmt {
        loc,
        cond,
        then_block,
        else_block: None,
    })
}

pub fn if_else(loc: Loc, cond: Expr, then_block: Block, else_block: Block) -> Stmt {
    Stmt::If(IfStmt {
        loc,
        cond,
        then_block,
        else_block: Some(else_block),
    })
}

pub fn while_(loc: Loc, cond: Expr, body: Block) -> Stmt {
    Stmt::While(WhileStmt { loc, cond, body })
}

pub fn match_(loc: Loc, scrutinee: Expr, arms: Vec<MatchArm>) -> Stmt {
    Stmt::Match(MatchStmt {
        loc,
        scrutinee,
        arms,
    })
}

pub fn arm(loc: Loc, pat: Pattern, body: Block) -> MatchArm {
    MatchArm { loc, pat, body }
}

pub fn pat_wild(loc: Loc) -> Pattern {
    Pattern::Wildcard { loc }
}

pub fn pat_int(loc: Loc, value: i64) -> Pattern {
    Pattern::IntLit { loc, value }
}

pub fn pat_str(loc: Loc, value: &str) -> Pattern {
    Pattern::StrLit {
        loc,
        value: value.to_string(),
    }
}

pub fn pat_bind(loc: Loc, name: &str) -> Pattern {
    Pattern::Binding {
        loc,
        name: ident(loc, name),
    }
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::ExprStmt(expr)
}

pub fn block(loc: Loc, stmts: Vec<Stmt>) -> Block {
    Block {
        loc,
        stmts,
        yield_expr: None,
    }
}

pub fn yielding(loc: Loc, stmts: Vec<Stmt>, yield_expr: Expr) -> Block {
    Block {
        loc,
        stmts,
        yield_expr: Some(yield_expr),
    }
}

// --- expressions -----------------------------------------------------------

pub fn name(loc: Loc, name: &str) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Ident(ident(loc, name)),
    }
}

pub fn int(loc: Loc, value: i64) -> Expr {
    Expr {
        loc,
        kind: ExprKind::IntLit(value),
    }
}

pub fn float(loc: Loc, value: f64) -> Expr {
    Expr {
        loc,
        kind: ExprKind::FloatLit(value),
    }
}

pub fn str_(loc: Loc, value: &str) -> Expr {
    Expr {
        loc,
        kind: ExprKind::StrLit(value.to_string()),
    }
}

pub fn bool_(loc: Loc, value: bool) -> Expr {
    Expr {
        loc,
        kind: ExprKind::BoolLit(value),
    }
}

pub fn unit(loc: Loc) -> Expr {
    Expr {
        loc,
        kind: ExprKind::UnitLit,
    }
}

pub fn list(loc: Loc, items: Vec<Expr>) -> Expr {
    Expr {
        loc,
        kind: ExprKind::ListLit(items),
    }
}

pub fn dict(loc: Loc, entries: Vec<(Expr, Expr)>) -> Expr {
    Expr {
        loc,
        kind: ExprKind::DictLit(entries),
    }
}

pub fn struct_lit(loc: Loc, name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    Expr {
        loc,
        kind: ExprKind::StructLit {
            name: ident(loc, name),
            fields: fields
                .into_iter()
                .map(|(f, e)| (ident(loc, f), e))
                .collect(),
        },
    }
}

pub fn unary(loc: Loc, op: UnaryOp, expr: Expr) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Unary {
            op,
            expr: Box::new(expr),
        },
    }
}

pub fn binary(loc: Loc, left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

pub fn member(loc: Loc, base: Expr, field: &str) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Member {
            base: Box::new(base),
            member: ident(loc, field),
        },
    }
}

pub fn call(loc: Loc, callee: Expr, args: Vec<Expr>) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Call {
            callee: Box::new(callee),
            args,
        },
    }
}

pub fn lambda(loc: Loc, params: Vec<Param>, body: Block) -> Expr {
    Expr {
        loc,
        kind: ExprKind::Lambda {
            params,
            body: Box::new(body),
        },
    }
}

// --- type annotations ------------------------------------------------------

pub fn ann_name(loc: Loc, name: &str) -> TypeAnn {
    TypeAnn {
        loc,
        kind: TypeAnnKind::Name(name.to_string()),
    }
}

pub fn ann_list(loc: Loc, elem: TypeAnn) -> TypeAnn {
    TypeAnn {
        loc,
        kind: TypeAnnKind::List(Box::new(elem)),
    }
}

pub fn ann_dict(loc: Loc, key: TypeAnn, value: TypeAnn) -> TypeAnn {
    TypeAnn {
        loc,
        kind: TypeAnnKind::Dict(Box::new(key), Box::new(value)),
    }
}

pub fn ann_func(loc: Loc, params: Vec<TypeAnn>, ret: TypeAnn) -> TypeAnn {
    TypeAnn {
        loc,
        kind: TypeAnnKind::Func {
            params,
            ret: Box::new(ret),
        },
    }
}
