#![forbid(unsafe_code)]

pub mod build;

/// Index into the [`SourceMap`] of the compilation unit a node belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

/// Source position as handed over by the parser: file, 1-based line, 1-based
/// column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    pub file: FileId,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(file: FileId, line: u32, col: u32) -> Self {
        Self { file, line, col }
    }
}

pub fn loc(file: FileId, line: u32, col: u32) -> Loc {
    Loc::new(file, line, col)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Located<T> {
    pub loc: Loc,
    pub node: T,
}

impl<T> Located<T> {
    pub fn new(loc: Loc, node: T) -> Self {
        Self { loc, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Located<U> {
        Located {
            loc: self.loc,
            node: f(self.node),
        }
    }
}

pub type Ident = Located<String>;

/// Interns file names; diagnostics resolve a [`FileId`] back through this map
/// only when rendering or ordering output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceMap {
    names: Vec<String>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> FileId {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return FileId(idx as u32);
        }
        self.names.push(name.to_string());
        FileId((self.names.len() - 1) as u32)
    }

    pub fn name(&self, file: FileId) -> &str {
        self.names
            .get(file.0 as usize)
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

/// One compilation unit: every parsed module plus the map resolving their
/// file ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceUnit {
    pub map: SourceMap,
    pub modules: Vec<Module>,
}

impl SourceUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, module: Module) {
        self.modules.push(module);
    }
}

/// One source file after parsing. `name` is the module name other files use
/// in `import` statements.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub file: FileId,
    pub name: String,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    FnDef(FnDef),
    StructDef(StructDef),
    Import(ImportStmt),
    ForeignImport(ForeignImportStmt),
    Stmt(Stmt),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let(LetStmt),
    Assign(AssignStmt),
    If(IfStmt),
    While(WhileStmt),
    Match(MatchStmt),
    ExprStmt(Expr),
}

/// `let name = expr` (reassignable) or `const name = expr` (not).
#[derive(Clone, Debug, PartialEq)]
pub struct LetStmt {
    pub loc: Loc,
    pub name: Ident,
    pub mutable: bool,
    pub ann: Option<TypeAnn>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub loc: Loc,
    pub target: Ident,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub loc: Loc,
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub loc: Loc,
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchStmt {
    pub loc: Loc,
    pub scrutinee: Expr,
    pub arms: Vec<MatchArm>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub loc: Loc,
    pub pat: Pattern,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Wildcard { loc: Loc },
    IntLit { loc: Loc, value: i64 },
    StrLit { loc: Loc, value: String },
    /// Binds the scrutinee under a fresh name for the arm body.
    Binding { loc: Loc, name: Ident },
}

impl Pattern {
    pub fn loc(&self) -> Loc {
        match self {
            Pattern::Wildcard { loc }
            | Pattern::IntLit { loc, .. }
            | Pattern::StrLit { loc, .. }
            | Pattern::Binding { loc, .. } => *loc,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FnDef {
    pub loc: Loc,
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeAnn>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub loc: Loc,
    pub name: Ident,
    pub ann: Option<TypeAnn>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDef {
    pub loc: Loc,
    pub name: Ident,
    pub fields: Vec<FieldDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub loc: Loc,
    pub name: Ident,
    pub ann: TypeAnn,
}

/// `import geometry.{Point, scale}` — names from another module of the same
/// unit.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportStmt {
    pub loc: Loc,
    pub module: Ident,
    pub names: Vec<Ident>,
}

/// `foreign import json.{parse, stringify}` — symbols from a host module,
/// gated by the capability allowlist.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignImportStmt {
    pub loc: Loc,
    pub module: Ident,
    pub symbols: Vec<Ident>,
}

/// A braced body. The trailing expression, when present, is the block's
/// value; a function body's yield is its return value.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub loc: Loc,
    pub stmts: Vec<Stmt>,
    pub yield_expr: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAnn {
    pub loc: Loc,
    pub kind: TypeAnnKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeAnnKind {
    /// `Int`, `Str`, a struct name, or `any`.
    Name(String),
    List(Box<TypeAnn>),
    Dict(Box<TypeAnn>, Box<TypeAnn>),
    Func {
        params: Vec<TypeAnn>,
        ret: Box<TypeAnn>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub loc: Loc,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ident(Ident),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    UnitLit,
    ListLit(Vec<Expr>),
    DictLit(Vec<(Expr, Expr)>),
    /// `TypeName { field: value, ... }`
    StructLit {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: Ident,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Block>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}
