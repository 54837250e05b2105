#![forbid(unsafe_code)]

use naia_ast::Loc;

use crate::types::{LedgerId, Type};

/// Ownership state of one binding at one program point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipState {
    Owned,
    Moved,
    /// Foreign handle owned jointly with the host; the ledger records every
    /// copy and scope exit.
    Shared(LedgerId),
    /// Transient state while only a field of the binding is read; never
    /// persists past the reading statement.
    BorrowedRead,
}

impl OwnershipState {
    pub fn display(self) -> &'static str {
        match self {
            OwnershipState::Owned => "owned",
            OwnershipState::Moved => "moved",
            OwnershipState::Shared(_) => "shared",
            OwnershipState::BorrowedRead => "borrowed (read)",
        }
    }

    pub fn allows_use(self) -> bool {
        !matches!(self, OwnershipState::Moved)
    }
}

/// A named value in scope: its declared type, whether `=` may rebind it, and
/// the ownership state the checker last recorded for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub ty: Type,
    pub mutable: bool,
    pub state: OwnershipState,
    pub decl_loc: Loc,
}

impl Binding {
    pub fn new(ty: Type, mutable: bool, decl_loc: Loc) -> Self {
        Self {
            ty,
            mutable,
            state: OwnershipState::Owned,
            decl_loc,
        }
    }
}

/// Lexical scope stack. The innermost scope is last; the stack order is the
/// parent chain, so there is no owning back-pointer to manage.
#[derive(Clone, Debug, Default)]
pub struct TypeEnv {
    scopes: Vec<Vec<(String, Binding)>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self {
            scopes: vec![Vec::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pops the innermost scope and hands its bindings back in declaration
    /// order, for scope-exit finalization.
    pub fn pop_scope(&mut self) -> Vec<(String, Binding)> {
        self.scopes.pop().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declares `name` in the innermost scope. A redeclaration in the same
    /// scope shadows the earlier binding.
    pub fn declare(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(slot) = scope.iter_mut().find(|(n, _)| n == name) {
                slot.1 = binding;
                return;
            }
            scope.push((name.to_string(), binding));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().find(|(n, _)| n == name).map(|(_, b)| b))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.iter_mut().find(|(n, _)| n == name).map(|(_, b)| b))
    }

    /// True when `name` is declared in the innermost scope itself.
    pub fn declared_here(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|(n, _)| n == name))
    }
}
