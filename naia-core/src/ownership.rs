#![forbid(unsafe_code)]

//! Move and refcount analysis over the checked tree.
//!
//! Every body is lowered to a control-flow graph of ownership actions, a
//! forward dataflow pass computes the binding states reaching each block,
//! and a second walk in the same order writes the results back into the
//! tree: `UseNote`s on name reads and ledger operations on statements.
//! Function bodies are intraprocedural; the module's top-level statements
//! form an init body of their own with the imported handles in scope.

use std::collections::{HashMap, VecDeque};

use naia_ast::{Loc, Pattern};

use crate::cfg::{BlockId, Cfg};
use crate::checked::{
    CheckedBlock, CheckedExpr, CheckedExprKind, CheckedItem, CheckedModule, CheckedParam,
    CheckedStmt, RcKind, RcOp, UseNote,
};
use crate::diag::Diagnostic;
use crate::types::{LedgerId, Type, ValueClass};

/// Name brought into a body from outside: parameters, lambda captures, or
/// module-scope handles for the init body.
type Entry = (String, ValueClass, Option<LedgerId>);

/// Abstract state of one tracked binding at a program point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Local {
    Owned,
    Moved { at: Loc },
    /// Refcounted handle. The ledger is dropped when two paths disagree;
    /// an untracked handle gets no further operations.
    Shared { ledger: Option<LedgerId> },
}

type StateMap = HashMap<String, Local>;

fn join(a: Local, b: Local) -> Local {
    match (a, b) {
        (Local::Moved { at: x }, Local::Moved { at: y }) => Local::Moved { at: x.min(y) },
        (Local::Moved { at }, _) | (_, Local::Moved { at }) => Local::Moved { at },
        (Local::Shared { ledger: x }, Local::Shared { ledger: y }) => Local::Shared {
            ledger: if x == y { x } else { None },
        },
        (Local::Shared { .. }, Local::Owned) | (Local::Owned, Local::Shared { .. }) => {
            Local::Shared { ledger: None }
        }
        (Local::Owned, Local::Owned) => Local::Owned,
    }
}

fn join_states(mut a: StateMap, b: &StateMap) -> StateMap {
    for (name, rhs) in b {
        let merged = match a.get(name) {
            Some(lhs) => join(*lhs, *rhs),
            None => *rhs,
        };
        a.insert(name.clone(), merged);
    }
    a
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UseMode {
    /// Whole-value read that does not take the value anywhere.
    Read,
    /// Field-only read; keeps ownership with the binding.
    Borrow,
    /// The value flows into a new owner.
    Consume,
}

/// One step of a lowered body. `slot` indexes the verdict produced for the
/// step, in walk order.
#[derive(Clone, Debug)]
enum Action {
    Use {
        name: String,
        class: ValueClass,
        mode: UseMode,
        loc: Loc,
        slot: usize,
    },
    Define {
        name: String,
        class: ValueClass,
        source: Option<String>,
        loc: Loc,
        slot: usize,
    },
    Reassign {
        name: String,
        source: Option<String>,
        loc: Loc,
        slot: usize,
    },
    /// A discarded call result that produced a fresh handle.
    Discard {
        source: Option<String>,
        loc: Loc,
        slot: usize,
    },
    ExitScope {
        names: Vec<String>,
        loc: Loc,
        slot: usize,
    },
}

#[derive(Clone, Debug, Default)]
struct Verdict {
    note: Option<UseNote>,
    ops: Vec<RcOp>,
}

/// Ledger a refcounted value is accounted on, resolved through the name at
/// the root of the producing expression.
fn refcount_source(expr: &CheckedExpr) -> Option<String> {
    if !matches!(expr.ty, Type::Foreign(_)) {
        return None;
    }
    handle_root(expr)
}

fn handle_root(expr: &CheckedExpr) -> Option<String> {
    match &expr.kind {
        CheckedExprKind::Name { name, .. } => Some(name.clone()),
        CheckedExprKind::Member { base, .. } => handle_root(base),
        CheckedExprKind::Call { callee, .. } => handle_root(callee),
        _ => None,
    }
}

fn source_ledger(
    state: &StateMap,
    module_ledgers: &HashMap<String, LedgerId>,
    source: Option<&str>,
) -> Option<LedgerId> {
    let name = source?;
    match state.get(name) {
        Some(Local::Shared { ledger }) => *ledger,
        Some(_) => None,
        None => module_ledgers.get(name).copied(),
    }
}

/// Applies one action to the state. With `out` present the pass also
/// records verdicts and diagnostics; the fixpoint runs without it.
fn apply(
    state: &mut StateMap,
    action: &Action,
    module_ledgers: &HashMap<String, LedgerId>,
    mut out: Option<(&mut Vec<Verdict>, &mut Vec<Diagnostic>)>,
) {
    match action {
        Action::Use {
            name,
            class,
            mode,
            loc,
            slot,
        } => match state.get(name).copied() {
            Some(Local::Owned) => {
                if *class == ValueClass::Move {
                    match mode {
                        UseMode::Consume => {
                            state.insert(name.clone(), Local::Moved { at: *loc });
                            if let Some((verdicts, _)) = out.as_mut() {
                                verdicts[*slot].note = Some(UseNote::Moved);
                            }
                        }
                        UseMode::Borrow => {
                            if let Some((verdicts, _)) = out.as_mut() {
                                verdicts[*slot].note = Some(UseNote::Borrowed);
                            }
                        }
                        UseMode::Read => {}
                    }
                }
            }
            Some(Local::Moved { at }) => {
                if let Some((_, diags)) = out.as_mut() {
                    let diag = match mode {
                        UseMode::Consume => Diagnostic::double_move(*loc, name, at),
                        UseMode::Read | UseMode::Borrow => {
                            Diagnostic::use_after_move(*loc, name, at)
                        }
                    };
                    diags.push(diag);
                }
            }
            Some(Local::Shared { .. }) | None => {}
        },
        Action::Define {
            name,
            class,
            source,
            loc,
            slot,
        } => {
            let local = if *class == ValueClass::Refcounted {
                let ledger = source_ledger(state, module_ledgers, source.as_deref());
                if let Some(ledger) = ledger {
                    if let Some((verdicts, _)) = out.as_mut() {
                        verdicts[*slot].ops.push(RcOp {
                            ledger,
                            kind: RcKind::Retain,
                            loc: *loc,
                        });
                    }
                }
                Local::Shared { ledger }
            } else {
                Local::Owned
            };
            state.insert(name.clone(), local);
        }
        Action::Reassign {
            name,
            source,
            loc,
            slot,
        } => match state.get(name).copied() {
            Some(Local::Shared { ledger: old }) => {
                let new = source_ledger(state, module_ledgers, source.as_deref());
                if let Some((verdicts, _)) = out.as_mut() {
                    if let Some(ledger) = new {
                        verdicts[*slot].ops.push(RcOp {
                            ledger,
                            kind: RcKind::Retain,
                            loc: *loc,
                        });
                    }
                    if let Some(ledger) = old {
                        verdicts[*slot].ops.push(RcOp {
                            ledger,
                            kind: RcKind::Release,
                            loc: *loc,
                        });
                    }
                }
                state.insert(name.clone(), Local::Shared { ledger: new });
            }
            Some(_) => {
                state.insert(name.clone(), Local::Owned);
            }
            None => {}
        },
        Action::Discard { source, loc, slot } => {
            if let Some(ledger) = source_ledger(state, module_ledgers, source.as_deref()) {
                if let Some((verdicts, _)) = out.as_mut() {
                    verdicts[*slot].ops.push(RcOp {
                        ledger,
                        kind: RcKind::Retain,
                        loc: *loc,
                    });
                    verdicts[*slot].ops.push(RcOp {
                        ledger,
                        kind: RcKind::Release,
                        loc: *loc,
                    });
                }
            }
        }
        Action::ExitScope { names, loc, slot } => {
            for name in names {
                if let Some(Local::Shared {
                    ledger: Some(ledger),
                }) = state.get(name).copied()
                {
                    if let Some((verdicts, _)) = out.as_mut() {
                        verdicts[*slot].ops.push(RcOp {
                            ledger,
                            kind: RcKind::Release,
                            loc: *loc,
                        });
                    }
                }
                state.remove(name);
            }
        }
    }
}

/// Worklist fixpoint over the lowered graph, then a single replay per block
/// with the converged entry states to fill the verdicts and report moves.
fn solve(
    cfg: &Cfg<Action>,
    entries: &[Entry],
    module_ledgers: &HashMap<String, LedgerId>,
    slot_count: usize,
    diags: &mut Vec<Diagnostic>,
) -> Vec<Verdict> {
    let order = cfg.rpo();
    let mut entry_states: Vec<Option<StateMap>> = vec![None; cfg.len()];
    let mut exit_states: Vec<Option<StateMap>> = vec![None; cfg.len()];

    let seed: StateMap = entries
        .iter()
        .map(|(name, class, ledger)| {
            let local = match class {
                ValueClass::Refcounted => Local::Shared { ledger: *ledger },
                _ => Local::Owned,
            };
            (name.clone(), local)
        })
        .collect();
    entry_states[cfg.entry.0 as usize] = Some(seed);

    let mut queued = vec![false; cfg.len()];
    let mut work: VecDeque<BlockId> = VecDeque::new();
    for id in &order {
        queued[id.0 as usize] = true;
        work.push_back(*id);
    }

    while let Some(id) = work.pop_front() {
        let idx = id.0 as usize;
        queued[idx] = false;

        let mut merged: Option<StateMap> = if id == cfg.entry {
            entry_states[idx].clone()
        } else {
            None
        };
        for pred in &cfg.block(id).preds {
            if let Some(out) = &exit_states[pred.0 as usize] {
                merged = Some(match merged {
                    Some(m) => join_states(m, out),
                    None => out.clone(),
                });
            }
        }
        let Some(state_in) = merged else {
            continue;
        };
        entry_states[idx] = Some(state_in.clone());

        let mut state = state_in;
        for action in &cfg.block(id).actions {
            apply(&mut state, action, module_ledgers, None);
        }
        if exit_states[idx].as_ref() != Some(&state) {
            exit_states[idx] = Some(state);
            for succ in &cfg.block(id).succs {
                if !queued[succ.0 as usize] {
                    queued[succ.0 as usize] = true;
                    work.push_back(*succ);
                }
            }
        }
    }

    let mut verdicts = vec![Verdict::default(); slot_count];
    for id in order {
        let idx = id.0 as usize;
        let Some(entry) = &entry_states[idx] else {
            continue;
        };
        let mut state = entry.clone();
        for action in &cfg.block(id).actions {
            apply(
                &mut state,
                action,
                module_ledgers,
                Some((&mut verdicts, &mut *diags)),
            );
        }
    }
    verdicts
}

enum Phase {
    Lower {
        cfg: Cfg<Action>,
        cur: BlockId,
        slots: usize,
    },
    Annotate {
        verdicts: Vec<Verdict>,
        cursor: usize,
    },
}

/// Shared walker for both passes over a body. The lowering pass emits one
/// action per ownership event; the annotate pass walks the tree in the
/// same order and consumes one verdict per event, so the cursor stays
/// aligned without storing paths into the tree.
struct BodyPass<'a> {
    phase: Phase,
    scopes: Vec<Vec<(String, ValueClass)>>,
    module_ledgers: &'a HashMap<String, LedgerId>,
    diags: &'a mut Vec<Diagnostic>,
}

impl<'a> BodyPass<'a> {
    fn lowering(
        entries: &[Entry],
        module_ledgers: &'a HashMap<String, LedgerId>,
        diags: &'a mut Vec<Diagnostic>,
    ) -> Self {
        let cfg = Cfg::new();
        let entry = cfg.entry;
        Self {
            phase: Phase::Lower {
                cfg,
                cur: entry,
                slots: 0,
            },
            scopes: vec![outer_scope(entries)],
            module_ledgers,
            diags,
        }
    }

    fn annotating(
        entries: &[Entry],
        module_ledgers: &'a HashMap<String, LedgerId>,
        diags: &'a mut Vec<Diagnostic>,
        verdicts: Vec<Verdict>,
    ) -> Self {
        Self {
            phase: Phase::Annotate {
                verdicts,
                cursor: 0,
            },
            scopes: vec![outer_scope(entries)],
            module_ledgers,
            diags,
        }
    }

    fn open_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn close_scope(&mut self, loc: Loc) -> Vec<RcOp> {
        let names: Vec<String> = self
            .scopes
            .pop()
            .unwrap_or_default()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        self.emit(move |slot| Action::ExitScope { names, loc, slot })
    }

    fn declare(&mut self, name: &str, class: ValueClass) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), class));
        }
    }

    fn class_of(&self, name: &str) -> Option<ValueClass> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, class)| *class)
    }

    /// Records an action in the lowering pass; yields its verdict ops in
    /// the annotate pass.
    fn emit(&mut self, make: impl FnOnce(usize) -> Action) -> Vec<RcOp> {
        match &mut self.phase {
            Phase::Lower { cfg, cur, slots } => {
                let slot = *slots;
                *slots += 1;
                cfg.push_action(*cur, make(slot));
                Vec::new()
            }
            Phase::Annotate { verdicts, cursor } => {
                let ops = verdicts
                    .get(*cursor)
                    .map(|v| v.ops.clone())
                    .unwrap_or_default();
                *cursor += 1;
                ops
            }
        }
    }

    fn emit_use(&mut self, name: &str, class: ValueClass, mode: UseMode, loc: Loc) -> Option<UseNote> {
        match &mut self.phase {
            Phase::Lower { cfg, cur, slots } => {
                let slot = *slots;
                *slots += 1;
                cfg.push_action(
                    *cur,
                    Action::Use {
                        name: name.to_string(),
                        class,
                        mode,
                        loc,
                        slot,
                    },
                );
                None
            }
            Phase::Annotate { verdicts, cursor } => {
                let note = verdicts.get(*cursor).and_then(|v| v.note);
                *cursor += 1;
                note
            }
        }
    }

    // Graph shaping happens in the lowering pass only; the annotate pass
    // sees the same events but no blocks.

    fn mark(&self) -> BlockId {
        match &self.phase {
            Phase::Lower { cur, .. } => *cur,
            Phase::Annotate { .. } => BlockId(0),
        }
    }

    fn branch_from(&mut self, from: BlockId) {
        if let Phase::Lower { cfg, cur, .. } = &mut self.phase {
            let block = cfg.add_block();
            cfg.add_edge(from, block);
            *cur = block;
        }
    }

    fn link_new_block(&mut self) -> BlockId {
        match &mut self.phase {
            Phase::Lower { cfg, cur, .. } => {
                let block = cfg.add_block();
                cfg.add_edge(*cur, block);
                *cur = block;
                block
            }
            Phase::Annotate { .. } => BlockId(0),
        }
    }

    fn edge_to(&mut self, to: BlockId) {
        if let Phase::Lower { cfg, cur, .. } = &mut self.phase {
            cfg.add_edge(*cur, to);
        }
    }

    fn join_onto(&mut self, ends: &[BlockId]) {
        if let Phase::Lower { cfg, cur, .. } = &mut self.phase {
            let joined = cfg.add_block();
            for end in ends {
                cfg.add_edge(*end, joined);
            }
            *cur = joined;
        }
    }

    fn walk_block(&mut self, block: &mut CheckedBlock) {
        self.open_scope();
        for stmt in &mut block.stmts {
            self.walk_stmt(stmt);
        }
        if let Some(expr) = &mut block.yield_expr {
            self.walk_expr(expr, UseMode::Consume);
        }
        block.exit_ops = self.close_scope(block.loc);
    }

    fn walk_stmt(&mut self, stmt: &mut CheckedStmt) {
        match stmt {
            CheckedStmt::Let {
                loc,
                name,
                decl_ty,
                value,
                rc_ops,
                ..
            } => {
                self.walk_expr(value, UseMode::Consume);
                let class = decl_ty.value_class();
                let source = refcount_source(value);
                let at = *loc;
                let defined = name.clone();
                *rc_ops = self.emit(move |slot| Action::Define {
                    name: defined,
                    class,
                    source,
                    loc: at,
                    slot,
                });
                self.declare(name, class);
            }
            CheckedStmt::Assign {
                loc,
                target,
                value,
                rc_ops,
            } => {
                self.walk_expr(value, UseMode::Consume);
                let source = refcount_source(value);
                let at = *loc;
                let assigned = target.clone();
                *rc_ops = self.emit(move |slot| Action::Reassign {
                    name: assigned,
                    source,
                    loc: at,
                    slot,
                });
            }
            CheckedStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.walk_expr(cond, UseMode::Read);
                let split = self.mark();
                let mut ends = Vec::new();
                self.branch_from(split);
                self.walk_block(then_block);
                ends.push(self.mark());
                match else_block {
                    Some(block) => {
                        self.branch_from(split);
                        self.walk_block(block);
                        ends.push(self.mark());
                    }
                    None => ends.push(split),
                }
                self.join_onto(&ends);
            }
            CheckedStmt::While { cond, body, .. } => {
                let head = self.link_new_block();
                self.walk_expr(cond, UseMode::Read);
                let after_cond = self.mark();
                self.branch_from(after_cond);
                self.walk_block(body);
                self.edge_to(head);
                self.branch_from(after_cond);
            }
            CheckedStmt::Match {
                scrutinee, arms, ..
            } => {
                self.walk_expr(scrutinee, UseMode::Read);
                let split = self.mark();
                // the not-taken path flows straight to the join
                let mut ends = vec![split];
                for arm in arms.iter_mut() {
                    self.branch_from(split);
                    self.open_scope();
                    let binding = match &arm.pat {
                        Pattern::Binding { name, .. } => Some(name.node.clone()),
                        _ => None,
                    };
                    if let Some(bound) = binding {
                        let class = scrutinee.ty.value_class();
                        // a binding arm takes the scrutinee with it
                        if let CheckedExprKind::Name { name: taken, .. } = &scrutinee.kind {
                            let taken = taken.clone();
                            let _ = self.emit_use(&taken, class, UseMode::Consume, arm.loc);
                        }
                        let source = refcount_source(scrutinee);
                        let at = arm.loc;
                        let defined = bound.clone();
                        arm.rc_ops = self.emit(move |slot| Action::Define {
                            name: defined,
                            class,
                            source,
                            loc: at,
                            slot,
                        });
                        self.declare(&bound, class);
                    }
                    self.walk_block(&mut arm.body);
                    let wrapper_ops = self.close_scope(arm.loc);
                    arm.body.exit_ops.extend(wrapper_ops);
                    ends.push(self.mark());
                }
                self.join_onto(&ends);
            }
            CheckedStmt::Expr { value, rc_ops } => {
                let discards_handle = matches!(value.kind, CheckedExprKind::Call { .. })
                    && matches!(value.ty, Type::Foreign(_));
                self.walk_expr(value, UseMode::Read);
                if discards_handle {
                    let source = refcount_source(value);
                    let at = value.loc;
                    *rc_ops = self.emit(move |slot| Action::Discard {
                        source,
                        loc: at,
                        slot,
                    });
                } else {
                    *rc_ops = Vec::new();
                }
            }
        }
    }

    fn walk_expr(&mut self, expr: &mut CheckedExpr, mode: UseMode) {
        let CheckedExpr { loc, ty, kind } = expr;
        let loc = *loc;
        match kind {
            CheckedExprKind::Name { name, note } => {
                let class = ty.value_class();
                *note = self.emit_use(name, class, mode, loc);
            }
            CheckedExprKind::Int(_)
            | CheckedExprKind::Float(_)
            | CheckedExprKind::Str(_)
            | CheckedExprKind::Bool(_)
            | CheckedExprKind::Unit => {}
            CheckedExprKind::List(items) => {
                for item in items {
                    self.walk_expr(item, UseMode::Consume);
                }
            }
            CheckedExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.walk_expr(key, UseMode::Consume);
                    self.walk_expr(value, UseMode::Consume);
                }
            }
            CheckedExprKind::StructLit { fields, .. } => {
                for (_, value) in fields {
                    self.walk_expr(value, UseMode::Consume);
                }
            }
            CheckedExprKind::Unary { expr, .. } => self.walk_expr(expr, UseMode::Read),
            CheckedExprKind::Binary { left, right, .. } => {
                self.walk_expr(left, UseMode::Read);
                self.walk_expr(right, UseMode::Read);
            }
            CheckedExprKind::Member { base, .. } => self.walk_expr(base, UseMode::Borrow),
            CheckedExprKind::Call { callee, args } => {
                self.walk_expr(callee, UseMode::Read);
                for arg in args {
                    self.walk_expr(arg, UseMode::Consume);
                }
            }
            CheckedExprKind::Lambda { params, body } => self.walk_lambda(params, body, loc),
        }
    }

    fn walk_lambda(&mut self, params: &[CheckedParam], body: &mut CheckedBlock, loc: Loc) {
        // closures capture by value: every free name resolving to an
        // enclosing local is consumed when the closure is built
        let captures: Vec<(String, ValueClass)> = free_names(params, body)
            .into_iter()
            .filter_map(|name| self.class_of(&name).map(|class| (name, class)))
            .collect();
        for (name, class) in &captures {
            let _ = self.emit_use(name, *class, UseMode::Consume, loc);
        }
        // the body runs under its own graph; captured names enter it owned
        if matches!(self.phase, Phase::Annotate { .. }) {
            let entries: Vec<Entry> = params
                .iter()
                .map(|p| (p.name.clone(), p.ty.value_class(), None))
                .chain(
                    captures
                        .into_iter()
                        .map(|(name, class)| (name, class, None)),
                )
                .collect();
            analyze_body(body, &entries, self.module_ledgers, &mut *self.diags);
        }
    }
}

fn outer_scope(entries: &[Entry]) -> Vec<(String, ValueClass)> {
    entries
        .iter()
        .map(|(name, class, _)| (name.clone(), *class))
        .collect()
}

fn analyze_body(
    body: &mut CheckedBlock,
    entries: &[Entry],
    module_ledgers: &HashMap<String, LedgerId>,
    diags: &mut Vec<Diagnostic>,
) {
    let mut lower = BodyPass::lowering(entries, module_ledgers, diags);
    lower.walk_block(body);
    let Phase::Lower { cfg, slots, .. } = lower.phase else {
        return;
    };
    let verdicts = solve(&cfg, entries, module_ledgers, slots, diags);
    let mut annotate = BodyPass::annotating(entries, module_ledgers, diags, verdicts);
    annotate.walk_block(body);
}

/// Free names of a lambda body, in first-use order. A name is free when no
/// parameter, `let`, or arm binding in the body introduces it first.
fn free_names(params: &[CheckedParam], body: &CheckedBlock) -> Vec<String> {
    let mut bound: Vec<Vec<String>> = vec![params.iter().map(|p| p.name.clone()).collect()];
    let mut out = Vec::new();
    free_in_block(body, &mut bound, &mut out);
    out
}

fn free_in_block(block: &CheckedBlock, bound: &mut Vec<Vec<String>>, out: &mut Vec<String>) {
    bound.push(Vec::new());
    for stmt in &block.stmts {
        free_in_stmt(stmt, bound, out);
    }
    if let Some(expr) = &block.yield_expr {
        free_in_expr(expr, bound, out);
    }
    bound.pop();
}

fn free_in_stmt(stmt: &CheckedStmt, bound: &mut Vec<Vec<String>>, out: &mut Vec<String>) {
    match stmt {
        CheckedStmt::Let { name, value, .. } => {
            free_in_expr(value, bound, out);
            if let Some(scope) = bound.last_mut() {
                scope.push(name.clone());
            }
        }
        CheckedStmt::Assign { target, value, .. } => {
            free_in_expr(value, bound, out);
            note_name(target, bound, out);
        }
        CheckedStmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            free_in_expr(cond, bound, out);
            free_in_block(then_block, bound, out);
            if let Some(block) = else_block {
                free_in_block(block, bound, out);
            }
        }
        CheckedStmt::While { cond, body, .. } => {
            free_in_expr(cond, bound, out);
            free_in_block(body, bound, out);
        }
        CheckedStmt::Match {
            scrutinee, arms, ..
        } => {
            free_in_expr(scrutinee, bound, out);
            for arm in arms {
                let binding = match &arm.pat {
                    Pattern::Binding { name, .. } => Some(name.node.clone()),
                    _ => None,
                };
                bound.push(binding.into_iter().collect());
                free_in_block(&arm.body, bound, out);
                bound.pop();
            }
        }
        CheckedStmt::Expr { value, .. } => free_in_expr(value, bound, out),
    }
}

fn free_in_expr(expr: &CheckedExpr, bound: &mut Vec<Vec<String>>, out: &mut Vec<String>) {
    match &expr.kind {
        CheckedExprKind::Name { name, .. } => note_name(name, bound, out),
        CheckedExprKind::Int(_)
        | CheckedExprKind::Float(_)
        | CheckedExprKind::Str(_)
        | CheckedExprKind::Bool(_)
        | CheckedExprKind::Unit => {}
        CheckedExprKind::List(items) => {
            for item in items {
                free_in_expr(item, bound, out);
            }
        }
        CheckedExprKind::Dict(pairs) => {
            for (key, value) in pairs {
                free_in_expr(key, bound, out);
                free_in_expr(value, bound, out);
            }
        }
        CheckedExprKind::StructLit { fields, .. } => {
            for (_, value) in fields {
                free_in_expr(value, bound, out);
            }
        }
        CheckedExprKind::Unary { expr, .. } => free_in_expr(expr, bound, out),
        CheckedExprKind::Binary { left, right, .. } => {
            free_in_expr(left, bound, out);
            free_in_expr(right, bound, out);
        }
        CheckedExprKind::Member { base, .. } => free_in_expr(base, bound, out),
        CheckedExprKind::Call { callee, args } => {
            free_in_expr(callee, bound, out);
            for arg in args {
                free_in_expr(arg, bound, out);
            }
        }
        CheckedExprKind::Lambda { params, body } => {
            bound.push(params.iter().map(|p| p.name.clone()).collect());
            free_in_block(body, bound, out);
            bound.pop();
        }
    }
}

fn note_name(name: &str, bound: &[Vec<String>], out: &mut Vec<String>) {
    let is_bound = bound.iter().any(|scope| scope.iter().any(|n| n == name));
    if !is_bound && !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

/// Entry point: checks every function body, then the module's top-level
/// statements. Fills `UseNote`s, per-statement ledger operations, scope
/// exit releases, and the module teardown releases.
pub fn check_ownership(module: &mut CheckedModule, diags: &mut Vec<Diagnostic>) {
    let mut module_ledgers = HashMap::new();
    let mut handle_entries: Vec<Entry> = Vec::new();
    for item in &module.items {
        if let CheckedItem::ForeignImport(imp) = item {
            for sym in &imp.symbols {
                if let Some(ledger) = sym.ledger {
                    module_ledgers.insert(sym.name.clone(), ledger);
                    handle_entries.push((sym.name.clone(), ValueClass::Refcounted, Some(ledger)));
                }
            }
        }
    }

    for item in &mut module.items {
        if let CheckedItem::Fn(func) = item {
            let entries: Vec<Entry> = func
                .params
                .iter()
                .map(|p| (p.name.clone(), p.ty.value_class(), None))
                .collect();
            analyze_body(&mut func.body, &entries, &module_ledgers, diags);
        }
    }

    let exit_loc = Loc::new(module.file, 0, 0);
    let mut lower = BodyPass::lowering(&handle_entries, &module_ledgers, diags);
    lower.open_scope();
    for item in module.items.iter_mut() {
        if let CheckedItem::Stmt(stmt) = item {
            lower.walk_stmt(stmt);
        }
    }
    let _ = lower.close_scope(exit_loc);
    let Phase::Lower { cfg, slots, .. } = lower.phase else {
        return;
    };
    let verdicts = solve(&cfg, &handle_entries, &module_ledgers, slots, diags);
    let mut annotate = BodyPass::annotating(&handle_entries, &module_ledgers, diags, verdicts);
    annotate.open_scope();
    for item in module.items.iter_mut() {
        if let CheckedItem::Stmt(stmt) = item {
            annotate.walk_stmt(stmt);
        }
    }
    let mut exit_ops = annotate.close_scope(exit_loc);
    // imported handles are released last, in import order
    for (_, _, ledger) in &handle_entries {
        if let Some(ledger) = ledger {
            exit_ops.push(RcOp {
                ledger: *ledger,
                kind: RcKind::Release,
                loc: exit_loc,
            });
        }
    }
    module.exit_ops = exit_ops;
}
