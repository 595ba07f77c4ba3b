//! Declarative template rewriting.
//!
//! A [`Pattern`] names the op kinds it replaces and describes the replacement
//! as a static [`Tpl`] tree. Shared sub-expressions go in `locals` and are
//! emitted once. Patterns only fire on nodes whose data operands are all
//! complex-valued tensors, so applicability depends on operand types alone.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::attr::{Attr, AttrDict};
use crate::ir::{Module, Node, NodeId, NodeKind, RegionId, Value};
use crate::types::Type;

// ─── Templates ──────────────────────────────────────────────────────────────

/// How a target op's result type follows from its first operand's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultRule {
    /// Same type as the first operand.
    SameAsOperand,
    /// Real component type of a complex first operand.
    RealPart,
    /// Complex type whose components have the first operand's type.
    ComplexOf,
}

/// An op the templates may emit.
#[derive(Debug)]
pub struct TargetOp {
    pub name: &'static str,
    pub arity: usize,
    pub result: ResultRule,
}

/// A replacement expression.
#[derive(Debug)]
pub enum Tpl {
    /// The matched node's `i`th data operand.
    Operand(usize),
    /// A previously emitted local.
    Local(usize),
    /// A target op applied to sub-expressions.
    Op(&'static TargetOp, &'static [Tpl]),
    /// A splat constant with the type (and shape) of the inner expression.
    ConstantLike(&'static TargetOp, f64, &'static Tpl),
}

/// One rewrite: `roots(operands...)` becomes `result`, after emitting `locals`
/// in order.
#[derive(Debug)]
pub struct Pattern {
    pub name: &'static str,
    /// Op names this pattern replaces.
    pub roots: &'static [&'static str],
    /// Number of data operands the root must have.
    pub arity: usize,
    pub locals: &'static [Tpl],
    pub result: Tpl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A template applies a target op to the wrong number of operands.
    ArityMismatch {
        pattern: &'static str,
        op: &'static str,
        expected: usize,
        found: usize,
    },
    /// `Operand(i)` beyond the pattern's arity.
    OperandOutOfRange { pattern: &'static str, index: usize },
    /// `Local(i)` referring to a local that is not emitted yet.
    LocalOutOfRange { pattern: &'static str, index: usize },
    /// The result must be an emitted op so it can take over the control token.
    ResultNotOp { pattern: &'static str },
    /// Two patterns claim the same root op.
    DuplicateRoot { op: &'static str },
    /// Patterns that feed each other in a cycle would never reach a fixpoint.
    Cycle { pattern: &'static str },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::ArityMismatch {
                pattern,
                op,
                expected,
                found,
            } => write!(
                f,
                "pattern {pattern}: `{op}` takes {expected} operands, template gives {found}"
            ),
            PatternError::OperandOutOfRange { pattern, index } => {
                write!(f, "pattern {pattern}: operand {index} is out of range")
            }
            PatternError::LocalOutOfRange { pattern, index } => {
                write!(f, "pattern {pattern}: local {index} is used before it is defined")
            }
            PatternError::ResultNotOp { pattern } => {
                write!(f, "pattern {pattern}: result must be an emitted op")
            }
            PatternError::DuplicateRoot { op } => {
                write!(f, "more than one pattern rewrites `{op}`")
            }
            PatternError::Cycle { pattern } => {
                write!(f, "pattern {pattern} feeds back into itself")
            }
        }
    }
}

impl std::error::Error for PatternError {}

// ─── Pattern sets ───────────────────────────────────────────────────────────

/// A validated set of patterns, indexed by root op name.
#[derive(Debug)]
pub struct PatternSet {
    patterns: &'static [Pattern],
    by_root: HashMap<&'static str, usize>,
}

impl PatternSet {
    pub fn new(patterns: &'static [Pattern]) -> Result<Self, PatternError> {
        let mut by_root = HashMap::new();
        for (i, p) in patterns.iter().enumerate() {
            for (k, local) in p.locals.iter().enumerate() {
                check_tpl(p, local, k)?;
            }
            check_tpl(p, &p.result, p.locals.len())?;
            if !matches!(p.result, Tpl::Op(..) | Tpl::ConstantLike(..)) {
                return Err(PatternError::ResultNotOp { pattern: p.name });
            }
            for &root in p.roots {
                if by_root.insert(root, i).is_some() {
                    return Err(PatternError::DuplicateRoot { op: root });
                }
            }
        }
        let set = Self { patterns, by_root };
        set.check_acyclic()?;
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The pattern rewriting `op`, if any.
    pub fn find(&self, op: &str) -> Option<&'static Pattern> {
        self.by_root.get(op).map(|&i| &self.patterns[i])
    }

    /// The pattern that applies to `node`, if any.
    pub fn match_node(&self, module: &Module, node: NodeId) -> Option<&'static Pattern> {
        let n = &module.nodes[node];
        let NodeKind::Op(name) = &n.kind else {
            return None;
        };
        let pattern = self.find(name)?;
        let applies = n.operands.len() == pattern.arity
            && n.results.len() == 1
            && n.regions.is_empty()
            && n.operands.iter().all(|&v| {
                module
                    .data_type(v)
                    .is_some_and(|t| t.is_complex())
            });
        applies.then_some(pattern)
    }

    /// Reject sets where pattern A emits B's root and B (transitively) emits A's.
    fn check_acyclic(&self) -> Result<(), PatternError> {
        let edges: Vec<Vec<usize>> = self
            .patterns
            .iter()
            .map(|p| {
                let mut emitted = HashSet::new();
                p.locals.iter().for_each(|t| emitted_ops(t, &mut emitted));
                emitted_ops(&p.result, &mut emitted);
                let mut targets: Vec<usize> = emitted
                    .into_iter()
                    .filter_map(|op| self.by_root.get(op).copied())
                    .collect();
                targets.sort_unstable();
                targets
            })
            .collect();

        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.patterns.len()];
        fn visit(i: usize, edges: &[Vec<usize>], state: &mut [u8]) -> Option<usize> {
            match state[i] {
                1 => return Some(i),
                2 => return None,
                _ => {}
            }
            state[i] = 1;
            for &j in &edges[i] {
                if let Some(c) = visit(j, edges, state) {
                    return Some(c);
                }
            }
            state[i] = 2;
            None
        }
        for i in 0..self.patterns.len() {
            if let Some(c) = visit(i, &edges, &mut state) {
                return Err(PatternError::Cycle {
                    pattern: self.patterns[c].name,
                });
            }
        }
        Ok(())
    }
}

fn check_tpl(p: &Pattern, t: &Tpl, locals: usize) -> Result<(), PatternError> {
    match t {
        Tpl::Operand(i) if *i >= p.arity => Err(PatternError::OperandOutOfRange {
            pattern: p.name,
            index: *i,
        }),
        Tpl::Local(i) if *i >= locals => Err(PatternError::LocalOutOfRange {
            pattern: p.name,
            index: *i,
        }),
        Tpl::Operand(_) | Tpl::Local(_) => Ok(()),
        Tpl::Op(op, args) => {
            if args.len() != op.arity {
                return Err(PatternError::ArityMismatch {
                    pattern: p.name,
                    op: op.name,
                    expected: op.arity,
                    found: args.len(),
                });
            }
            args.iter().try_for_each(|a| check_tpl(p, a, locals))
        }
        Tpl::ConstantLike(op, _, like) => {
            if op.arity != 1 {
                return Err(PatternError::ArityMismatch {
                    pattern: p.name,
                    op: op.name,
                    expected: op.arity,
                    found: 1,
                });
            }
            check_tpl(p, like, locals)
        }
    }
}

fn emitted_ops(t: &Tpl, out: &mut HashSet<&'static str>) {
    match t {
        Tpl::Operand(_) | Tpl::Local(_) => {}
        Tpl::Op(op, args) => {
            out.insert(op.name);
            args.iter().for_each(|a| emitted_ops(a, out));
        }
        Tpl::ConstantLike(op, _, like) => {
            out.insert(op.name);
            emitted_ops(like, out);
        }
    }
}

// ─── Driver ─────────────────────────────────────────────────────────────────

/// Readers of each value under the rewritten region. Values defined there
/// are only read there, so a replacement touches just the recorded users
/// instead of every node in the module.
#[derive(Default)]
struct Uses {
    users: HashMap<Value, Vec<NodeId>>,
}

impl Uses {
    fn add(&mut self, module: &Module, node: NodeId) {
        let n = &module.nodes[node];
        for &v in n.operands.iter().chain(&n.control_operands) {
            self.users.entry(v).or_default().push(node);
        }
    }

    fn replace(&mut self, module: &mut Module, from: Value, to: Value) {
        let Some(users) = self.users.remove(&from) else {
            return;
        };
        for &user in &users {
            let n = &mut module.nodes[user];
            for v in n.operands.iter_mut().chain(n.control_operands.iter_mut()) {
                if *v == from {
                    *v = to;
                }
            }
        }
        self.users.entry(to).or_default().extend(users);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Nodes replaced.
    pub rewrites: usize,
    /// Nodes created by replacements.
    pub created: usize,
    /// Nodes taken off the worklist.
    pub visited: usize,
}

/// Rewrite every matching node under `region` (nested regions included) until
/// no pattern applies. New nodes go back on the worklist, so a pattern's
/// output may feed another pattern.
pub fn apply_patterns_greedily(
    module: &mut Module,
    region: RegionId,
    patterns: &PatternSet,
) -> RewriteStats {
    let mut stats = RewriteStats::default();
    let mut worklist: VecDeque<NodeId> = module.collect_nodes(region).into();
    let mut uses = Uses::default();
    for &node in &worklist {
        uses.add(module, node);
    }

    while let Some(node) = worklist.pop_front() {
        stats.visited += 1;
        if !module.is_attached(node) {
            continue;
        }
        let Some(pattern) = patterns.match_node(module, node) else {
            continue;
        };
        let Some(created) = rewrite_node(module, &mut uses, node, pattern) else {
            continue;
        };
        tracing::trace!(
            pattern = pattern.name,
            node = node.index(),
            created = created.len(),
            "rewrote node"
        );
        stats.rewrites += 1;
        stats.created += created.len();
        worklist.extend(created);
    }
    stats
}

/// Replace `node` by the pattern's expansion. Returns the new nodes, or `None`
/// (leaving the IR untouched) when the expansion's type would not match the
/// node's declared result.
fn rewrite_node(
    module: &mut Module,
    uses: &mut Uses,
    node: NodeId,
    pattern: &Pattern,
) -> Option<Vec<NodeId>> {
    let operands = module.nodes[node].operands.clone();
    let operand_types: Vec<Type> = operands
        .iter()
        .map(|&v| module.data_type(v))
        .collect::<Option<_>>()?;

    let mut local_types = Vec::with_capacity(pattern.locals.len());
    for t in pattern.locals {
        let ty = infer(t, &operand_types, &local_types)?;
        local_types.push(ty);
    }
    let result_type = infer(&pattern.result, &operand_types, &local_types)?;
    if !result_type.is_compatible_with(&module.nodes[node].results[0]) {
        tracing::trace!(pattern = pattern.name, %result_type, "expansion type mismatch");
        return None;
    }

    let mut emitter = Emitter {
        module,
        anchor: node,
        operands: &operands,
        locals: Vec::with_capacity(pattern.locals.len()),
        created: Vec::new(),
    };
    for t in pattern.locals {
        let local = emitter.emit(t);
        emitter.locals.push(local);
    }
    let (result, _) = emitter.emit(&pattern.result);
    let created = emitter.created;

    let new_node = result.defining_node()?;
    let controls = std::mem::take(&mut module.nodes[node].control_operands);
    module.nodes[new_node].control_operands = controls;
    for &n in created.iter().chain([&new_node]) {
        uses.add(module, n);
    }
    uses.replace(module, Value::result(node, 0), result);
    uses.replace(module, Value::control(node), Value::control(new_node));
    module.erase_node(node);
    Some(created)
}

fn infer(t: &Tpl, operands: &[Type], locals: &[Type]) -> Option<Type> {
    match t {
        Tpl::Operand(i) => operands.get(*i).cloned(),
        Tpl::Local(i) => locals.get(*i).cloned(),
        Tpl::Op(op, args) => {
            let first = infer(args.first()?, operands, locals)?;
            for a in &args[1..] {
                infer(a, operands, locals)?;
            }
            apply_rule(op.result, &first)
        }
        Tpl::ConstantLike(_, _, like) => infer(like, operands, locals),
    }
}

fn apply_rule(rule: ResultRule, ty: &Type) -> Option<Type> {
    match rule {
        ResultRule::SameAsOperand => Some(ty.clone()),
        ResultRule::RealPart => Some(ty.with_element(ty.element()?.complex_part()?)),
        ResultRule::ComplexOf => Some(ty.with_element(ty.element()?.complex_of()?)),
    }
}

struct Emitter<'a> {
    module: &'a mut Module,
    anchor: NodeId,
    operands: &'a [Value],
    locals: Vec<(Value, Type)>,
    created: Vec<NodeId>,
}

impl Emitter<'_> {
    /// Emit `t` before the anchor. Types were checked by [`infer`] already.
    fn emit(&mut self, t: &Tpl) -> (Value, Type) {
        match t {
            Tpl::Operand(i) => {
                let v = self.operands[*i];
                let ty = self.module.data_type(v).unwrap_or(Type::Opaque);
                (v, ty)
            }
            Tpl::Local(i) => self.locals[*i].clone(),
            Tpl::Op(op, args) => {
                let emitted: Vec<(Value, Type)> = args.iter().map(|a| self.emit(a)).collect();
                let ty = apply_rule(op.result, &emitted[0].1).unwrap_or(Type::Opaque);
                let values: Vec<Value> = emitted.into_iter().map(|(v, _)| v).collect();
                self.push(op, values, AttrDict::new(), ty)
            }
            Tpl::ConstantLike(op, value, like) => {
                let (v, ty) = self.emit(like);
                let attrs = AttrDict::new().with("value", Attr::Float(*value));
                self.push(op, vec![v], attrs, ty)
            }
        }
    }

    fn push(&mut self, op: &TargetOp, operands: Vec<Value>, attrs: AttrDict, ty: Type) -> (Value, Type) {
        let parent = self.module.nodes[self.anchor].parent;
        let id = self.module.insert_node_before(
            self.anchor,
            Node {
                parent,
                kind: NodeKind::Op(op.name.to_string()),
                operands,
                control_operands: Vec::new(),
                attrs,
                results: vec![ty.clone()],
                regions: Vec::new(),
            },
        );
        self.created.push(id);
        (Value::result(id, 0), ty)
    }
}
