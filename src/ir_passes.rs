use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::attr::Attr;
use crate::config::PipelineOptions;
use crate::ir::{FuncId, Module, NodeId, RegionId, RegionOwner, Value};
use crate::lower_complex::lower_complex;
use crate::ops::has_side_effects;
use crate::rewrite::PatternError;
use crate::symbol::SymbolTable;
use crate::verify::{VerifyError, verify_module};

// ─── Dead control sinks ─────────────────────────────────────────────────────

/// Remove side-effect-free nodes whose data results are unused, to a
/// fixpoint. Returns the number of nodes removed.
///
/// Uses of a node's control token do not keep it alive. When a node goes,
/// each non-terminator that waited on its token waits on the node's own
/// control operands instead; `return` and `yield` just drop the token (and
/// the matching `control_ret_attrs` entry).
pub fn eliminate_dead_control_sinks(module: &mut Module, region: RegionId) -> usize {
    let symbols = SymbolTable::build(module);
    let mut removed = 0;
    loop {
        let round = sink_round(module, region, &symbols);
        if round == 0 {
            break;
        }
        removed += round;
    }
    if removed > 0 {
        tracing::debug!(removed, "eliminated dead control sinks");
    }
    removed
}

fn sink_round(module: &mut Module, region: RegionId, symbols: &SymbolTable) -> usize {
    let nodes = module.collect_nodes(region);
    let mut data_used: HashSet<NodeId> = HashSet::new();
    let mut ctl_users: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for &n in &nodes {
        let node = &module.nodes[n];
        for v in &node.operands {
            if let Some(def) = v.defining_node() {
                data_used.insert(def);
            }
        }
        for v in &node.control_operands {
            match *v {
                Value::Control(def) => ctl_users.entry(def).or_default().push(n),
                Value::Result(r) => {
                    data_used.insert(r.node);
                }
                Value::Arg(_) => {}
            }
        }
    }

    let dead: Vec<NodeId> = nodes
        .into_iter()
        .filter(|&n| {
            !module.nodes[n].kind.is_terminator()
                && !data_used.contains(&n)
                && !has_side_effects(module, n, symbols)
        })
        .collect();

    let mut removed = 0;
    for node in dead {
        // An enclosing region node may already be gone.
        if !module.is_attached(node) || !is_reachable(module, node, region) {
            continue;
        }
        let preds = module.nodes[node].control_operands.clone();
        let token = Value::control(node);
        for user in ctl_users.remove(&node).unwrap_or_default() {
            if !module.is_attached(user) {
                continue;
            }
            if module.nodes[user].kind.is_terminator() {
                drop_terminator_control(module, user, token);
            } else {
                forward_control(module, user, token, &preds);
                for p in &preds {
                    if let Value::Control(def) = *p {
                        ctl_users.entry(def).or_default().push(user);
                    }
                }
            }
        }
        tracing::trace!(node = node.index(), op = %module.nodes[node].kind.name(), "removed dead node");
        module.erase_node(node);
        removed += 1;
    }
    removed
}

/// Whether `node` still hangs under `root` through attached region nodes.
fn is_reachable(module: &Module, node: NodeId, root: RegionId) -> bool {
    let mut cur = node;
    loop {
        if !module.is_attached(cur) {
            return false;
        }
        let parent = module.nodes[cur].parent;
        if parent == root {
            return true;
        }
        match module.regions[parent].owner {
            RegionOwner::Node(owner) => cur = owner,
            _ => return false,
        }
    }
}

fn drop_terminator_control(module: &mut Module, user: NodeId, token: Value) {
    let node = &mut module.nodes[user];
    let positions: Vec<usize> = node
        .control_operands
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == token)
        .map(|(i, _)| i)
        .collect();
    let mut ret_attrs = match node.attrs.get("control_ret_attrs") {
        Some(Attr::Array(items)) if items.len() == node.control_operands.len() => {
            Some(items.clone())
        }
        _ => None,
    };
    for &i in positions.iter().rev() {
        node.control_operands.remove(i);
        if let Some(items) = ret_attrs.as_mut() {
            items.remove(i);
        }
    }
    if let Some(items) = ret_attrs {
        node.attrs.insert("control_ret_attrs", Attr::Array(items));
    }
}

fn forward_control(module: &mut Module, user: NodeId, token: Value, preds: &[Value]) {
    let controls = &mut module.nodes[user].control_operands;
    let mut out = Vec::with_capacity(controls.len() + preds.len());
    for &v in controls.iter() {
        if v == token {
            for &p in preds {
                if !out.contains(&p) {
                    out.push(p);
                }
            }
        } else if !out.contains(&v) {
            out.push(v);
        }
    }
    *controls = out;
}

// ─── Pass manager ───────────────────────────────────────────────────────────

/// What a pass runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    Graph,
    Function(FuncId),
}

impl PassTarget {
    fn body(self, module: &Module) -> Option<RegionId> {
        match self {
            PassTarget::Graph => module.graph().map(|g| g.body),
            PassTarget::Function(f) => Some(module.function(f).body()),
        }
    }
}

#[derive(Debug)]
pub enum PassError {
    /// The module did not verify, before the first pass (`pass: None`) or
    /// after the named one.
    Verify {
        pass: Option<&'static str>,
        error: VerifyError,
    },
    /// A pattern set failed validation.
    Pattern(PatternError),
    /// The target has no body in this module.
    MissingTarget(PassTarget),
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassError::Verify { pass: None, error } => {
                write!(f, "input does not verify:\n{error}")
            }
            PassError::Verify {
                pass: Some(pass),
                error,
            } => write!(f, "module does not verify after {pass}:\n{error}"),
            PassError::Pattern(e) => write!(f, "{e}"),
            PassError::MissingTarget(t) => write!(f, "no body for {t:?}"),
        }
    }
}

impl std::error::Error for PassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PassError::Verify { error, .. } => Some(error),
            PassError::Pattern(e) => Some(e),
            PassError::MissingTarget(_) => None,
        }
    }
}

impl From<PatternError> for PassError {
    fn from(e: PatternError) -> Self {
        PassError::Pattern(e)
    }
}

/// A transformation over one graph or function body.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Run over `target`, returning how many changes were made.
    fn run(&self, module: &mut Module, target: PassTarget) -> Result<usize, PassError>;
}

pub struct DeadControlSinkElimination;

impl Pass for DeadControlSinkElimination {
    fn name(&self) -> &'static str {
        "dead-control-sink-elimination"
    }

    fn run(&self, module: &mut Module, target: PassTarget) -> Result<usize, PassError> {
        let body = target.body(module).ok_or(PassError::MissingTarget(target))?;
        Ok(eliminate_dead_control_sinks(module, body))
    }
}

pub struct LowerComplex;

impl Pass for LowerComplex {
    fn name(&self) -> &'static str {
        "lower-complex"
    }

    fn run(&self, module: &mut Module, target: PassTarget) -> Result<usize, PassError> {
        let body = target.body(module).ok_or(PassError::MissingTarget(target))?;
        Ok(lower_complex(module, body)?.rewrites)
    }
}

/// Changes made by one pass over the whole module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: &'static str,
    pub changes: usize,
}

/// Runs passes in order over the graph and every function.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify_each: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default pipeline for `options`: complex lowering first, so sink
    /// elimination also sees the lowered nodes.
    pub fn from_options(options: &PipelineOptions) -> Self {
        let mut pm = Self::new().verify_each(options.verify_each);
        if options.lower_complex {
            pm = pm.add(LowerComplex);
        }
        if options.eliminate_dead_sinks {
            pm = pm.add(DeadControlSinkElimination);
        }
        pm
    }

    pub fn add(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn verify_each(mut self, on: bool) -> Self {
        self.verify_each = on;
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, module: &mut Module) -> Result<Vec<PassReport>, PassError> {
        if self.verify_each {
            self.check(module, None)?;
        }
        let mut targets = Vec::new();
        if module.graph().is_some() {
            targets.push(PassTarget::Graph);
        }
        targets.extend(module.functions().map(PassTarget::Function));

        let mut reports = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let mut changes = 0;
            for &target in &targets {
                let n = pass.run(module, target)?;
                if n > 0 {
                    tracing::trace!(pass = pass.name(), ?target, changes = n, "pass changed target");
                }
                changes += n;
            }
            tracing::debug!(pass = pass.name(), changes, "pass finished");
            if self.verify_each {
                self.check(module, Some(pass.name()))?;
            }
            reports.push(PassReport {
                pass: pass.name(),
                changes,
            });
        }
        Ok(reports)
    }

    fn check(&self, module: &Module, pass: Option<&'static str>) -> Result<(), PassError> {
        verify_module(module).map_err(|error| {
            tracing::warn!(?pass, diagnostics = error.diagnostics.len(), "module failed verification");
            PassError::Verify { pass, error }
        })
    }
}

/// Run the pipeline configured by [`PipelineOptions::from_env`].
pub fn run_default_passes(module: &mut Module) -> Result<Vec<PassReport>, PassError> {
    PassManager::from_options(&PipelineOptions::from_env()).run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrDict;
    use crate::ir::Flavor;
    use crate::types::{ElementType, FunctionType, Type};

    fn f32_scalar() -> Type {
        Type::scalar(ElementType::F32)
    }

    fn function(module: &mut Module, inputs: usize, results: usize) -> FuncId {
        let f = module.create_function();
        let name = module.intern(&format!("f{}", f.index()));
        module.set_function_name(f, name);
        module.set_function_type(
            f,
            FunctionType::new(vec![f32_scalar(); inputs], vec![f32_scalar(); results]),
        );
        f
    }

    fn live_ops(module: &Module, f: FuncId) -> Vec<String> {
        let body = module.function(f).body();
        module
            .collect_nodes(body)
            .into_iter()
            .map(|n| module.nodes[n].kind.name())
            .collect()
    }

    #[test]
    fn control_only_chain_is_removed() {
        let mut module = Module::new();
        let f = function(&mut module, 0, 0);
        let mut b = module.function_builder(f);
        let a = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);
        let bb = b.op("Identity", &[], &[a.control()], AttrDict::new(), &[f32_scalar()]);
        let c = b.op("Identity", &[], &[bb.control()], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[], &[c.control()]);

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 3);
        assert_eq!(live_ops(&module, f), ["return"]);
        let ret = module.regions[body].nodes[0];
        assert!(module.nodes[ret].control_operands.is_empty());
    }

    #[test]
    fn data_use_keeps_node_alive() {
        let mut module = Module::new();
        let f = function(&mut module, 0, 1);
        let mut b = module.function_builder(f);
        let pair = b.op(
            "Unique",
            &[],
            &[],
            AttrDict::new(),
            &[f32_scalar(), Type::scalar(ElementType::I32)],
        );
        let y = pair.value(0).unwrap();
        let sink = b.op("NoOp", &[], &[pair.control()], AttrDict::new(), &[]);
        b.ret(&[y], &[sink.control()]);

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 1);
        assert_eq!(live_ops(&module, f), ["Unique", "return"]);
    }

    #[test]
    fn side_effects_keep_node_alive() {
        let mut module = Module::new();
        let f = function(&mut module, 1, 0);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let p = b.op("Print", &[x], &[], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[], &[p.control()]);

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 0);
        assert_eq!(live_ops(&module, f), ["Print", "return"]);
    }

    #[test]
    fn removed_tokens_forward_to_effectful_users() {
        let mut module = Module::new();
        let f = function(&mut module, 1, 0);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let gate = b.op("Print", &[x], &[], AttrDict::new(), &[f32_scalar()]);
        let mid = b.op("NoOp", &[], &[gate.control()], AttrDict::new(), &[]);
        let out = b.op("Print", &[x], &[mid.control()], AttrDict::new(), &[f32_scalar()]);
        let out_node = out.node;
        b.ret(&[], &[out.control()]);

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 1);
        let gate_node = module.regions[body].nodes[0];
        assert_eq!(
            module.nodes[out_node].control_operands,
            vec![Value::control(gate_node)]
        );
    }

    #[test]
    fn control_ret_attrs_shrink_with_return_controls() {
        let mut module = Module::new();
        let f = function(&mut module, 1, 0);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let keep = b.op("Print", &[x], &[], AttrDict::new(), &[f32_scalar()]);
        let dead = b.op("NoOp", &[], &[], AttrDict::new(), &[]);
        let named = |s: &str| AttrDict::new().with("tfg.name", Attr::Str(s.into()));
        let ret = b.ret_with_control_attrs(
            &[],
            &[(dead.control(), named("dead")), (keep.control(), named("keep"))],
        );

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 1);
        assert_eq!(module.nodes[ret].control_operands, vec![keep.control()]);
        assert_eq!(
            module.nodes[ret].attrs.get("control_ret_attrs"),
            Some(&Attr::Array(vec![Attr::Dict(named("keep"))]))
        );
    }

    #[test]
    fn nested_regions_are_swept() {
        let mut module = Module::new();
        let f = function(&mut module, 1, 1);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let pred = b.op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::Bool)]);
        let cond = pred.value(0).unwrap();
        let node = b.if_region(
            Flavor::Stateless,
            cond,
            &[],
            &[f32_scalar()],
            |t| {
                let dead = t.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);
                t.yield_values(&[x], &[dead.control()]);
            },
            |e| {
                e.yield_values(&[x], &[]);
            },
        );
        b.ret(&[Value::result(node, 0)], &[]);

        let body = module.function(f).body();
        assert_eq!(eliminate_dead_control_sinks(&mut module, body), 1);
        assert_eq!(
            live_ops(&module, f),
            ["Const", "StatelessIfRegion", "yield", "yield", "return"]
        );
    }

    #[test]
    fn pass_manager_verifies_and_reports() {
        let mut module = Module::new();
        let f = function(&mut module, 0, 0);
        let mut b = module.function_builder(f);
        let a = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[], &[a.control()]);

        let pm = PassManager::from_options(&PipelineOptions {
            verify_each: true,
            lower_complex: true,
            eliminate_dead_sinks: true,
        });
        assert_eq!(pm.pass_names(), ["lower-complex", "dead-control-sink-elimination"]);
        let reports = pm.run(&mut module).unwrap();
        assert_eq!(
            reports,
            vec![
                PassReport {
                    pass: "lower-complex",
                    changes: 0
                },
                PassReport {
                    pass: "dead-control-sink-elimination",
                    changes: 1
                },
            ]
        );
    }

    #[test]
    fn pass_manager_rejects_invalid_input() {
        let mut module = Module::new();
        let f = function(&mut module, 0, 1);
        // Missing return.
        module
            .function_builder(f)
            .op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);

        let err = PassManager::new()
            .verify_each(true)
            .add(DeadControlSinkElimination)
            .run(&mut module)
            .unwrap_err();
        assert!(matches!(err, PassError::Verify { pass: None, .. }));
    }
}
