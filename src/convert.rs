//! Conversion between functional and region control flow.
//!
//! [`outline`] turns a region node into its functional counterpart by moving
//! every region into a fresh function; [`inline`] does the reverse by cloning
//! callee bodies into regions. Either way the new node takes the old node's
//! place in its region and inherits every use of its results and control
//! token.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::attr::AttrDict;
use crate::control_flow::{CfFamily, ControlFlowShape, FunctionalCf, RegionCf, leading_operands};
use crate::ir::{
    Flavor, FuncId, Module, Node, NodeId, NodeKind, OutputRef, Region, RegionArgRef, RegionId,
    RegionOwner, Scope, Value,
};
use crate::ops;
use crate::symbol::{Symbol, SymbolTable};
use crate::types::{ElementType, FunctionType, Type};

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The node is not control flow of the expected encoding.
    NotControlFlow { op: String },
    /// Outlining inside a generic function is not supported: captured values
    /// have no concrete type.
    GenericScope,
    /// A functional node references no callee where one is required.
    MissingCallee { attr: &'static str },
    UnresolvedCallee { name: String },
    GenericCallee { name: String },
    CalleeArity {
        name: String,
        expected: usize,
        found: usize,
    },
    MissingTerminator { expected: &'static str },
    /// A `WhileRegion` condition must hand its own arguments to the body.
    ConditionRewritesCarried,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::NotControlFlow { op } => {
                write!(f, "`{op}` is not a convertible control-flow node")
            }
            ConvertError::GenericScope => {
                f.write_str("cannot outline regions inside a generic function")
            }
            ConvertError::MissingCallee { attr } => write!(f, "missing callee attribute `{attr}`"),
            ConvertError::UnresolvedCallee { name } => {
                write!(f, "callee @{name} is not defined")
            }
            ConvertError::GenericCallee { name } => {
                write!(f, "cannot inline generic function @{name}")
            }
            ConvertError::CalleeArity {
                name,
                expected,
                found,
            } => write!(
                f,
                "callee @{name} takes {found} arguments, node passes {expected}"
            ),
            ConvertError::MissingTerminator { expected } => {
                write!(f, "region does not end in `{expected}`")
            }
            ConvertError::ConditionRewritesCarried => f.write_str(
                "loop condition forwards values other than its own arguments",
            ),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Attributes that describe the functional encoding and do not survive
/// inlining.
const FUNCTIONAL_ATTRS: &[&str] = &[
    "then_branch",
    "else_branch",
    "branches",
    "cond",
    "body",
    "Tin",
    "Tout",
    "T",
    "Tcond",
    "output_shapes",
    "parallel_iterations",
];

// ─── Region cloning ─────────────────────────────────────────────────────────

/// State for cloning a region tree.
///
/// Nodes are allocated in a first pass and wired in a second one, so
/// operands may refer to nodes that come later in region order.
#[derive(Default)]
struct CloneCtx {
    /// Explicit substitutions. `None` drops the value (control operands
    /// only).
    value_map: HashMap<Value, Option<Value>>,
    node_map: HashMap<NodeId, NodeId>,
    region_map: HashMap<RegionId, RegionId>,
    cloned: Vec<NodeId>,
}

impl CloneCtx {
    fn remap(&self, value: Value) -> Option<Value> {
        if let Some(&mapped) = self.value_map.get(&value) {
            return mapped;
        }
        Some(match value {
            Value::Result(out) => match self.node_map.get(&out.node) {
                Some(&node) => Value::Result(OutputRef {
                    node,
                    index: out.index,
                }),
                None => value,
            },
            Value::Control(node) => Value::Control(self.node_map.get(&node).copied().unwrap_or(node)),
            Value::Arg(arg) => match self.region_map.get(&arg.region) {
                Some(&region) => Value::Arg(RegionArgRef {
                    region,
                    index: arg.index,
                }),
                None => value,
            },
        })
    }
}

fn allocate_region(module: &mut Module, old_region: RegionId, new_region: RegionId, ctx: &mut CloneCtx) {
    let old_nodes = module.regions[old_region].nodes.clone();
    for old in old_nodes {
        let (kind, attrs, results, subregions) = {
            let n = &module.nodes[old];
            (n.kind.clone(), n.attrs.clone(), n.results.clone(), n.regions.clone())
        };
        let new = module.push_node(Node {
            parent: new_region,
            kind,
            operands: Vec::new(),
            control_operands: Vec::new(),
            attrs,
            results,
            regions: Vec::new(),
        });
        ctx.node_map.insert(old, new);
        ctx.cloned.push(old);

        let mut new_subs = Vec::with_capacity(subregions.len());
        for sub in subregions {
            let args = module.regions[sub].args.clone();
            let new_sub = module.new_region(RegionOwner::Node(new), args);
            ctx.region_map.insert(sub, new_sub);
            allocate_region(module, sub, new_sub, ctx);
            new_subs.push(new_sub);
        }
        module.nodes[new].regions = new_subs;
    }
}

/// Clone the nodes of `old_region` (recursively) into `new_region`.
///
/// Uses of `old_region`'s own arguments must be covered by
/// `ctx.value_map`; values from outside the cloned tree are kept as they
/// are unless mapped.
fn clone_region_into(module: &mut Module, old_region: RegionId, new_region: RegionId, ctx: &mut CloneCtx) {
    allocate_region(module, old_region, new_region, ctx);
    for &old in &ctx.cloned {
        let new = ctx.node_map[&old];
        let operands: Vec<Value> = module.nodes[old]
            .operands
            .iter()
            .map(|&v| ctx.remap(v).unwrap_or(v))
            .collect();
        let mut control_operands: Vec<Value> = Vec::new();
        for &v in &module.nodes[old].control_operands {
            if let Some(mapped) = ctx.remap(v)
                && !control_operands.contains(&mapped)
            {
                control_operands.push(mapped);
            }
        }
        let node = &mut module.nodes[new];
        node.operands = operands;
        node.control_operands = control_operands;
    }
}

/// Point every use of `old`'s results and control token at `new`, then
/// detach `old`.
fn replace_node(module: &mut Module, old: NodeId, new: NodeId) {
    let count = module.nodes[old].results.len();
    let mut map: HashMap<Value, Value> = (0..count)
        .map(|i| (Value::result(old, i), Value::result(new, i)))
        .collect();
    map.insert(Value::control(old), Value::control(new));
    module.replace_uses(&map);
    module.erase_node(old);
}

fn carried_over_attrs(attrs: &AttrDict) -> AttrDict {
    attrs
        .iter()
        .filter(|(k, _)| !FUNCTIONAL_ATTRS.contains(k))
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ─── Outline ────────────────────────────────────────────────────────────────

/// Values a region node uses from outside itself.
struct Captures {
    data: Vec<Value>,
    /// Control tokens not paired with a captured data value. These are
    /// hoisted onto the new node's control operands.
    hoisted: Vec<Value>,
    /// Control tokens that travel with a captured data value, keyed to the
    /// capture's position.
    paired: HashMap<Value, usize>,
}

fn collect_captures(module: &Module, node: NodeId) -> Captures {
    let regions = &module.nodes[node].regions;
    let inside = |v: Value| {
        let def = match v {
            Value::Result(r) => module.nodes[r.node].parent,
            Value::Control(n) => module.nodes[n].parent,
            Value::Arg(a) => a.region,
        };
        regions.iter().any(|&r| module.region_encloses(r, def))
    };

    let mut data = Vec::new();
    let mut controls = Vec::new();
    let mut seen = HashSet::new();
    for &region in regions {
        module.walk_nodes(region, &mut |nid| {
            let n = &module.nodes[nid];
            for &v in &n.operands {
                if !inside(v) && seen.insert(v) {
                    data.push(v);
                }
            }
            for &v in &n.control_operands {
                if !inside(v) && seen.insert(v) {
                    controls.push(v);
                }
            }
        });
    }

    let mut paired = HashMap::new();
    let mut hoisted = Vec::new();
    for c in controls {
        let partner = data
            .iter()
            .position(|&d| module.control_of(d) == Some(c));
        match partner {
            Some(k) => {
                paired.insert(c, k);
            }
            None => hoisted.push(c),
        }
    }
    Captures {
        data,
        hoisted,
        paired,
    }
}

/// Pick a function name based on `base` that no live function uses.
fn fresh_name(module: &mut Module, base: &str) -> Symbol {
    let mut candidate = base.to_string();
    let mut n = 0;
    while module.function_by_name(&candidate).is_some() {
        n += 1;
        candidate = format!("{base}_{n}");
    }
    module.intern(&candidate)
}

/// How a region's terminator becomes a `return`.
#[derive(Clone, Copy)]
enum ExitRewrite {
    /// `yield(v...)` becomes `return(v..., captures...)` when
    /// `forward_captures`, else `return(v...)`.
    Yield { forward_captures: bool },
    /// `condition(pred, ...)` becomes `return(pred)`.
    Condition,
}

struct OutlinePlan<'a> {
    captures: &'a Captures,
    /// Data arguments of the region before the captures.
    leading_args: usize,
}

/// Move one region into a new function named after `base`.
fn outline_region(
    module: &mut Module,
    symbols: &SymbolTable,
    region: RegionId,
    base: &str,
    ty: FunctionType,
    plan: &OutlinePlan<'_>,
    exit: ExitRewrite,
) -> Result<Symbol, ConvertError> {
    let name = fresh_name(module, base);
    let func = module.create_function();
    module.set_function_name(func, name);
    module.set_function_type(func, ty);
    let body = module.function(func).body();

    let mut ctx = CloneCtx::default();
    let region_args = module.regions[region].args.len();
    for j in 0..region_args {
        ctx.value_map.insert(Value::arg(region, j), Some(Value::arg(body, j)));
    }
    let capture_arg = |k: usize| 2 * (plan.leading_args + k);
    for (k, &c) in plan.captures.data.iter().enumerate() {
        ctx.value_map.insert(c, Some(Value::arg(body, capture_arg(k))));
    }
    for (&c, &k) in &plan.captures.paired {
        ctx.value_map.insert(c, Some(Value::arg(body, capture_arg(k) + 1)));
    }
    for &c in &plan.captures.hoisted {
        ctx.value_map.insert(c, None);
    }
    clone_region_into(module, region, body, &mut ctx);

    let term = module.regions[body]
        .terminator(&module.nodes)
        .ok_or(ConvertError::MissingTerminator {
            expected: match exit {
                ExitRewrite::Yield { .. } => "yield",
                ExitRewrite::Condition => "condition",
            },
        })?;
    let t = &mut module.nodes[term];
    match exit {
        ExitRewrite::Yield { forward_captures } => {
            if forward_captures {
                t.operands
                    .extend((0..plan.captures.data.len()).map(|k| Value::arg(body, capture_arg(k))));
            }
        }
        ExitRewrite::Condition => t.operands.truncate(1),
    }
    t.kind = NodeKind::Return;

    let stateful = module.regions[body]
        .nodes
        .iter()
        .any(|&n| !module.nodes[n].kind.is_terminator() && ops::has_side_effects(module, n, symbols));
    module.function_mut(func).is_stateful = stateful;
    Ok(name)
}

/// Every region must end in the terminator outlining rewrites into a
/// `return`. Checked before anything is created.
fn check_exits(module: &Module, family: CfFamily, regions: &[RegionId]) -> Result<(), ConvertError> {
    for (i, &region) in regions.iter().enumerate() {
        let (kind, expected) = if family == CfFamily::While && i == 0 {
            (NodeKind::Condition, "condition")
        } else {
            (NodeKind::Yield, "yield")
        };
        let ends_right = module.regions[region]
            .terminator(&module.nodes)
            .is_some_and(|t| module.nodes[t].kind == kind);
        if !ends_right {
            return Err(ConvertError::MissingTerminator { expected });
        }
    }
    Ok(())
}

fn scope_base(module: &Module, region: RegionId) -> String {
    match module.scope_of(region) {
        Scope::Graph => "graph".to_string(),
        Scope::Function(f) => module
            .function(f)
            .name()
            .map(|s| module.symbol_name(s).to_string())
            .unwrap_or_else(|| "fn".to_string()),
    }
}

/// Replace a region control-flow node with its functional form.
///
/// Values the regions capture from enclosing scopes become explicit
/// arguments (`If`, `Case`) or extra loop-carried values (`While`, `For`).
/// Captured control tokens with no data partner become control operands of
/// the new node. Returns the new node.
pub fn outline(module: &mut Module, node: NodeId) -> Result<NodeId, ConvertError> {
    let family = match RegionCf::new(module, node) {
        Some(cf) => cf.family(),
        None => {
            return Err(ConvertError::NotControlFlow {
                op: module.nodes[node].kind.name(),
            });
        }
    };
    let parent = module.nodes[node].parent;
    if module.is_in_generic_function(parent) {
        return Err(ConvertError::GenericScope);
    }
    let symbols = SymbolTable::build(module);
    let captures = collect_captures(module, node);
    let base = scope_base(module, parent);

    let (kind, operands, controls, attrs, results, regions) = {
        let n = &module.nodes[node];
        (
            n.kind.clone(),
            n.operands.clone(),
            n.control_operands.clone(),
            carried_over_attrs(&n.attrs),
            n.results.clone(),
            n.regions.clone(),
        )
    };
    let capture_types: Vec<Type> = captures
        .data
        .iter()
        .map(|&v| module.data_type(v).unwrap_or(Type::Opaque))
        .collect();
    let mut new_controls = controls;
    for &c in &captures.hoisted {
        if !new_controls.contains(&c) {
            new_controls.push(c);
        }
    }
    if operands.len() < leading_operands(family) {
        return Err(ConvertError::NotControlFlow { op: kind.name() });
    }
    let region_count = match family {
        CfFamily::If | CfFamily::While => Some(2),
        CfFamily::For => Some(1),
        CfFamily::Case => None,
    };
    if region_count.is_some_and(|n| regions.len() != n) {
        return Err(ConvertError::NotControlFlow { op: kind.name() });
    }
    check_exits(module, family, &regions)?;
    let flavor = kind.flavor().unwrap_or(Flavor::Plain);

    let new = match family {
        CfFamily::If | CfFamily::Case => {
            let plan = OutlinePlan {
                captures: &captures,
                leading_args: 0,
            };
            let ty = FunctionType::new(capture_types.clone(), results.clone());
            let mut callees = Vec::with_capacity(regions.len());
            for (i, &region) in regions.iter().enumerate() {
                let label = match (family, i) {
                    (CfFamily::If, 0) => format!("{base}_then"),
                    (CfFamily::If, _) => format!("{base}_else"),
                    _ => format!("{base}_branch{i}"),
                };
                callees.push(outline_region(
                    module,
                    &symbols,
                    region,
                    &label,
                    ty.clone(),
                    &plan,
                    ExitRewrite::Yield {
                        forward_captures: false,
                    },
                )?);
            }
            let mut b = module.builder(parent);
            if family == CfFamily::If {
                b.functional_if(
                    flavor,
                    operands[0],
                    &captures.data,
                    &new_controls,
                    callees[0],
                    callees[1],
                    &results,
                )
            } else {
                b.functional_case(
                    flavor,
                    operands[0],
                    &captures.data,
                    &new_controls,
                    &callees,
                    &results,
                )
            }
        }
        CfFamily::While => {
            let (cond, body) = (regions[0], regions[1]);
            let carried = operands.len();
            let cond_term = module.regions[cond]
                .terminator(&module.nodes)
                .ok_or(ConvertError::MissingTerminator {
                    expected: "condition",
                })?;
            let forwarded = &module.nodes[cond_term].operands;
            let identity = forwarded.len() == carried + 1
                && (0..carried).all(|k| forwarded[k + 1] == Value::arg(cond, 2 * k));
            if !identity {
                return Err(ConvertError::ConditionRewritesCarried);
            }
            let pred_ty = module
                .data_type(forwarded[0])
                .unwrap_or(Type::Opaque);

            let mut state_types = results.clone();
            state_types.extend(capture_types.iter().cloned());
            let plan = OutlinePlan {
                captures: &captures,
                leading_args: carried,
            };
            let cond_sym = outline_region(
                module,
                &symbols,
                cond,
                &format!("{base}_cond"),
                FunctionType::new(state_types.clone(), vec![pred_ty]),
                &plan,
                ExitRewrite::Condition,
            )?;
            let body_sym = outline_region(
                module,
                &symbols,
                body,
                &format!("{base}_body"),
                FunctionType::new(state_types.clone(), state_types),
                &plan,
                ExitRewrite::Yield {
                    forward_captures: true,
                },
            )?;
            let mut init = operands.clone();
            init.extend(captures.data.iter().copied());
            module
                .builder(parent)
                .functional_while(flavor, &init, &new_controls, cond_sym, body_sym)
        }
        CfFamily::For => {
            let body = regions[0];
            let body_types = module.regions[body].data_arg_types();
            let mut inputs = body_types.clone();
            inputs.extend(capture_types.iter().cloned());
            let mut state_types = results.clone();
            state_types.extend(capture_types.iter().cloned());
            let plan = OutlinePlan {
                captures: &captures,
                leading_args: body_types.len(),
            };
            let body_sym = outline_region(
                module,
                &symbols,
                body,
                &format!("{base}_body"),
                FunctionType::new(inputs, state_types),
                &plan,
                ExitRewrite::Yield {
                    forward_captures: true,
                },
            )?;
            let mut init: Vec<Value> = operands[3..].to_vec();
            init.extend(captures.data.iter().copied());
            module.builder(parent).functional_for(
                operands[0],
                operands[1],
                operands[2],
                &init,
                &new_controls,
                body_sym,
            )
        }
    };

    for (k, v) in attrs.iter() {
        module.nodes[new].attrs.insert(k, v.clone());
    }
    module.move_node_before(new, node);
    replace_node(module, node, new);
    debug!(
        old = ?node,
        new = ?new,
        captures = captures.data.len(),
        "outlined {}",
        module.nodes[new].kind.name()
    );
    Ok(new)
}

// ─── Inline ─────────────────────────────────────────────────────────────────

/// How callee arguments map into the new region.
enum ArgSource {
    /// Call operands, visible from the region (branches).
    Operands(Vec<Value>),
    /// The region's own paired arguments (loops).
    RegionArgs,
}

fn resolve_callee(
    module: &Module,
    symbols: &SymbolTable,
    callee: Option<Symbol>,
    attr: &'static str,
) -> Result<FuncId, ConvertError> {
    let sym = callee.ok_or(ConvertError::MissingCallee { attr })?;
    let name = || module.symbol_name(sym).to_string();
    let func = symbols
        .lookup(sym)
        .ok_or_else(|| ConvertError::UnresolvedCallee { name: name() })?;
    if module.function(func).is_generic() {
        return Err(ConvertError::GenericCallee { name: name() });
    }
    Ok(func)
}

/// The callee takes `expected` arguments and its body ends in `return`.
fn check_callee(module: &Module, callee: FuncId, expected: usize) -> Result<(), ConvertError> {
    let f = module.function(callee);
    let found = f.function_type().inputs.len();
    if found != expected {
        return Err(ConvertError::CalleeArity {
            name: f
                .name()
                .map(|s| module.symbol_name(s).to_string())
                .unwrap_or_default(),
            expected,
            found,
        });
    }
    let returns = module.regions[f.body()]
        .terminator(&module.nodes)
        .is_some_and(|t| module.nodes[t].kind == NodeKind::Return);
    if !returns {
        return Err(ConvertError::MissingTerminator { expected: "return" });
    }
    Ok(())
}

/// Clone `callee`'s body into `region`, turning `return` into the region's
/// terminator.
fn inline_body(
    module: &mut Module,
    callee: FuncId,
    region: RegionId,
    args: &ArgSource,
    exit: NodeKind,
) -> Result<(), ConvertError> {
    let body = module.function(callee).body();
    let arity = module.function(callee).function_type().inputs.len();
    let expected = match args {
        ArgSource::Operands(values) => values.len(),
        ArgSource::RegionArgs => module.regions[region].data_arg_count(),
    };
    if arity != expected {
        return Err(ConvertError::CalleeArity {
            name: module
                .function(callee)
                .name()
                .map(|s| module.symbol_name(s).to_string())
                .unwrap_or_default(),
            expected,
            found: arity,
        });
    }

    let mut ctx = CloneCtx::default();
    for k in 0..arity {
        let (data, control) = match args {
            ArgSource::Operands(values) => (values[k], module.control_of(values[k])),
            ArgSource::RegionArgs => (
                Value::arg(region, 2 * k),
                Some(Value::arg(region, 2 * k + 1)),
            ),
        };
        ctx.value_map.insert(Value::arg(body, 2 * k), Some(data));
        ctx.value_map.insert(Value::arg(body, 2 * k + 1), control);
    }
    clone_region_into(module, body, region, &mut ctx);

    let term = module.regions[region]
        .terminator(&module.nodes)
        .filter(|&t| module.nodes[t].kind == NodeKind::Return)
        .ok_or(ConvertError::MissingTerminator { expected: "return" })?;
    let carried: Vec<Value> = (0..module.regions[region].data_arg_count())
        .map(|k| Value::arg(region, 2 * k))
        .collect();
    let t = &mut module.nodes[term];
    t.attrs.remove("control_ret_attrs");
    if exit == NodeKind::Condition {
        t.operands.truncate(1);
        t.operands.extend(carried);
    }
    t.kind = exit;
    Ok(())
}

/// Replace a functional control-flow node with its region form, cloning
/// the callee bodies into the new regions. Returns the new node.
pub fn inline(module: &mut Module, node: NodeId) -> Result<NodeId, ConvertError> {
    let symbols = SymbolTable::build(module);
    let (family, callees, keys) = match FunctionalCf::new(module, node) {
        Some(cf) => (cf.family(), cf.callees(), cf.callee_keys()),
        None => {
            return Err(ConvertError::NotControlFlow {
                op: module.nodes[node].kind.name(),
            });
        }
    };
    if callees.is_empty() {
        return Err(ConvertError::MissingCallee { attr: keys[0] });
    }
    let funcs: Vec<FuncId> = callees
        .iter()
        .enumerate()
        .map(|(i, &c)| resolve_callee(module, &symbols, c, keys[i.min(keys.len() - 1)]))
        .collect::<Result<_, _>>()?;

    let (kind, operands, controls, attrs, results, parent) = {
        let n = &module.nodes[node];
        (
            n.kind.clone(),
            n.operands.clone(),
            n.control_operands.clone(),
            carried_over_attrs(&n.attrs),
            n.results.clone(),
            n.parent,
        )
    };
    if operands.len() < leading_operands(family) {
        return Err(ConvertError::NotControlFlow { op: kind.name() });
    }
    let arity = match family {
        CfFamily::If | CfFamily::Case => operands.len() - 1,
        CfFamily::While => results.len(),
        CfFamily::For => results.len() + 1,
    };
    for &func in &funcs {
        check_callee(module, func, arity)?;
    }
    let flavor = kind.flavor().unwrap_or(Flavor::Plain);
    let (new_kind, new_operands) = match family {
        CfFamily::If => (NodeKind::IfRegion(flavor), operands[..1].to_vec()),
        CfFamily::Case => (NodeKind::CaseRegion(flavor), operands[..1].to_vec()),
        CfFamily::While => (NodeKind::WhileRegion(flavor), operands.clone()),
        CfFamily::For => (NodeKind::ForRegion, operands.clone()),
    };
    let new = module.insert_node_before(
        node,
        Node {
            parent,
            kind: new_kind,
            operands: new_operands,
            control_operands: controls,
            attrs,
            results: results.clone(),
            regions: Vec::new(),
        },
    );

    let mut regions = Vec::with_capacity(funcs.len());
    match family {
        CfFamily::If | CfFamily::Case => {
            let args = ArgSource::Operands(operands[1..].to_vec());
            for &func in &funcs {
                let region = module.new_region(RegionOwner::Node(new), Vec::new());
                inline_body(module, func, region, &args, NodeKind::Yield)?;
                regions.push(region);
            }
        }
        CfFamily::While => {
            let paired = Region::paired_args(&results);
            let cond = module.new_region(RegionOwner::Node(new), paired.clone());
            inline_body(module, funcs[0], cond, &ArgSource::RegionArgs, NodeKind::Condition)?;
            let body = module.new_region(RegionOwner::Node(new), paired);
            inline_body(module, funcs[1], body, &ArgSource::RegionArgs, NodeKind::Yield)?;
            regions.extend([cond, body]);
        }
        CfFamily::For => {
            let index_ty = module
                .function(funcs[0])
                .function_type()
                .inputs
                .first()
                .cloned()
                .unwrap_or_else(|| Type::scalar(ElementType::I32));
            let mut types = vec![index_ty];
            types.extend(results.iter().cloned());
            let body = module.new_region(RegionOwner::Node(new), Region::paired_args(&types));
            inline_body(module, funcs[0], body, &ArgSource::RegionArgs, NodeKind::Yield)?;
            regions.push(body);
        }
    }
    module.nodes[new].regions = regions;

    replace_node(module, node, new);
    debug!(old = ?node, new = ?new, "inlined {}", module.nodes[new].kind.name());
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Attr;
    use crate::ir::VersionDef;
    use crate::verify::{verify_module, verify_symbol_uses};

    fn f32_scalar() -> Type {
        Type::scalar(ElementType::F32)
    }

    fn i32_scalar() -> Type {
        Type::scalar(ElementType::I32)
    }

    fn i1() -> Type {
        Type::scalar(ElementType::Bool)
    }

    #[test]
    fn outline_if_region_turns_captures_into_arguments() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let x = b.op("Placeholder", &[], &[], AttrDict::new(), &[f32_scalar()]);
        let xv = x.value(0).unwrap();
        let side = b.op("NoOp", &[], &[], AttrDict::new(), &[]);
        let side_ctl = side.control();
        let if_node = b.if_region(
            Flavor::Stateless,
            pred,
            &[],
            &[f32_scalar()],
            |t| {
                let n = t.op("Neg", &[xv], &[side_ctl], AttrDict::new(), &[f32_scalar()]);
                t.yield_values(&[n.value(0).unwrap()], &[]);
            },
            |e| {
                e.yield_values(&[xv], &[]);
            },
        );
        let user = b
            .op("Identity", &[Value::result(if_node, 0)], &[Value::control(if_node)], AttrDict::new(), &[f32_scalar()])
            .node;
        assert_eq!(verify_module(&module), Ok(()));

        let new = outline(&mut module, if_node).unwrap();
        assert_eq!(module.nodes[new].kind, NodeKind::If(Flavor::Stateless));
        assert_eq!(module.nodes[new].operands, vec![pred, xv]);
        assert_eq!(module.nodes[new].control_operands, vec![side_ctl]);
        assert_eq!(
            module.nodes[user].operands,
            vec![Value::result(new, 0)]
        );
        assert_eq!(module.nodes[user].control_operands, vec![Value::control(new)]);
        assert!(!module.is_attached(if_node));

        let then_sym = module.nodes[new].attrs.get("then_branch").and_then(Attr::as_symbol).unwrap();
        assert_eq!(module.symbol_name(then_sym), "graph_then");

        let symbols = SymbolTable::build(&module);
        assert_eq!(verify_symbol_uses(&module, new, &symbols), Ok(()));
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn outline_while_region_threads_captures_through_the_loop() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let init = b.op("Const", &[], &[], AttrDict::new(), &[i32_scalar()]).value(0).unwrap();
        let limit = b.op("Const", &[], &[], AttrDict::new(), &[i32_scalar()]).value(0).unwrap();
        let w = b.while_region(
            Flavor::Plain,
            &[init],
            &[],
            |c| {
                let x = c.arg(0);
                let p = c.op("Less", &[x, limit], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
                c.condition(p, &[x], &[]);
            },
            |body| {
                let x = body.arg(0);
                let one = body.op("Const", &[], &[], AttrDict::new(), &[i32_scalar()]).value(0).unwrap();
                let next = body.op("AddV2", &[x, one], &[], AttrDict::new(), &[i32_scalar()]).value(0).unwrap();
                body.yield_values(&[next], &[]);
            },
        );
        assert_eq!(verify_module(&module), Ok(()));

        let new = outline(&mut module, w).unwrap();
        let n = &module.nodes[new];
        assert_eq!(n.kind, NodeKind::While(Flavor::Plain));
        assert_eq!(n.operands, vec![init, limit]);
        assert_eq!(n.results, vec![i32_scalar(), i32_scalar()]);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn inline_then_outline_round_trips_structure() {
        let mut module = Module::new();
        let then_f = module.create_function();
        let then_sym = module.intern("then");
        module.set_function_name(then_f, then_sym);
        module.set_function_type(then_f, FunctionType::new(vec![f32_scalar()], vec![f32_scalar()]));
        {
            let mut b = module.function_builder(then_f);
            let x = b.arg(0);
            let n = b.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);
            b.ret(&[n.value(0).unwrap()], &[]);
        }
        let else_f = module.create_function();
        let else_sym = module.intern("else");
        module.set_function_name(else_f, else_sym);
        module.set_function_type(else_f, FunctionType::new(vec![f32_scalar()], vec![f32_scalar()]));
        {
            let mut b = module.function_builder(else_f);
            let x = b.arg(0);
            b.ret(&[x], &[]);
        }

        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let x = b.op("Placeholder", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        let call = b.functional_if(Flavor::Plain, pred, &[x], &[], then_sym, else_sym, &[f32_scalar()]);
        assert_eq!(verify_module(&module), Ok(()));

        let region_form = inline(&mut module, call).unwrap();
        assert_eq!(module.nodes[region_form].kind, NodeKind::IfRegion(Flavor::Plain));
        assert_eq!(module.nodes[region_form].regions.len(), 2);
        assert_eq!(verify_module(&module), Ok(()));

        let functional = outline(&mut module, region_form).unwrap();
        assert_eq!(module.nodes[functional].operands, vec![pred, x]);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn failed_inline_leaves_the_module_untouched() {
        let mut module = Module::new();
        let then_f = module.create_function();
        let then_sym = module.intern("t");
        module.set_function_name(then_f, then_sym);
        module.set_function_type(then_f, FunctionType::new(vec![f32_scalar()], vec![f32_scalar()]));
        {
            let mut b = module.function_builder(then_f);
            let x = b.arg(0);
            b.ret(&[x], &[]);
        }
        let else_f = module.create_function();
        let else_sym = module.intern("e");
        module.set_function_name(else_f, else_sym);
        module.set_function_type(else_f, FunctionType::new(vec![], vec![f32_scalar()]));
        {
            let mut b = module.function_builder(else_f);
            let c = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
            b.ret(&[c], &[]);
        }

        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let x = b.op("Placeholder", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        let call = b.functional_if(Flavor::Plain, pred, &[x], &[], then_sym, else_sym, &[f32_scalar()]);

        let before = module.to_string();
        let node_count = module.nodes.len();
        assert_eq!(
            inline(&mut module, call),
            Err(ConvertError::CalleeArity {
                name: "e".into(),
                expected: 1,
                found: 0
            })
        );
        assert_eq!(module.nodes.len(), node_count);
        assert_eq!(module.to_string(), before);
        assert!(module.is_attached(call));
    }

    #[test]
    fn failed_outline_creates_no_functions() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let x = b.op("Placeholder", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        let if_node = b.if_region(
            Flavor::Plain,
            pred,
            &[],
            &[f32_scalar()],
            |t| {
                t.yield_values(&[x], &[]);
            },
            |e| {
                e.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);
            },
        );

        let before = module.to_string();
        assert_eq!(
            outline(&mut module, if_node),
            Err(ConvertError::MissingTerminator { expected: "yield" })
        );
        assert_eq!(module.functions().count(), 0);
        assert_eq!(module.to_string(), before);
        assert!(module.is_attached(if_node));
    }

    #[test]
    fn inline_rejects_generic_callees() {
        let mut module = Module::new();
        let body_f = module.create_function();
        let sym = module.intern("body");
        module.set_function_name(body_f, sym);
        module.set_generic(body_f, true);
        module.set_function_type(body_f, FunctionType::new(vec![Type::Opaque], vec![Type::Opaque]));

        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let c = b.op("Const", &[], &[], AttrDict::new(), &[i32_scalar()]).value(0).unwrap();
        let for_node = b.functional_for(c, c, c, &[], &[], sym);

        assert_eq!(
            inline(&mut module, for_node),
            Err(ConvertError::GenericCallee {
                name: "body".into()
            })
        );
    }
}
