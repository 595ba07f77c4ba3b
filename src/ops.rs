//! Known TensorFlow ops and the side-effect query.
//!
//! The registry only records what the IR layer needs: the declared output
//! arguments (so `get_result` names can be checked in generic functions) and
//! whether the op is stateful. Ops missing from the registry are treated as
//! stateful.

use crate::ir::{Flavor, Module, NodeId, NodeKind, RegionId};
use crate::symbol::SymbolTable;

/// A declared output argument of an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputArg {
    pub name: &'static str,
    /// List outputs expand to several tensors, addressed by number.
    pub is_list: bool,
}

/// Registry entry for one op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDef {
    pub name: &'static str,
    pub stateful: bool,
    pub outputs: &'static [OutputArg],
}

impl OpDef {
    pub fn output(&self, name: &str) -> Option<&OutputArg> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

const fn out(name: &'static str) -> OutputArg {
    OutputArg {
        name,
        is_list: false,
    }
}

const fn list(name: &'static str) -> OutputArg {
    OutputArg {
        name,
        is_list: true,
    }
}

const fn pure(name: &'static str, outputs: &'static [OutputArg]) -> OpDef {
    OpDef {
        name,
        stateful: false,
        outputs,
    }
}

const fn stateful(name: &'static str, outputs: &'static [OutputArg]) -> OpDef {
    OpDef {
        name,
        stateful: true,
        outputs,
    }
}

const Z: &[OutputArg] = &[out("z")];
const Y: &[OutputArg] = &[out("y")];
const OUTPUT: &[OutputArg] = &[out("output")];
const RESULT: &[OutputArg] = &[out("result")];

static OPS: &[OpDef] = &[
    // Sources and plumbing
    pure("Const", OUTPUT),
    pure("Placeholder", OUTPUT),
    pure("Identity", OUTPUT),
    pure("IdentityN", &[list("output")]),
    pure("NoOp", &[]),
    pure("Shape", OUTPUT),
    pure("Fill", OUTPUT),
    pure("Pack", OUTPUT),
    pure("Split", &[list("output")]),
    pure("Unique", &[out("y"), out("idx")]),
    pure("Cast", Y),
    pure("Switch", &[out("output_false"), out("output_true")]),
    pure("Merge", &[out("output"), out("value_index")]),
    // Binary arithmetic and comparison
    pure("Add", Z),
    pure("AddV2", Z),
    pure("Sub", Z),
    pure("Mul", Z),
    pure("Div", Z),
    pure("RealDiv", Z),
    pure("Maximum", Z),
    pure("Minimum", Z),
    pure("Less", Z),
    pure("Greater", Z),
    pure("Equal", Z),
    pure("LogicalAnd", Z),
    // Unary
    pure("Neg", Y),
    pure("Abs", Y),
    pure("Exp", Y),
    pure("Sin", Y),
    pure("Cos", Y),
    pure("Sqrt", Y),
    pure("LogicalNot", Y),
    pure("ComplexAbs", Y),
    pure("Conj", OUTPUT),
    pure("Real", OUTPUT),
    pure("Imag", OUTPUT),
    pure("Complex", &[out("out")]),
    // Stateful
    stateful("Print", OUTPUT),
    stateful("Assert", &[]),
    stateful("VarHandleOp", &[out("resource")]),
    stateful("ReadVariableOp", &[out("value")]),
    stateful("AssignVariableOp", &[]),
    stateful("RandomUniform", OUTPUT),
    stateful("StatefulPartitionedCall", &[list("output")]),
    pure("PartitionedCall", &[list("output")]),
    // Target op library for complex lowering
    pure("hlo.real", RESULT),
    pure("hlo.imag", RESULT),
    pure("hlo.complex", RESULT),
    pure("hlo.add", RESULT),
    pure("hlo.subtract", RESULT),
    pure("hlo.multiply", RESULT),
    pure("hlo.divide", RESULT),
    pure("hlo.negate", RESULT),
    pure("hlo.exponential", RESULT),
    pure("hlo.sine", RESULT),
    pure("hlo.cosine", RESULT),
    pure("hlo.sqrt", RESULT),
    pure("hlo.constant_like", RESULT),
];

/// Look up an op by name.
pub fn lookup(name: &str) -> Option<&'static OpDef> {
    OPS.iter().find(|def| def.name == name)
}

// ─── Effect classification ──────────────────────────────────────────────────

/// Effect classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// No side effects: removable once nothing reads its data.
    Pure,
    /// Has (or may have) side effects.
    Stateful,
}

/// Classify a node.
///
/// Calls take the callee's `is_stateful` marker; an unresolved callee is
/// stateful. Region control flow of the plain flavor is stateful when any
/// node nested in it is. Terminators are never removable and report
/// `Stateful`.
pub fn effect(module: &Module, node: NodeId, symbols: &SymbolTable) -> Effect {
    if is_stateful(module, node, symbols) {
        Effect::Stateful
    } else {
        Effect::Pure
    }
}

pub fn has_side_effects(module: &Module, node: NodeId, symbols: &SymbolTable) -> bool {
    effect(module, node, symbols) == Effect::Stateful
}

fn is_stateful(module: &Module, node: NodeId, symbols: &SymbolTable) -> bool {
    let n = &module.nodes[node];
    match &n.kind {
        NodeKind::Return | NodeKind::Yield | NodeKind::Condition => true,
        NodeKind::GetResult => false,

        NodeKind::If(flavor) | NodeKind::Case(flavor) | NodeKind::While(flavor) => {
            flavor_stateful(*flavor)
        }
        NodeKind::For => true,

        NodeKind::IfRegion(flavor)
        | NodeKind::CaseRegion(flavor)
        | NodeKind::WhileRegion(flavor) => match flavor {
            Flavor::Stateless => false,
            Flavor::Stateful => true,
            Flavor::Plain => regions_stateful(module, &n.regions, symbols),
        },
        NodeKind::ForRegion => regions_stateful(module, &n.regions, symbols),

        NodeKind::Op(name) => {
            if name != "StatefulPartitionedCall"
                && let Some(callee) = module.get_called_function(node, symbols)
            {
                return module.function(callee).is_stateful;
            }
            if name == "PartitionedCall" {
                return true;
            }
            match lookup(name) {
                Some(def) => def.stateful,
                None => true,
            }
        }
    }
}

fn flavor_stateful(flavor: Flavor) -> bool {
    !matches!(flavor, Flavor::Stateless)
}

fn regions_stateful(module: &Module, regions: &[RegionId], symbols: &SymbolTable) -> bool {
    regions.iter().any(|&r| {
        module.regions[r].nodes.iter().any(|&nid| {
            !module.nodes[nid].kind.is_terminator() && is_stateful(module, nid, symbols)
        })
    })
}
