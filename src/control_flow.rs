//! Shared view over the two control-flow encodings.
//!
//! Functional nodes (`If`, `Case`, `While`, `For`) and region nodes
//! (`IfRegion`, `CaseRegion`, `WhileRegion`, `ForRegion`) describe the same
//! shapes. [`ControlFlowShape`] is what both agree on; [`RegionCf`] adds the
//! queries that only make sense when the branches are nested regions:
//! successor regions, invocation bounds, and the data/control argument
//! pairing of region arguments.

use crate::attr::Attr;
use crate::ir::{Module, NodeId, PortType, RegionArgRef, RegionId, Value};
use crate::symbol::Symbol;
use crate::types::Type;

/// The four control-flow shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfFamily {
    If,
    Case,
    While,
    For,
}

/// What the functional and region forms of a control-flow node agree on.
pub trait ControlFlowShape {
    fn family(&self) -> CfFamily;

    /// Number of branches: callees for the functional form, regions for the
    /// region form. `While` has two (condition and body), `For` one.
    fn branch_count(&self) -> usize;

    /// Number of values threaded through the construct and back out: the
    /// loop-carried values for loops, the results for conditionals.
    fn carried_arity(&self) -> usize;

    fn result_types(&self) -> &[Type];
}

/// Number of leading operands that are not handed to branches.
pub(crate) fn leading_operands(family: CfFamily) -> usize {
    match family {
        CfFamily::If | CfFamily::Case => 1,
        CfFamily::While => 0,
        CfFamily::For => 3,
    }
}

// ─── Functional form ────────────────────────────────────────────────────────

/// Read-only view of a functional control-flow node.
#[derive(Clone, Copy)]
pub struct FunctionalCf<'m> {
    module: &'m Module,
    node: NodeId,
    family: CfFamily,
}

impl<'m> FunctionalCf<'m> {
    /// `None` unless `node` is a functional control-flow node.
    pub fn new(module: &'m Module, node: NodeId) -> Option<Self> {
        let kind = &module.nodes[node].kind;
        if !kind.is_functional_cf() {
            return None;
        }
        Some(Self {
            module,
            node,
            family: kind.family()?,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Attribute keys naming the callees, in branch order.
    pub fn callee_keys(&self) -> &'static [&'static str] {
        match self.family {
            CfFamily::If => &["then_branch", "else_branch"],
            CfFamily::Case => &["branches"],
            CfFamily::While => &["cond", "body"],
            CfFamily::For => &["body"],
        }
    }

    /// Callee symbols in branch order; `None` where an attribute is missing
    /// or malformed.
    pub fn callees(&self) -> Vec<Option<Symbol>> {
        let attrs = &self.module.nodes[self.node].attrs;
        match self.family {
            CfFamily::Case => attrs
                .get("branches")
                .and_then(Attr::as_array)
                .map(|items| items.iter().map(Attr::as_symbol).collect())
                .unwrap_or_default(),
            _ => self
                .callee_keys()
                .iter()
                .map(|k| attrs.get(k).and_then(Attr::as_symbol))
                .collect(),
        }
    }

    /// Operands passed through to the callees.
    pub fn args(&self) -> &'m [Value] {
        let operands = &self.module.nodes[self.node].operands;
        let lead = leading_operands(self.family).min(operands.len());
        &operands[lead..]
    }
}

impl ControlFlowShape for FunctionalCf<'_> {
    fn family(&self) -> CfFamily {
        self.family
    }

    fn branch_count(&self) -> usize {
        self.callees().len()
    }

    fn carried_arity(&self) -> usize {
        match self.family {
            CfFamily::While | CfFamily::For => self.args().len(),
            CfFamily::If | CfFamily::Case => self.result_types().len(),
        }
    }

    fn result_types(&self) -> &[Type] {
        &self.module.nodes[self.node].results
    }
}

// ─── Region form ────────────────────────────────────────────────────────────

/// Where control currently is, relative to a region node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionBranchPoint {
    /// Entering from the enclosing region.
    Parent,
    /// Leaving the region with this index.
    Region(usize),
}

/// Where control may go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSuccessor {
    Region(usize),
    /// Back to the enclosing region: the node's results are defined.
    Parent,
}

/// How many times a region runs per execution of its node. `max: None`
/// means no static bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationBounds {
    pub min: u64,
    pub max: Option<u64>,
}

impl InvocationBounds {
    pub const AT_MOST_ONCE: Self = Self {
        min: 0,
        max: Some(1),
    };

    pub const NEVER: Self = Self {
        min: 0,
        max: Some(0),
    };

    pub const ONCE: Self = Self {
        min: 1,
        max: Some(1),
    };

    pub fn exactly(n: u64) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub fn unbounded(min: u64) -> Self {
        Self { min, max: None }
    }
}

/// Read-only view of a region control-flow node.
#[derive(Clone, Copy)]
pub struct RegionCf<'m> {
    module: &'m Module,
    node: NodeId,
    family: CfFamily,
}

impl<'m> RegionCf<'m> {
    /// `None` unless `node` is a region control-flow node.
    pub fn new(module: &'m Module, node: NodeId) -> Option<Self> {
        let kind = &module.nodes[node].kind;
        if !kind.is_region_cf() {
            return None;
        }
        Some(Self {
            module,
            node,
            family: kind.family()?,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn regions(&self) -> &'m [RegionId] {
        &self.module.nodes[self.node].regions
    }

    /// Initial values of the loop-carried state (loops only).
    pub fn init_values(&self) -> &'m [Value] {
        let operands = &self.module.nodes[self.node].operands;
        let lead = leading_operands(self.family).min(operands.len());
        match self.family {
            CfFamily::While | CfFamily::For => &operands[lead..],
            CfFamily::If | CfFamily::Case => &[],
        }
    }

    /// Possible next regions from `point`.
    ///
    /// `constants` holds statically known values, indexed like the operands
    /// of the node when `point` is [`RegionBranchPoint::Parent`], and like
    /// the operands of the region's terminator otherwise (so for a `While`
    /// condition region, index 0 is the predicate). Unknown entries are
    /// `None`; without knowledge every structurally possible successor is
    /// returned.
    pub fn successor_regions(
        &self,
        point: RegionBranchPoint,
        constants: &[Option<Attr>],
    ) -> Vec<RegionSuccessor> {
        let constant = |i: usize| constants.get(i).and_then(Option::as_ref);
        let count = self.regions().len();
        match (self.family, point) {
            (CfFamily::If, RegionBranchPoint::Parent) => {
                match constant(0).and_then(Attr::truthiness) {
                    Some(true) => vec![RegionSuccessor::Region(0)],
                    Some(false) => vec![RegionSuccessor::Region(1)],
                    None => vec![RegionSuccessor::Region(0), RegionSuccessor::Region(1)],
                }
            }
            (CfFamily::Case, RegionBranchPoint::Parent) => {
                match constant(0).and_then(Attr::as_int) {
                    Some(_) if count == 0 => vec![RegionSuccessor::Parent],
                    Some(index) => vec![RegionSuccessor::Region(case_branch(index, count))],
                    None => (0..count).map(RegionSuccessor::Region).collect(),
                }
            }
            (CfFamily::If | CfFamily::Case, RegionBranchPoint::Region(_)) => {
                vec![RegionSuccessor::Parent]
            }

            (CfFamily::While, RegionBranchPoint::Parent) => vec![RegionSuccessor::Region(0)],
            (CfFamily::While, RegionBranchPoint::Region(0)) => {
                match constant(0).and_then(Attr::truthiness) {
                    Some(true) => vec![RegionSuccessor::Region(1)],
                    Some(false) => vec![RegionSuccessor::Parent],
                    None => vec![RegionSuccessor::Region(1), RegionSuccessor::Parent],
                }
            }
            (CfFamily::While, RegionBranchPoint::Region(_)) => vec![RegionSuccessor::Region(0)],

            (CfFamily::For, RegionBranchPoint::Parent) => match self.trip_count(constants) {
                Some(0) => vec![RegionSuccessor::Parent],
                Some(_) => vec![RegionSuccessor::Region(0)],
                None => vec![RegionSuccessor::Region(0), RegionSuccessor::Parent],
            },
            (CfFamily::For, RegionBranchPoint::Region(_)) => {
                vec![RegionSuccessor::Region(0), RegionSuccessor::Parent]
            }
        }
    }

    /// Per-region invocation bounds for one execution of the node.
    ///
    /// `constants` is indexed like the node's operands.
    pub fn invocation_bounds(&self, constants: &[Option<Attr>]) -> Vec<InvocationBounds> {
        let constant = |i: usize| constants.get(i).and_then(Option::as_ref);
        let count = self.regions().len();
        match self.family {
            CfFamily::If => match constant(0).and_then(Attr::truthiness) {
                Some(taken) => {
                    let (then_b, else_b) = if taken {
                        (InvocationBounds::ONCE, InvocationBounds::NEVER)
                    } else {
                        (InvocationBounds::NEVER, InvocationBounds::ONCE)
                    };
                    vec![then_b, else_b]
                }
                None => vec![InvocationBounds::AT_MOST_ONCE; count],
            },
            CfFamily::Case => match constant(0).and_then(Attr::as_int) {
                Some(index) => {
                    let taken = case_branch(index, count);
                    (0..count)
                        .map(|i| {
                            if i == taken {
                                InvocationBounds::ONCE
                            } else {
                                InvocationBounds::NEVER
                            }
                        })
                        .collect()
                }
                None => vec![InvocationBounds::AT_MOST_ONCE; count],
            },
            CfFamily::While => vec![InvocationBounds::unbounded(1), InvocationBounds::unbounded(0)],
            CfFamily::For => match self.trip_count(constants) {
                Some(n) => vec![InvocationBounds::exactly(n)],
                None => vec![InvocationBounds::unbounded(0)],
            },
        }
    }

    /// Statically known iteration count of a `For`, given constant
    /// `start`/`limit`/`delta` operands.
    fn trip_count(&self, constants: &[Option<Attr>]) -> Option<u64> {
        let int = |i: usize| constants.get(i)?.as_ref()?.as_int();
        let (start, limit, delta) = (int(0)?, int(1)?, int(2)?);
        if delta == 0 {
            return None;
        }
        let span = limit.checked_sub(start)?;
        if span == 0 || (span > 0) != (delta > 0) {
            return Some(0);
        }
        let (span, step) = (span.unsigned_abs(), delta.unsigned_abs());
        Some(span.div_ceil(step))
    }
}

impl ControlFlowShape for RegionCf<'_> {
    fn family(&self) -> CfFamily {
        self.family
    }

    fn branch_count(&self) -> usize {
        self.regions().len()
    }

    fn carried_arity(&self) -> usize {
        match self.family {
            CfFamily::While | CfFamily::For => self.init_values().len(),
            CfFamily::If | CfFamily::Case => self.result_types().len(),
        }
    }

    fn result_types(&self) -> &[Type] {
        &self.module.nodes[self.node].results
    }
}

/// The branch a `Case` index selects: out-of-range (including negative)
/// indices select the last branch.
pub fn case_branch(index: i64, branch_count: usize) -> usize {
    match usize::try_from(index) {
        Ok(i) if i < branch_count => i,
        _ => branch_count.saturating_sub(1),
    }
}

// ─── Argument pairing ───────────────────────────────────────────────────────

fn region_arg(module: &Module, value: Value) -> Option<(RegionArgRef, &PortType)> {
    let Value::Arg(a) = value else {
        return None;
    };
    let port = module.regions[a.region].args.get(a.index as usize)?;
    Some((a, port))
}

/// The control argument paired with a data argument.
pub fn paired_control(module: &Module, data: Value) -> Option<Value> {
    let (a, port) = region_arg(module, data)?;
    if port.is_control() {
        return None;
    }
    let next = a.index as usize + 1;
    matches!(
        module.regions[a.region].args.get(next),
        Some(PortType::Control)
    )
    .then(|| Value::arg(a.region, next))
}

/// The data argument paired with a control argument.
pub fn paired_data(module: &Module, control: Value) -> Option<Value> {
    let (a, port) = region_arg(module, control)?;
    if !port.is_control() || a.index == 0 {
        return None;
    }
    let prev = a.index as usize - 1;
    matches!(
        module.regions[a.region].args.get(prev),
        Some(PortType::Data(_))
    )
    .then(|| Value::arg(a.region, prev))
}

/// The `n`th data argument of a region.
pub fn data_arg(module: &Module, region: RegionId, n: usize) -> Option<Value> {
    match module.regions[region].args.get(2 * n)? {
        PortType::Data(_) => Some(Value::arg(region, 2 * n)),
        PortType::Control => None,
    }
}

/// The `n`th control argument of a region.
pub fn control_arg(module: &Module, region: RegionId, n: usize) -> Option<Value> {
    match module.regions[region].args.get(2 * n + 1)? {
        PortType::Control => Some(Value::arg(region, 2 * n + 1)),
        PortType::Data(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrDict;
    use crate::ir::{Flavor, VersionDef};
    use crate::types::ElementType;

    fn i32_scalar() -> Type {
        Type::scalar(ElementType::I32)
    }

    fn build_if(module: &mut Module) -> NodeId {
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b
            .op("Placeholder", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::Bool)])
            .value(0)
            .unwrap();
        b.if_region(
            Flavor::Stateless,
            pred,
            &[],
            &[],
            |t| {
                t.yield_values(&[], &[]);
            },
            |e| {
                e.yield_values(&[], &[]);
            },
        )
    }

    fn build_while(module: &mut Module) -> NodeId {
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let init = b
            .op("Const", &[], &[], AttrDict::new(), &[i32_scalar()])
            .value(0)
            .unwrap();
        b.while_region(
            Flavor::Plain,
            &[init],
            &[],
            |c| {
                let x = c.arg(0);
                let p = c
                    .op("Less", &[x], &[], AttrDict::new(), &[Type::scalar(ElementType::Bool)])
                    .value(0)
                    .unwrap();
                c.condition(p, &[x], &[]);
            },
            |body| {
                let x = body.arg(0);
                body.yield_values(&[x], &[]);
            },
        )
    }

    #[test]
    fn if_region_bounds() {
        let mut module = Module::new();
        let node = build_if(&mut module);
        let cf = RegionCf::new(&module, node).unwrap();

        assert_eq!(
            cf.invocation_bounds(&[]),
            vec![InvocationBounds::AT_MOST_ONCE; 2]
        );
        assert_eq!(
            cf.invocation_bounds(&[Some(Attr::Bool(false))]),
            vec![InvocationBounds::NEVER, InvocationBounds::ONCE]
        );
    }

    #[test]
    fn if_region_successors() {
        let mut module = Module::new();
        let node = build_if(&mut module);
        let cf = RegionCf::new(&module, node).unwrap();

        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Parent, &[None]),
            vec![RegionSuccessor::Region(0), RegionSuccessor::Region(1)]
        );
        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Parent, &[Some(Attr::Bool(true))]),
            vec![RegionSuccessor::Region(0)]
        );
        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Region(1), &[]),
            vec![RegionSuccessor::Parent]
        );
    }

    #[test]
    fn while_region_body_is_unbounded() {
        let mut module = Module::new();
        let node = build_while(&mut module);
        let cf = RegionCf::new(&module, node).unwrap();

        let bounds = cf.invocation_bounds(&[]);
        assert_eq!(bounds[0], InvocationBounds::unbounded(1));
        assert_eq!(bounds[1].max, None);

        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Region(0), &[]),
            vec![RegionSuccessor::Region(1), RegionSuccessor::Parent]
        );
        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Region(0), &[Some(Attr::Bool(false))]),
            vec![RegionSuccessor::Parent]
        );
        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Region(1), &[]),
            vec![RegionSuccessor::Region(0)]
        );
        assert_eq!(cf.carried_arity(), 1);
        assert_eq!(cf.branch_count(), 2);
    }

    #[test]
    fn case_index_out_of_range_takes_last_branch() {
        assert_eq!(case_branch(1, 3), 1);
        assert_eq!(case_branch(3, 3), 2);
        assert_eq!(case_branch(-1, 3), 2);
        assert_eq!(case_branch(0, 0), 0);
    }

    #[test]
    fn empty_case_with_constant_index_returns_to_parent() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let index = b
            .op("Const", &[], &[], AttrDict::new(), &[i32_scalar()])
            .value(0)
            .unwrap();
        let node = b.case_region(Flavor::Plain, index, &[], &[], 0, |_, _| {});
        let cf = RegionCf::new(&module, node).unwrap();

        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Parent, &[Some(Attr::Int(0))]),
            vec![RegionSuccessor::Parent]
        );
        assert!(cf.successor_regions(RegionBranchPoint::Parent, &[None]).is_empty());
        assert!(cf.invocation_bounds(&[Some(Attr::Int(3))]).is_empty());
    }

    #[test]
    fn for_trip_counts() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let c = b
            .op("Const", &[], &[], AttrDict::new(), &[i32_scalar()])
            .value(0)
            .unwrap();
        let node = b.for_region(c, c, c, &[], &[], |body| {
            body.yield_values(&[], &[]);
        });
        let cf = RegionCf::new(&module, node).unwrap();

        let consts = |s, l, d| [Some(Attr::Int(s)), Some(Attr::Int(l)), Some(Attr::Int(d))];
        assert_eq!(
            cf.invocation_bounds(&consts(0, 10, 3)),
            vec![InvocationBounds::exactly(4)]
        );
        assert_eq!(
            cf.invocation_bounds(&consts(10, 0, -5)),
            vec![InvocationBounds::exactly(2)]
        );
        assert_eq!(
            cf.successor_regions(RegionBranchPoint::Parent, &consts(5, 5, 1)),
            vec![RegionSuccessor::Parent]
        );
        assert_eq!(
            cf.invocation_bounds(&[]),
            vec![InvocationBounds::unbounded(0)]
        );
    }

    #[test]
    fn argument_pairing_is_inverse() {
        let mut module = Module::new();
        let node = build_while(&mut module);
        let body = module.nodes[node].regions[1];

        let data = data_arg(&module, body, 0).unwrap();
        let ctl = control_arg(&module, body, 0).unwrap();
        assert_eq!(paired_control(&module, data), Some(ctl));
        assert_eq!(paired_data(&module, ctl), Some(data));
        assert_eq!(paired_control(&module, ctl), None);
        assert_eq!(paired_data(&module, data), None);
        assert_eq!(data_arg(&module, body, 1), None);
    }
}
