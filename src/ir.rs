//! Graph IR for TensorFlow computations.
//!
//! A [`Module`] owns every node, region and function in arenas. Values flow
//! along data edges; every node additionally owns one implicit control token
//! that other nodes may consume to express ordering without a data
//! dependency. Control flow comes in two encodings: functional nodes that
//! name callee functions by symbol, and region nodes that own their branches
//! as nested regions.
//!
//! Region arguments always come in pairs: each data argument is immediately
//! followed by its control token.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::attr::{Attr, AttrDict};
use crate::control_flow::CfFamily;
use crate::symbol::{Interner, Symbol, SymbolTable};
use crate::types::{ElementType, FunctionType, Type};

// ─── Arena and ID types ─────────────────────────────────────────────────────

/// Index of a `T` in an [`Arena<T>`]. Typed so a node id cannot index the
/// region arena.
pub struct Id<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

// `T` is only a marker, so none of these may require anything of it.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Id<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Append-only storage. Erased nodes stay allocated, detached from their
/// region, so ids never dangle.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: T) -> Id<T> {
        let id = Id::new(self.items.len() as u32);
        self.items.push(item);
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id<T>, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }
}

impl<T> std::ops::Index<Id<T>> for Arena<T> {
    type Output = T;
    fn index(&self, id: Id<T>) -> &T {
        &self.items[id.index()]
    }
}

impl<T> std::ops::IndexMut<Id<T>> for Arena<T> {
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        &mut self.items[id.index()]
    }
}

// ─── Type aliases ───────────────────────────────────────────────────────────

pub type NodeId = Id<Node>;
pub type RegionId = Id<Region>;
pub type FuncId = Id<Function>;

// ─── Values ─────────────────────────────────────────────────────────────────

/// A reference to one data result of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub node: NodeId,
    pub index: u16,
}

/// A reference to a region argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionArgRef {
    pub region: RegionId,
    pub index: u16,
}

/// Something an operand can point at.
///
/// Edges are stored inline in the consumer: every operand names exactly one
/// producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// A data result of a node.
    Result(OutputRef),
    /// The control token of a node.
    Control(NodeId),
    /// A region argument, data or control depending on the region's signature.
    Arg(RegionArgRef),
}

/// Most results a node, or arguments a region, may have. Port index
/// `u16::MAX` is never valid.
pub const MAX_PORTS: usize = u16::MAX as usize;

/// Indices past [`MAX_PORTS`] collapse onto `u16::MAX`, which names no port,
/// instead of wrapping onto a real one.
fn port(index: usize) -> u16 {
    u16::try_from(index).unwrap_or(u16::MAX)
}

impl Value {
    pub fn result(node: NodeId, index: usize) -> Self {
        Value::Result(OutputRef {
            node,
            index: port(index),
        })
    }

    pub fn control(node: NodeId) -> Self {
        Value::Control(node)
    }

    pub fn arg(region: RegionId, index: usize) -> Self {
        Value::Arg(RegionArgRef {
            region,
            index: port(index),
        })
    }

    /// The node that produces this value, if any.
    pub fn defining_node(self) -> Option<NodeId> {
        match self {
            Value::Result(r) => Some(r.node),
            Value::Control(n) => Some(n),
            Value::Arg(_) => None,
        }
    }
}

/// What a value carries: a typed datum or a control token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortType {
    Data(Type),
    Control,
}

impl PortType {
    pub fn is_control(&self) -> bool {
        matches!(self, PortType::Control)
    }

    pub fn data(&self) -> Option<&Type> {
        match self {
            PortType::Data(t) => Some(t),
            PortType::Control => None,
        }
    }
}

// ─── Region ─────────────────────────────────────────────────────────────────

/// Who owns a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOwner {
    Graph,
    Function(FuncId),
    Node(NodeId),
}

/// A single-block region: arguments entering it and the nodes it contains.
///
/// Function bodies and control-flow regions end in a terminator node; graph
/// regions do not.
#[derive(Debug)]
pub struct Region {
    pub owner: RegionOwner,
    /// Interleaved `[data0, ctl0, data1, ctl1, ...]`.
    pub args: Vec<PortType>,
    /// Nodes in insertion order.
    pub nodes: Vec<NodeId>,
}

impl Region {
    /// Argument list with one (data, control) pair per type.
    pub fn paired_args(types: &[Type]) -> Vec<PortType> {
        types
            .iter()
            .flat_map(|t| [PortType::Data(t.clone()), PortType::Control])
            .collect()
    }

    /// Types of the data arguments, in order.
    pub fn data_arg_types(&self) -> Vec<Type> {
        self.args
            .iter()
            .filter_map(|a| a.data().cloned())
            .collect()
    }

    pub fn data_arg_count(&self) -> usize {
        self.args.iter().filter(|a| !a.is_control()).count()
    }

    /// The last node, when it is a terminator.
    pub fn terminator(&self, nodes: &Arena<Node>) -> Option<NodeId> {
        let last = *self.nodes.last()?;
        nodes[last].kind.is_terminator().then_some(last)
    }
}

// ─── Node ───────────────────────────────────────────────────────────────────

/// Statefulness variant of a control-flow op family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Plain,
    Stateless,
    Stateful,
}

impl Flavor {
    fn prefix(self) -> &'static str {
        match self {
            Flavor::Plain => "",
            Flavor::Stateless => "Stateless",
            Flavor::Stateful => "Stateful",
        }
    }
}

/// The operation a node performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Any TensorFlow op, named as in the op registry. A name that resolves
    /// to a function symbol is a call.
    Op(String),

    /// Function terminator.
    Return,
    /// Region terminator for branches and loop bodies.
    Yield,
    /// Loop-condition terminator: predicate followed by the carried values.
    Condition,
    /// Unpacks one named output from an opaque result in a generic function.
    GetResult,

    /// Functional conditional. Operands: `[cond, args...]`.
    If(Flavor),
    /// Functional multi-way branch. Operands: `[branch_index, args...]`.
    Case(Flavor),
    /// Functional loop. Operands: `[carried...]`.
    While(Flavor),
    /// Functional counted loop. Operands: `[start, limit, delta, carried...]`.
    For,

    /// Region conditional: `then` and `else` regions.
    IfRegion(Flavor),
    /// Region multi-way branch: one region per branch.
    CaseRegion(Flavor),
    /// Region loop: `cond` region ending in `condition`, `body` ending in `yield`.
    WhileRegion(Flavor),
    /// Region counted loop: a single body whose first argument is the index.
    ForRegion,
}

impl NodeKind {
    /// The op name as printed.
    pub fn name(&self) -> String {
        match self {
            NodeKind::Op(name) => name.clone(),
            NodeKind::Return => "return".to_string(),
            NodeKind::Yield => "yield".to_string(),
            NodeKind::Condition => "condition".to_string(),
            NodeKind::GetResult => "get_result".to_string(),
            NodeKind::If(fl) => format!("{}If", fl.prefix()),
            NodeKind::Case(fl) => format!("{}Case", fl.prefix()),
            NodeKind::While(fl) => format!("{}While", fl.prefix()),
            NodeKind::For => "For".to_string(),
            NodeKind::IfRegion(fl) => format!("{}IfRegion", fl.prefix()),
            NodeKind::CaseRegion(fl) => format!("{}CaseRegion", fl.prefix()),
            NodeKind::WhileRegion(fl) => format!("{}WhileRegion", fl.prefix()),
            NodeKind::ForRegion => "ForRegion".to_string(),
        }
    }

    /// Inverse of [`NodeKind::name`]; unknown names become [`NodeKind::Op`].
    pub fn from_name(name: &str) -> NodeKind {
        match name {
            "return" => return NodeKind::Return,
            "yield" => return NodeKind::Yield,
            "condition" => return NodeKind::Condition,
            "get_result" => return NodeKind::GetResult,
            "For" => return NodeKind::For,
            "ForRegion" => return NodeKind::ForRegion,
            _ => {}
        }
        let (flavor, rest) = if let Some(rest) = name.strip_prefix("Stateless") {
            (Flavor::Stateless, rest)
        } else if let Some(rest) = name.strip_prefix("Stateful") {
            (Flavor::Stateful, rest)
        } else {
            (Flavor::Plain, name)
        };
        match rest {
            "If" => NodeKind::If(flavor),
            "Case" => NodeKind::Case(flavor),
            "While" => NodeKind::While(flavor),
            "IfRegion" => NodeKind::IfRegion(flavor),
            "CaseRegion" => NodeKind::CaseRegion(flavor),
            "WhileRegion" => NodeKind::WhileRegion(flavor),
            _ => NodeKind::Op(name.to_string()),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, NodeKind::Return | NodeKind::Yield | NodeKind::Condition)
    }

    pub fn is_functional_cf(&self) -> bool {
        matches!(
            self,
            NodeKind::If(_) | NodeKind::Case(_) | NodeKind::While(_) | NodeKind::For
        )
    }

    pub fn is_region_cf(&self) -> bool {
        matches!(
            self,
            NodeKind::IfRegion(_)
                | NodeKind::CaseRegion(_)
                | NodeKind::WhileRegion(_)
                | NodeKind::ForRegion
        )
    }

    /// Control-flow family, for either encoding.
    pub fn family(&self) -> Option<CfFamily> {
        match self {
            NodeKind::If(_) | NodeKind::IfRegion(_) => Some(CfFamily::If),
            NodeKind::Case(_) | NodeKind::CaseRegion(_) => Some(CfFamily::Case),
            NodeKind::While(_) | NodeKind::WhileRegion(_) => Some(CfFamily::While),
            NodeKind::For | NodeKind::ForRegion => Some(CfFamily::For),
            _ => None,
        }
    }

    pub fn flavor(&self) -> Option<Flavor> {
        match self {
            NodeKind::If(fl)
            | NodeKind::Case(fl)
            | NodeKind::While(fl)
            | NodeKind::IfRegion(fl)
            | NodeKind::CaseRegion(fl)
            | NodeKind::WhileRegion(fl) => Some(*fl),
            _ => None,
        }
    }
}

/// A node in a graph, function body or control-flow region.
#[derive(Debug)]
pub struct Node {
    /// The containing region.
    pub parent: RegionId,
    pub kind: NodeKind,
    /// Data operands.
    pub operands: Vec<Value>,
    /// Control-token operands.
    pub control_operands: Vec<Value>,
    pub attrs: AttrDict,
    /// Types of the data results. The control token is implicit.
    pub results: Vec<Type>,
    /// Owned sub-regions (region control flow only).
    pub regions: Vec<RegionId>,
}

// ─── Containers ─────────────────────────────────────────────────────────────

/// Version record of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDef {
    pub producer: i64,
    pub min_consumer: i64,
    pub bad_consumers: Vec<i64>,
}

/// A flat, unordered dataflow graph. Node order carries no meaning.
#[derive(Debug)]
pub struct Graph {
    pub version: VersionDef,
    pub body: RegionId,
}

/// A named, typed, symbol-visible callable region.
#[derive(Debug)]
pub struct Function {
    name: Option<Symbol>,
    ty: FunctionType,
    generic: bool,
    body: RegionId,
    pub arg_attrs: Vec<AttrDict>,
    pub res_attrs: Vec<AttrDict>,
    pub description: Option<String>,
    pub is_stateful: bool,
    pub gradient: Option<Symbol>,
    /// `(argument index, unique id)` pairs for resource arguments.
    pub resource_arg_unique_ids: Vec<(i64, i64)>,
    /// Named control outputs. Only meaningful on generic functions.
    pub control_output: Vec<String>,
}

impl Function {
    pub fn name(&self) -> Option<Symbol> {
        self.name
    }

    pub fn function_type(&self) -> &FunctionType {
        &self.ty
    }

    pub fn is_generic(&self) -> bool {
        self.generic
    }

    pub fn body(&self) -> RegionId {
        self.body
    }

    /// Output names declared through `tfg.name` result attributes.
    pub fn result_name(&self, index: usize) -> Option<&str> {
        self.res_attrs.get(index)?.get("tfg.name")?.as_str()
    }
}

/// Which top-level entity a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Graph,
    Function(FuncId),
}

/// Owner of all IR: nodes, regions, functions, the optional graph and the
/// symbol interner.
#[derive(Debug)]
pub struct Module {
    pub nodes: Arena<Node>,
    pub regions: Arena<Region>,
    pub funcs: Arena<Function>,
    graph: Option<Graph>,
    functions: Vec<FuncId>,
    interner: Interner,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            regions: Arena::new(),
            funcs: Arena::new(),
            graph: None,
            functions: Vec::new(),
            interner: Interner::new(),
        }
    }

    // ── Symbols ─────────────────────────────────────────────────────

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.interner.intern(name)
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn symbol_name(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    // ── Graph ───────────────────────────────────────────────────────

    /// Create (or replace) the module's graph. Returns its body region.
    pub fn create_graph(&mut self, version: VersionDef) -> RegionId {
        let body = self.regions.push(Region {
            owner: RegionOwner::Graph,
            args: Vec::new(),
            nodes: Vec::new(),
        });
        self.graph = Some(Graph { version, body });
        body
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut Graph> {
        self.graph.as_mut()
    }

    // ── Functions ───────────────────────────────────────────────────

    /// Create an empty function: no name, no signature, no attributes.
    pub fn create_function(&mut self) -> FuncId {
        let id = FuncId::new(self.funcs.len() as u32);
        let body = self.regions.push(Region {
            owner: RegionOwner::Function(id),
            args: Vec::new(),
            nodes: Vec::new(),
        });
        let pushed = self.funcs.push(Function {
            name: None,
            ty: FunctionType::default(),
            generic: false,
            body,
            arg_attrs: Vec::new(),
            res_attrs: Vec::new(),
            description: None,
            is_stateful: false,
            gradient: None,
            resource_arg_unique_ids: Vec::new(),
            control_output: Vec::new(),
        });
        debug_assert_eq!(pushed, id);
        self.functions.push(id);
        id
    }

    /// Live functions in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.functions.iter().copied()
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.funcs[id]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id]
    }

    pub fn set_function_name(&mut self, id: FuncId, name: Symbol) {
        self.funcs[id].name = Some(name);
    }

    /// Set the signature and rebuild the body's paired arguments.
    ///
    /// Panics if the body already holds nodes: they may reference the old
    /// arguments.
    pub fn set_function_type(&mut self, id: FuncId, ty: FunctionType) {
        let body = self.funcs[id].body;
        assert!(
            self.regions[body].nodes.is_empty(),
            "cannot change the signature of a function whose body has nodes"
        );
        self.regions[body].args = Region::paired_args(&ty.inputs);
        let func = &mut self.funcs[id];
        func.arg_attrs.resize_with(ty.inputs.len(), AttrDict::new);
        func.res_attrs.resize_with(ty.results.len(), AttrDict::new);
        func.ty = ty;
    }

    /// Mark a function generic (or not). Only legal while the body is empty.
    pub fn set_generic(&mut self, id: FuncId, generic: bool) {
        let body = self.funcs[id].body;
        assert!(
            self.regions[body].nodes.is_empty(),
            "the generic flag is fixed once the body has nodes"
        );
        self.funcs[id].generic = generic;
    }

    /// Drop a function from the module. Symbol references to it dangle.
    pub fn remove_function(&mut self, id: FuncId) {
        self.functions.retain(|&f| f != id);
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        let sym = self.interner.get(name)?;
        self.functions
            .iter()
            .copied()
            .find(|&f| self.funcs[f].name == Some(sym))
    }

    /// The function a call-style node invokes, if it resolves.
    ///
    /// A node calls a function when its op name is a function symbol, or when
    /// it is a `PartitionedCall`/`StatefulPartitionedCall` whose `f` attribute
    /// names one.
    pub fn get_called_function(&self, node: NodeId, symbols: &SymbolTable) -> Option<FuncId> {
        let node = &self.nodes[node];
        let NodeKind::Op(name) = &node.kind else {
            return None;
        };
        let sym = match name.as_str() {
            "PartitionedCall" | "StatefulPartitionedCall" => node.attrs.get("f")?.as_symbol()?,
            _ => self.interner.get(name)?,
        };
        symbols.lookup(sym)
    }

    // ── Regions and nodes ───────────────────────────────────────────

    pub fn new_region(&mut self, owner: RegionOwner, args: Vec<PortType>) -> RegionId {
        self.regions.push(Region {
            owner,
            args,
            nodes: Vec::new(),
        })
    }

    /// Append a node to the end of `node.parent`.
    pub fn push_node(&mut self, node: Node) -> NodeId {
        let region = node.parent;
        let id = self.nodes.push(node);
        self.regions[region].nodes.push(id);
        id
    }

    /// Insert a node into `anchor`'s region right before `anchor`.
    pub fn insert_node_before(&mut self, anchor: NodeId, mut node: Node) -> NodeId {
        let region = self.nodes[anchor].parent;
        node.parent = region;
        let id = self.nodes.push(node);
        let nodes = &mut self.regions[region].nodes;
        let pos = nodes.iter().position(|&n| n == anchor).unwrap_or(nodes.len());
        nodes.insert(pos, id);
        id
    }

    /// Move an attached node so it sits right before `anchor` in the same
    /// region.
    pub fn move_node_before(&mut self, node: NodeId, anchor: NodeId) {
        let region = self.nodes[anchor].parent;
        debug_assert_eq!(self.nodes[node].parent, region);
        let nodes = &mut self.regions[region].nodes;
        nodes.retain(|&n| n != node);
        let pos = nodes.iter().position(|&n| n == anchor).unwrap_or(nodes.len());
        nodes.insert(pos, node);
    }

    /// Detach a node from its region. Uses of its values must already be gone.
    pub fn erase_node(&mut self, node: NodeId) {
        let region = self.nodes[node].parent;
        self.regions[region].nodes.retain(|&n| n != node);
    }

    /// Whether the node is still attached to its region.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let region = self.nodes[node].parent;
        self.regions[region].nodes.contains(&node)
    }

    /// Visit every node under `region` in pre-order (a node before the nodes
    /// of its own regions).
    pub fn walk_nodes(&self, region: RegionId, f: &mut impl FnMut(NodeId)) {
        for &nid in &self.regions[region].nodes {
            f(nid);
            for &sub in &self.nodes[nid].regions {
                self.walk_nodes(sub, f);
            }
        }
    }

    /// Every node under `region`, pre-order.
    pub fn collect_nodes(&self, region: RegionId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk_nodes(region, &mut |n| out.push(n));
        out
    }

    /// The region enclosing `region`, if it is nested in a node.
    pub fn parent_region(&self, region: RegionId) -> Option<RegionId> {
        match self.regions[region].owner {
            RegionOwner::Node(n) => Some(self.nodes[n].parent),
            RegionOwner::Graph | RegionOwner::Function(_) => None,
        }
    }

    /// Whether `ancestor` is `region` or encloses it.
    pub fn region_encloses(&self, ancestor: RegionId, region: RegionId) -> bool {
        let mut cur = Some(region);
        while let Some(r) = cur {
            if r == ancestor {
                return true;
            }
            cur = self.parent_region(r);
        }
        false
    }

    /// The graph or function a region ultimately belongs to.
    pub fn scope_of(&self, region: RegionId) -> Scope {
        let mut cur = region;
        loop {
            match self.regions[cur].owner {
                RegionOwner::Graph => return Scope::Graph,
                RegionOwner::Function(f) => return Scope::Function(f),
                RegionOwner::Node(n) => cur = self.nodes[n].parent,
            }
        }
    }

    pub fn is_in_generic_function(&self, region: RegionId) -> bool {
        match self.scope_of(region) {
            Scope::Function(f) => self.funcs[f].generic,
            Scope::Graph => false,
        }
    }

    // ── Value queries ───────────────────────────────────────────────

    /// Type of a value. `None` when the reference is out of range.
    pub fn value_type(&self, value: Value) -> Option<PortType> {
        match value {
            Value::Result(r) => self.nodes[r.node]
                .results
                .get(r.index as usize)
                .cloned()
                .map(PortType::Data),
            Value::Control(_) => Some(PortType::Control),
            Value::Arg(a) => self.regions[a.region].args.get(a.index as usize).cloned(),
        }
    }

    /// Data type of a value; `None` for control tokens.
    pub fn data_type(&self, value: Value) -> Option<Type> {
        match self.value_type(value)? {
            PortType::Data(t) => Some(t),
            PortType::Control => None,
        }
    }

    pub fn is_control(&self, value: Value) -> bool {
        matches!(self.value_type(value), Some(PortType::Control))
    }

    /// The control token that accompanies a value: a result's node token, or a
    /// data argument's paired control argument.
    pub fn control_of(&self, value: Value) -> Option<Value> {
        match value {
            Value::Result(r) => Some(Value::Control(r.node)),
            Value::Control(_) => Some(value),
            Value::Arg(a) => match self.regions[a.region].args.get(a.index as usize)? {
                PortType::Control => Some(value),
                PortType::Data(_) => {
                    let next = a.index as usize + 1;
                    matches!(
                        self.regions[a.region].args.get(next),
                        Some(PortType::Control)
                    )
                    .then(|| Value::arg(a.region, next))
                }
            },
        }
    }

    /// Rewrite every operand equal to `from` into `to`.
    pub fn replace_all_uses(&mut self, from: Value, to: Value) {
        self.replace_uses(&HashMap::from([(from, to)]));
    }

    /// Apply several replacements in a single pass over all nodes.
    pub fn replace_uses(&mut self, map: &HashMap<Value, Value>) {
        if map.is_empty() {
            return;
        }
        for (_, node) in self.nodes.iter_mut() {
            for v in node.operands.iter_mut().chain(node.control_operands.iter_mut()) {
                if let Some(&to) = map.get(v) {
                    *v = to;
                }
            }
        }
    }

    // ── Builders ────────────────────────────────────────────────────

    /// A builder appending to `region`.
    pub fn builder(&mut self, region: RegionId) -> RegionBuilder<'_> {
        let generic = self.is_in_generic_function(region);
        RegionBuilder {
            module: self,
            region,
            generic,
        }
    }

    /// A builder for a function's body.
    pub fn function_builder(&mut self, id: FuncId) -> RegionBuilder<'_> {
        let body = self.funcs[id].body;
        self.builder(body)
    }

    /// A builder for the graph body, if the module has a graph.
    pub fn graph_builder(&mut self) -> Option<RegionBuilder<'_>> {
        let body = self.graph.as_ref()?.body;
        Some(self.builder(body))
    }
}

// ─── Builder API ────────────────────────────────────────────────────────────

/// An opaque result of a node inside a generic function.
///
/// Only obtainable from [`RegionBuilder::op`] in a generic body, and the only
/// thing [`RegionBuilder::get_result`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpaqueBundle {
    value: Value,
}

impl OpaqueBundle {
    pub fn value(self) -> Value {
        self.value
    }
}

/// Data results of a newly built node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResults {
    Concrete(Vec<Value>),
    Opaque(OpaqueBundle),
}

/// A node built by [`RegionBuilder::op`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpResults {
    pub node: NodeId,
    pub outputs: NodeResults,
}

impl OpResults {
    pub fn control(&self) -> Value {
        Value::Control(self.node)
    }

    /// The `index`th concrete result; `None` in generic bodies.
    pub fn value(&self, index: usize) -> Option<Value> {
        match &self.outputs {
            NodeResults::Concrete(values) => values.get(index).copied(),
            NodeResults::Opaque(_) => None,
        }
    }

    pub fn bundle(&self) -> Option<OpaqueBundle> {
        match self.outputs {
            NodeResults::Opaque(b) => Some(b),
            NodeResults::Concrete(_) => None,
        }
    }
}

/// Builder for adding nodes to a specific region.
pub struct RegionBuilder<'a> {
    module: &'a mut Module,
    region: RegionId,
    generic: bool,
}

impl<'a> RegionBuilder<'a> {
    /// The region this builder targets.
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    pub fn is_generic(&self) -> bool {
        self.generic
    }

    /// The `index`th data argument of the region.
    pub fn arg(&self, index: usize) -> Value {
        Value::arg(self.region, 2 * index)
    }

    /// The control token paired with the `index`th data argument.
    pub fn arg_control(&self, index: usize) -> Value {
        Value::arg(self.region, 2 * index + 1)
    }

    /// All data arguments, in order.
    pub fn args(&self) -> Vec<Value> {
        (0..self.module.regions[self.region].data_arg_count())
            .map(|i| self.arg(i))
            .collect()
    }

    fn nested(&mut self, region: RegionId) -> RegionBuilder<'_> {
        RegionBuilder {
            module: self.module,
            region,
            generic: self.generic,
        }
    }

    fn add_node(
        &mut self,
        kind: NodeKind,
        operands: &[Value],
        controls: &[Value],
        attrs: AttrDict,
        results: Vec<Type>,
    ) -> NodeId {
        self.module.push_node(Node {
            parent: self.region,
            kind,
            operands: operands.to_vec(),
            control_operands: controls.to_vec(),
            attrs,
            results,
            regions: Vec::new(),
        })
    }

    fn types_of(&self, values: &[Value]) -> Vec<Type> {
        values
            .iter()
            .map(|&v| self.module.data_type(v).unwrap_or(Type::Opaque))
            .collect()
    }

    // ── Plain ops ───────────────────────────────────────────────────

    /// Add an op node. In a generic body the node gets a single opaque result
    /// regardless of `result_types`.
    pub fn op(
        &mut self,
        name: &str,
        operands: &[Value],
        controls: &[Value],
        attrs: AttrDict,
        result_types: &[Type],
    ) -> OpResults {
        let results = if self.generic {
            vec![Type::Opaque]
        } else {
            result_types.to_vec()
        };
        let count = results.len();
        let node = self.add_node(NodeKind::from_name(name), operands, controls, attrs, results);
        let outputs = if self.generic {
            NodeResults::Opaque(OpaqueBundle {
                value: Value::result(node, 0),
            })
        } else {
            NodeResults::Concrete((0..count).map(|i| Value::result(node, i)).collect())
        };
        OpResults { node, outputs }
    }

    /// Unpack output `name:number` of an opaque result.
    pub fn get_result(&mut self, bundle: OpaqueBundle, name: &str, number: i64) -> Value {
        let attrs = AttrDict::new()
            .with("name", Attr::Str(name.to_string()))
            .with("number", Attr::Int(number));
        let node = self.add_node(
            NodeKind::GetResult,
            &[bundle.value],
            &[],
            attrs,
            vec![Type::Opaque],
        );
        Value::result(node, 0)
    }

    // ── Terminators ─────────────────────────────────────────────────

    /// Terminate a function body.
    pub fn ret(&mut self, values: &[Value], controls: &[Value]) -> NodeId {
        self.add_node(NodeKind::Return, values, controls, AttrDict::new(), Vec::new())
    }

    /// Terminate a function body, attaching an attribute dictionary (usually
    /// `tfg.name`) to each control output.
    pub fn ret_with_control_attrs(
        &mut self,
        values: &[Value],
        controls: &[(Value, AttrDict)],
    ) -> NodeId {
        let ctls: Vec<Value> = controls.iter().map(|(v, _)| *v).collect();
        let attrs = AttrDict::new().with(
            "control_ret_attrs",
            Attr::Array(controls.iter().map(|(_, d)| Attr::Dict(d.clone())).collect()),
        );
        self.add_node(NodeKind::Return, values, &ctls, attrs, Vec::new())
    }

    pub fn yield_values(&mut self, values: &[Value], controls: &[Value]) -> NodeId {
        self.add_node(NodeKind::Yield, values, controls, AttrDict::new(), Vec::new())
    }

    /// Terminate a loop-condition region.
    pub fn condition(&mut self, pred: Value, carried: &[Value], controls: &[Value]) -> NodeId {
        let mut operands = Vec::with_capacity(carried.len() + 1);
        operands.push(pred);
        operands.extend_from_slice(carried);
        self.add_node(NodeKind::Condition, &operands, controls, AttrDict::new(), Vec::new())
    }

    // ── Region control flow ─────────────────────────────────────────

    fn add_regions(&mut self, node: NodeId, arg_lists: Vec<Vec<PortType>>) -> Vec<RegionId> {
        let regions: Vec<RegionId> = arg_lists
            .into_iter()
            .map(|args| self.module.new_region(RegionOwner::Node(node), args))
            .collect();
        self.module.nodes[node].regions = regions.clone();
        regions
    }

    /// Add an `IfRegion`. Both branches must end in `yield`.
    #[allow(clippy::too_many_arguments)]
    pub fn if_region(
        &mut self,
        flavor: Flavor,
        cond: Value,
        controls: &[Value],
        result_types: &[Type],
        then_branch: impl FnOnce(&mut RegionBuilder<'_>),
        else_branch: impl FnOnce(&mut RegionBuilder<'_>),
    ) -> NodeId {
        let node = self.add_node(
            NodeKind::IfRegion(flavor),
            &[cond],
            controls,
            AttrDict::new(),
            result_types.to_vec(),
        );
        let regions = self.add_regions(node, vec![Vec::new(), Vec::new()]);
        then_branch(&mut self.nested(regions[0]));
        else_branch(&mut self.nested(regions[1]));
        node
    }

    /// Add a `CaseRegion` with `branch_count` branches.
    pub fn case_region(
        &mut self,
        flavor: Flavor,
        index: Value,
        controls: &[Value],
        result_types: &[Type],
        branch_count: usize,
        mut build_branch: impl FnMut(usize, &mut RegionBuilder<'_>),
    ) -> NodeId {
        let node = self.add_node(
            NodeKind::CaseRegion(flavor),
            &[index],
            controls,
            AttrDict::new(),
            result_types.to_vec(),
        );
        let regions = self.add_regions(node, vec![Vec::new(); branch_count]);
        for (i, region) in regions.into_iter().enumerate() {
            build_branch(i, &mut self.nested(region));
        }
        node
    }

    /// Add a `WhileRegion` carrying `init`.
    ///
    /// Both regions receive the carried values as paired arguments. The
    /// condition region must end in `condition(pred, carried...)`, the body in
    /// `yield(carried...)`.
    pub fn while_region(
        &mut self,
        flavor: Flavor,
        init: &[Value],
        controls: &[Value],
        cond: impl FnOnce(&mut RegionBuilder<'_>),
        body: impl FnOnce(&mut RegionBuilder<'_>),
    ) -> NodeId {
        let types = self.types_of(init);
        let node = self.add_node(
            NodeKind::WhileRegion(flavor),
            init,
            controls,
            AttrDict::new(),
            types.clone(),
        );
        let args = Region::paired_args(&types);
        let regions = self.add_regions(node, vec![args.clone(), args]);
        cond(&mut self.nested(regions[0]));
        body(&mut self.nested(regions[1]));
        node
    }

    /// Add a `ForRegion`. The body's first paired argument is the `i32`
    /// iteration index, followed by the carried values.
    #[allow(clippy::too_many_arguments)]
    pub fn for_region(
        &mut self,
        start: Value,
        limit: Value,
        delta: Value,
        init: &[Value],
        controls: &[Value],
        body: impl FnOnce(&mut RegionBuilder<'_>),
    ) -> NodeId {
        let types = self.types_of(init);
        let mut operands = vec![start, limit, delta];
        operands.extend_from_slice(init);
        let node = self.add_node(
            NodeKind::ForRegion,
            &operands,
            controls,
            AttrDict::new(),
            types.clone(),
        );
        let mut body_types = vec![Type::scalar(ElementType::I32)];
        body_types.extend(types);
        let regions = self.add_regions(node, vec![Region::paired_args(&body_types)]);
        body(&mut self.nested(regions[0]));
        node
    }

    // ── Functional control flow ─────────────────────────────────────

    /// Add a functional `If` calling `then_branch` or `else_branch` with `args`.
    #[allow(clippy::too_many_arguments)]
    pub fn functional_if(
        &mut self,
        flavor: Flavor,
        cond: Value,
        args: &[Value],
        controls: &[Value],
        then_branch: Symbol,
        else_branch: Symbol,
        result_types: &[Type],
    ) -> NodeId {
        let mut attrs = signature_attrs("Tin", &self.types_of(args), "Tout", result_types);
        attrs.insert("then_branch", Attr::Symbol(then_branch));
        attrs.insert("else_branch", Attr::Symbol(else_branch));
        if let Some(e) = self.module.data_type(cond).and_then(|t| t.element()) {
            attrs.insert("Tcond", Attr::DType(e));
        }
        let mut operands = vec![cond];
        operands.extend_from_slice(args);
        self.add_node(
            NodeKind::If(flavor),
            &operands,
            controls,
            attrs,
            result_types.to_vec(),
        )
    }

    /// Add a functional `Case` dispatching on `index` over `branches`.
    #[allow(clippy::too_many_arguments)]
    pub fn functional_case(
        &mut self,
        flavor: Flavor,
        index: Value,
        args: &[Value],
        controls: &[Value],
        branches: &[Symbol],
        result_types: &[Type],
    ) -> NodeId {
        let mut attrs = signature_attrs("Tin", &self.types_of(args), "Tout", result_types);
        attrs.insert(
            "branches",
            Attr::Array(branches.iter().map(|&s| Attr::Symbol(s)).collect()),
        );
        let mut operands = vec![index];
        operands.extend_from_slice(args);
        self.add_node(
            NodeKind::Case(flavor),
            &operands,
            controls,
            attrs,
            result_types.to_vec(),
        )
    }

    /// Add a functional `While` looping `body` while `cond` holds.
    pub fn functional_while(
        &mut self,
        flavor: Flavor,
        args: &[Value],
        controls: &[Value],
        cond: Symbol,
        body: Symbol,
    ) -> NodeId {
        let types = self.types_of(args);
        let mut attrs = carried_attrs(&types);
        attrs.insert("cond", Attr::Symbol(cond));
        attrs.insert("body", Attr::Symbol(body));
        attrs.insert("parallel_iterations", Attr::Int(10));
        self.add_node(NodeKind::While(flavor), args, controls, attrs, types)
    }

    /// Add a functional `For` running `body(index, carried...)`.
    #[allow(clippy::too_many_arguments)]
    pub fn functional_for(
        &mut self,
        start: Value,
        limit: Value,
        delta: Value,
        args: &[Value],
        controls: &[Value],
        body: Symbol,
    ) -> NodeId {
        let types = self.types_of(args);
        let mut attrs = carried_attrs(&types);
        attrs.insert("body", Attr::Symbol(body));
        let mut operands = vec![start, limit, delta];
        operands.extend_from_slice(args);
        self.add_node(NodeKind::For, &operands, controls, attrs, types)
    }
}

/// dtype list of `types`, or `None` when any of them is opaque.
pub(crate) fn dtype_list(types: &[Type]) -> Option<Attr> {
    let elements: Option<Vec<ElementType>> = types.iter().map(Type::element).collect();
    elements.map(Attr::dtype_list)
}

/// `output_shapes` hint for `types`, or `None` when any of them is opaque.
pub(crate) fn shape_list(types: &[Type]) -> Option<Attr> {
    types
        .iter()
        .map(|t| t.shape().cloned().map(Attr::Shape))
        .collect::<Option<Vec<_>>>()
        .map(Attr::Array)
}

pub(crate) fn signature_attrs(
    in_key: &str,
    inputs: &[Type],
    out_key: &str,
    outputs: &[Type],
) -> AttrDict {
    let mut attrs = AttrDict::new();
    if let Some(tin) = dtype_list(inputs) {
        attrs.insert(in_key, tin);
    }
    if let Some(tout) = dtype_list(outputs) {
        attrs.insert(out_key, tout);
    }
    if let Some(shapes) = shape_list(outputs) {
        attrs.insert("output_shapes", shapes);
    }
    attrs
}

pub(crate) fn carried_attrs(types: &[Type]) -> AttrDict {
    let mut attrs = AttrDict::new();
    if let Some(t) = dtype_list(types) {
        attrs.insert("T", t);
    }
    if let Some(shapes) = shape_list(types) {
        attrs.insert("output_shapes", shapes);
    }
    attrs
}

// ─── Tests ──────────────────────────────────────────────────────────────────
