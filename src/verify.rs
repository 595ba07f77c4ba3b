//! Structural and symbol-use verification.
//!
//! Verification never fixes anything: it walks the IR and collects one
//! [`Diagnostic`] per violated invariant, each naming the scope, node and op
//! it was found on. A module with diagnostics must not be treated as
//! well-formed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::attr::Attr;
use crate::control_flow::{CfFamily, ControlFlowShape, FunctionalCf, leading_operands};
use crate::ir::{FuncId, MAX_PORTS, Module, NodeId, NodeKind, RegionId, RegionOwner, Scope, Value};
use crate::ops;
use crate::symbol::{Symbol, SymbolTable};
use crate::types::{ElementType, Type};

// ─── Errors ─────────────────────────────────────────────────────────────────

/// What went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyErrorKind {
    OperandCount {
        expected: usize,
        found: usize,
    },
    ResultCount {
        expected: usize,
        found: usize,
    },
    OperandType {
        index: usize,
        expected: Type,
        found: Type,
    },
    ResultType {
        index: usize,
        expected: Type,
        found: Type,
    },
    /// A data operand slot refers to a control token.
    ControlAsData {
        index: usize,
    },
    /// A control operand slot refers to a data value.
    DataAsControl {
        index: usize,
    },
    /// An operand refers to a value that does not exist or is not visible
    /// from the node's region.
    ValueNotInScope {
        index: usize,
        control: bool,
    },
    /// An operand of a function or region body refers to a node that comes
    /// later in the same body.
    UseBeforeDef {
        index: usize,
        control: bool,
    },
    /// The node sits on a cycle of data or control edges in a graph.
    DependencyCycle,
    /// More results or region arguments than a port index can address.
    TooManyPorts {
        found: usize,
    },
    MissingTerminator {
        expected: &'static str,
    },
    WrongTerminator {
        expected: &'static str,
        found: String,
    },
    /// A terminator that is not the last node, or a terminator in a graph.
    UnexpectedTerminator,
    RegionCount {
        expected: usize,
        found: usize,
    },
    RegionArgCount {
        region: usize,
        expected: usize,
        found: usize,
    },
    RegionArgType {
        region: usize,
        index: usize,
        expected: Type,
        found: Type,
    },
    /// Region arguments must alternate data and control.
    UnpairedArgument {
        region: usize,
        index: usize,
    },
    YieldArity {
        region: usize,
        expected: usize,
        found: usize,
    },
    YieldType {
        region: usize,
        index: usize,
        expected: Type,
        found: Type,
    },
    LoopCarriedTypeMismatch {
        index: usize,
        init: Type,
        condition: Type,
        body: Type,
    },
    NonPredicate {
        found: Type,
    },
    NonScalarInteger {
        operand: &'static str,
        found: Type,
    },
    ControlRetAttrsLength {
        expected: usize,
        found: usize,
    },
    OpaqueOutsideGeneric,
    GenericResultCount {
        found: usize,
    },
    GetResultOutsideGeneric,
    GetResultOperand,
    UnknownResultName {
        name: String,
        number: i64,
    },
    ControlOutputOnNonGeneric,
    MissingName,
    DuplicateSymbol {
        name: String,
    },
    UndefinedSymbol {
        name: String,
    },
    MissingAttr {
        name: &'static str,
    },
    AttrListLength {
        attr: &'static str,
        expected: usize,
        found: usize,
    },
    AttrDType {
        attr: &'static str,
        index: usize,
        expected: ElementType,
        found: Type,
    },
    CalleeArity {
        function: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    CalleeType {
        function: String,
        what: &'static str,
        index: usize,
        expected: Type,
        found: Type,
    },
}

impl fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VerifyErrorKind::*;
        match self {
            OperandCount { expected, found } => {
                write!(f, "expected {expected} operands, found {found}")
            }
            ResultCount { expected, found } => {
                write!(f, "expected {expected} results, found {found}")
            }
            OperandType {
                index,
                expected,
                found,
            } => write!(f, "operand #{index}: expected {expected}, found {found}"),
            ResultType {
                index,
                expected,
                found,
            } => write!(f, "result #{index}: expected {expected}, found {found}"),
            ControlAsData { index } => {
                write!(f, "operand #{index} is a control token used as data")
            }
            DataAsControl { index } => {
                write!(f, "control operand #{index} is not a control token")
            }
            ValueNotInScope { index, control } => {
                let slot = if *control { "control operand" } else { "operand" };
                write!(f, "{slot} #{index} refers to a value that is not in scope")
            }
            UseBeforeDef { index, control } => {
                let slot = if *control { "control operand" } else { "operand" };
                write!(f, "{slot} #{index} is used before it is defined")
            }
            DependencyCycle => f.write_str("node depends on itself through a cycle of edges"),
            TooManyPorts { found } => {
                write!(f, "{found} ports exceed the limit of {MAX_PORTS}")
            }
            MissingTerminator { expected } => write!(f, "region must end in `{expected}`"),
            WrongTerminator { expected, found } => {
                write!(f, "expected `{expected}` terminator, found `{found}`")
            }
            UnexpectedTerminator => f.write_str("terminator is not the last node of a region"),
            RegionCount { expected, found } => {
                write!(f, "expected {expected} regions, found {found}")
            }
            RegionArgCount {
                region,
                expected,
                found,
            } => write!(
                f,
                "region #{region}: expected {expected} arguments, found {found}"
            ),
            RegionArgType {
                region,
                index,
                expected,
                found,
            } => write!(
                f,
                "region #{region} argument #{index}: expected {expected}, found {found}"
            ),
            UnpairedArgument { region, index } => write!(
                f,
                "region #{region} argument #{index} breaks the data/control pairing"
            ),
            YieldArity {
                region,
                expected,
                found,
            } => write!(
                f,
                "region #{region} yields {found} values, expected {expected}"
            ),
            YieldType {
                region,
                index,
                expected,
                found,
            } => write!(
                f,
                "region #{region} yielded value #{index}: expected {expected}, found {found}"
            ),
            LoopCarriedTypeMismatch {
                index,
                init,
                condition,
                body,
            } => write!(
                f,
                "loop-carried value #{index} changes type: init {init}, condition {condition}, body {body}"
            ),
            NonPredicate { found } => write!(f, "predicate must be a scalar i1, found {found}"),
            NonScalarInteger { operand, found } => {
                write!(f, "`{operand}` must be a rank-0 integer, found {found}")
            }
            ControlRetAttrsLength { expected, found } => write!(
                f,
                "{found} control_ret_attrs entries for {expected} control operands"
            ),
            OpaqueOutsideGeneric => f.write_str("opaque value outside a generic function"),
            GenericResultCount { found } => write!(
                f,
                "nodes in generic functions have one opaque result, found {found} results"
            ),
            GetResultOutsideGeneric => f.write_str("get_result used outside a generic function"),
            GetResultOperand => {
                f.write_str("get_result operand must be the opaque result of a node")
            }
            UnknownResultName { name, number } => {
                write!(f, "producer declares no output `{name}:{number}`")
            }
            ControlOutputOnNonGeneric => {
                f.write_str("control_output is only allowed on generic functions")
            }
            MissingName => f.write_str("function has no name"),
            DuplicateSymbol { name } => write!(f, "symbol @{name} is defined more than once"),
            UndefinedSymbol { name } => write!(f, "reference to undefined function @{name}"),
            MissingAttr { name } => write!(f, "missing attribute `{name}`"),
            AttrListLength {
                attr,
                expected,
                found,
            } => write!(f, "`{attr}` has {found} entries, expected {expected}"),
            AttrDType {
                attr,
                index,
                expected,
                found,
            } => write!(f, "`{attr}`[{index}] is {expected} but the value is {found}"),
            CalleeArity {
                function,
                what,
                expected,
                found,
            } => {
                let index = expected.min(found);
                write!(
                    f,
                    "@{function} has {found} {what}s but the node expects {expected} (mismatch at index {index})"
                )
            }
            CalleeType {
                function,
                what,
                index,
                expected,
                found,
            } => write!(
                f,
                "@{function} {what} #{index}: expected {expected}, found {found}"
            ),
        }
    }
}

/// One located verification failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// `@name` of the enclosing function, or `graph`.
    pub scope: String,
    pub node: Option<NodeId>,
    pub op: String,
    pub kind: VerifyErrorKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{}: node {node:?} `{}`: {}", self.scope, self.op, self.kind),
            None => write!(f, "{}: {}", self.scope, self.kind),
        }
    }
}

/// All diagnostics from one verification run.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyError {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerifyError {
    pub fn kinds(&self) -> impl Iterator<Item = &VerifyErrorKind> {
        self.diagnostics.iter().map(|d| &d.kind)
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifyError {}

fn into_result(diagnostics: Vec<Diagnostic>) -> Result<(), VerifyError> {
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(VerifyError { diagnostics })
    }
}

// ─── Entry points ───────────────────────────────────────────────────────────

/// Verify the graph, every function and the symbol table.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let symbols = SymbolTable::build(module);
    let mut diagnostics = Vec::new();

    for &(name, _) in symbols.duplicates() {
        diagnostics.push(Diagnostic {
            scope: format!("@{}", module.symbol_name(name)),
            node: None,
            op: String::new(),
            kind: VerifyErrorKind::DuplicateSymbol {
                name: module.symbol_name(name).to_string(),
            },
        });
    }

    if let Some(graph) = module.graph() {
        let mut v = Verifier::new(module, &symbols, "graph".to_string(), false);
        v.graph(graph.body);
        diagnostics.extend(v.diagnostics);
    }
    for func in module.functions() {
        let mut v = Verifier::for_function(module, &symbols, func);
        v.function(func);
        diagnostics.extend(v.diagnostics);
    }

    into_result(diagnostics)
}

/// Verify one function against `symbols`.
pub fn verify_function(
    module: &Module,
    func: FuncId,
    symbols: &SymbolTable,
) -> Result<(), VerifyError> {
    let mut v = Verifier::for_function(module, symbols, func);
    v.function(func);
    into_result(v.diagnostics)
}

/// Verify the module's graph, if it has one.
pub fn verify_graph(module: &Module, symbols: &SymbolTable) -> Result<(), VerifyError> {
    let Some(graph) = module.graph() else {
        return Ok(());
    };
    let mut v = Verifier::new(module, symbols, "graph".to_string(), false);
    v.graph(graph.body);
    into_result(v.diagnostics)
}

/// Check a functional control-flow node (or call) against the functions it
/// references. Reports, never fixes.
pub fn verify_symbol_uses(
    module: &Module,
    node: NodeId,
    symbols: &SymbolTable,
) -> Result<(), VerifyError> {
    let region = module.nodes[node].parent;
    let generic = module.is_in_generic_function(region);
    let scope = scope_name(module, region);
    let mut v = Verifier::new(module, symbols, scope, generic);
    v.symbol_uses(node);
    into_result(v.diagnostics)
}

fn scope_name(module: &Module, region: RegionId) -> String {
    match module.scope_of(region) {
        Scope::Graph => "graph".to_string(),
        Scope::Function(f) => function_label(module, f),
    }
}

fn function_label(module: &Module, func: FuncId) -> String {
    match module.function(func).name() {
        Some(name) => format!("@{}", module.symbol_name(name)),
        None => "@<unnamed>".to_string(),
    }
}

// ─── Verifier ───────────────────────────────────────────────────────────────

/// Terminator a region must end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    None,
    Return,
    Yield,
    Condition,
}

impl Expect {
    fn name(self) -> &'static str {
        match self {
            Expect::None => "",
            Expect::Return => "return",
            Expect::Yield => "yield",
            Expect::Condition => "condition",
        }
    }

    fn matches(self, kind: &NodeKind) -> bool {
        matches!(
            (self, kind),
            (Expect::Return, NodeKind::Return)
                | (Expect::Yield, NodeKind::Yield)
                | (Expect::Condition, NodeKind::Condition)
        )
    }
}

struct Verifier<'m> {
    module: &'m Module,
    symbols: &'m SymbolTable,
    scope: String,
    generic: bool,
    /// Position of each visited node within its region.
    positions: HashMap<NodeId, usize>,
    diagnostics: Vec<Diagnostic>,
}

impl<'m> Verifier<'m> {
    fn new(module: &'m Module, symbols: &'m SymbolTable, scope: String, generic: bool) -> Self {
        Self {
            module,
            symbols,
            scope,
            generic,
            positions: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn for_function(module: &'m Module, symbols: &'m SymbolTable, func: FuncId) -> Self {
        let generic = module.function(func).is_generic();
        Self::new(module, symbols, function_label(module, func), generic)
    }

    fn report(&mut self, node: Option<NodeId>, kind: VerifyErrorKind) {
        let op = node
            .map(|n| self.module.nodes[n].kind.name())
            .unwrap_or_default();
        self.diagnostics.push(Diagnostic {
            scope: self.scope.clone(),
            node,
            op,
            kind,
        });
    }

    fn symbol_label(&self, sym: Symbol) -> String {
        self.module.symbol_name(sym).to_string()
    }

    /// Data type of an operand, reporting nothing. Missing values count as
    /// opaque so that one bad reference does not cascade.
    fn type_of(&self, value: Value) -> Type {
        self.module.data_type(value).unwrap_or(Type::Opaque)
    }

    // ── Containers ──────────────────────────────────────────────────

    fn graph(&mut self, body: RegionId) {
        let args = self.module.regions[body].args.len();
        if args != 0 {
            self.report(
                None,
                VerifyErrorKind::RegionArgCount {
                    region: 0,
                    expected: 0,
                    found: args,
                },
            );
        }
        self.region(body, 0, Expect::None);
        self.graph_cycles(body);
    }

    /// Graph bodies are unordered, so the only ordering constraint is that
    /// edges between top-level nodes (including uses from nested regions)
    /// form no cycle.
    fn graph_cycles(&mut self, body: RegionId) {
        let module = self.module;
        let top = &module.regions[body].nodes;
        let index: HashMap<NodeId, usize> = top.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); top.len()];
        for (user, &nid) in top.iter().enumerate() {
            let mut edge = |n: NodeId| {
                for v in module.nodes[n].operands.iter().chain(&module.nodes[n].control_operands) {
                    if let Some(&def) = v.defining_node().and_then(|d| index.get(&d)) {
                        succs[def].push(user);
                    }
                }
            };
            edge(nid);
            for &sub in &module.nodes[nid].regions {
                module.walk_nodes(sub, &mut edge);
            }
        }

        // 0 = unvisited, 1 = on the DFS stack, 2 = finished.
        let mut state = vec![0u8; top.len()];
        let mut on_cycle = Vec::new();
        let mut reported = HashSet::new();
        for root in 0..top.len() {
            if state[root] != 0 {
                continue;
            }
            state[root] = 1;
            let mut stack = vec![(root, 0usize)];
            while let Some(frame) = stack.last_mut() {
                let v = frame.0;
                if let Some(&w) = succs[v].get(frame.1) {
                    frame.1 += 1;
                    match state[w] {
                        0 => {
                            state[w] = 1;
                            stack.push((w, 0));
                        }
                        1 => {
                            if reported.insert(w) {
                                on_cycle.push(top[w]);
                            }
                        }
                        _ => {}
                    }
                } else {
                    state[v] = 2;
                    stack.pop();
                }
            }
        }
        for node in on_cycle {
            self.report(Some(node), VerifyErrorKind::DependencyCycle);
        }
    }

    fn function(&mut self, func: FuncId) {
        let module = self.module;
        let f = module.function(func);
        let ty = f.function_type();

        if f.name().is_none() {
            self.report(None, VerifyErrorKind::MissingName);
        }
        if !f.control_output.is_empty() && !f.is_generic() {
            self.report(None, VerifyErrorKind::ControlOutputOnNonGeneric);
        }
        if let Some(grad) = f.gradient
            && !self.symbols.contains(grad)
        {
            self.report(
                None,
                VerifyErrorKind::UndefinedSymbol {
                    name: self.symbol_label(grad),
                },
            );
        }
        if f.arg_attrs.len() != ty.inputs.len() {
            self.report(
                None,
                VerifyErrorKind::AttrListLength {
                    attr: "arg_attrs",
                    expected: ty.inputs.len(),
                    found: f.arg_attrs.len(),
                },
            );
        }
        if f.res_attrs.len() != ty.results.len() {
            self.report(
                None,
                VerifyErrorKind::AttrListLength {
                    attr: "res_attrs",
                    expected: ty.results.len(),
                    found: f.res_attrs.len(),
                },
            );
        }
        if !f.is_generic() && ty.inputs.iter().chain(&ty.results).any(Type::is_opaque) {
            self.report(None, VerifyErrorKind::OpaqueOutsideGeneric);
        }

        let body = f.body();
        let arg_types = module.regions[body].data_arg_types();
        if arg_types.len() != ty.inputs.len() {
            self.report(
                None,
                VerifyErrorKind::RegionArgCount {
                    region: 0,
                    expected: ty.inputs.len(),
                    found: arg_types.len(),
                },
            );
        } else {
            for (index, (found, expected)) in arg_types.iter().zip(&ty.inputs).enumerate() {
                if found != expected {
                    self.report(
                        None,
                        VerifyErrorKind::RegionArgType {
                            region: 0,
                            index,
                            expected: expected.clone(),
                            found: found.clone(),
                        },
                    );
                }
            }
        }

        self.region(body, 0, Expect::Return);
    }

    // ── Regions ─────────────────────────────────────────────────────

    fn region(&mut self, region: RegionId, position: usize, expect: Expect) {
        let module = self.module;
        let r = &module.regions[region];

        for (index, arg) in r.args.iter().enumerate() {
            if arg.is_control() != (index % 2 == 1) {
                self.report(
                    None,
                    VerifyErrorKind::UnpairedArgument {
                        region: position,
                        index,
                    },
                );
                break;
            }
        }
        if r.args.len() > MAX_PORTS {
            self.report(None, VerifyErrorKind::TooManyPorts { found: r.args.len() });
        }
        if r.args.len() % 2 == 1 {
            self.report(
                None,
                VerifyErrorKind::UnpairedArgument {
                    region: position,
                    index: r.args.len() - 1,
                },
            );
        }

        self.positions
            .extend(r.nodes.iter().enumerate().map(|(i, &n)| (n, i)));
        let last = r.nodes.len().checked_sub(1);
        for (i, &node) in r.nodes.iter().enumerate() {
            let kind = &module.nodes[node].kind;
            if kind.is_terminator() {
                if Some(i) != last || expect == Expect::None {
                    self.report(Some(node), VerifyErrorKind::UnexpectedTerminator);
                } else if !expect.matches(kind) {
                    self.report(
                        Some(node),
                        VerifyErrorKind::WrongTerminator {
                            expected: expect.name(),
                            found: kind.name(),
                        },
                    );
                }
            }
            self.node(node, region);
        }

        if expect != Expect::None {
            let terminated = last.is_some_and(|l| module.nodes[r.nodes[l]].kind.is_terminator());
            if !terminated {
                self.report(
                    None,
                    VerifyErrorKind::MissingTerminator {
                        expected: expect.name(),
                    },
                );
            }
        }
    }

    /// The terminator of a region, if it is of the expected kind.
    fn terminator(&self, region: RegionId, expect: Expect) -> Option<NodeId> {
        let term = self.module.regions[region].terminator(&self.module.nodes)?;
        expect
            .matches(&self.module.nodes[term].kind)
            .then_some(term)
    }

    // ── Nodes ───────────────────────────────────────────────────────

    fn node(&mut self, node: NodeId, region: RegionId) {
        let module = self.module;
        let n = &module.nodes[node];

        self.operands(node, region);
        if n.results.len() > MAX_PORTS {
            self.report(
                Some(node),
                VerifyErrorKind::TooManyPorts {
                    found: n.results.len(),
                },
            );
        }

        let opaque_results = n.results.iter().filter(|t| t.is_opaque()).count();
        if self.generic {
            if matches!(n.kind, NodeKind::Op(_)) && (n.results.len() != 1 || opaque_results != 1)
            {
                self.report(
                    Some(node),
                    VerifyErrorKind::GenericResultCount {
                        found: n.results.len(),
                    },
                );
            }
        } else if opaque_results > 0 {
            self.report(Some(node), VerifyErrorKind::OpaqueOutsideGeneric);
        }

        for attr in n.attrs.values() {
            let mut syms = Vec::new();
            attr.collect_symbols(&mut syms);
            for sym in syms {
                if !self.symbols.contains(sym) {
                    self.report(
                        Some(node),
                        VerifyErrorKind::UndefinedSymbol {
                            name: self.symbol_label(sym),
                        },
                    );
                }
            }
        }

        match &n.kind {
            NodeKind::Return => self.return_node(node, region),
            NodeKind::Yield | NodeKind::Condition => {}
            NodeKind::GetResult => self.get_result(node),
            NodeKind::Op(_) => {
                if module.get_called_function(node, self.symbols).is_some() {
                    self.symbol_uses(node);
                }
            }
            NodeKind::If(_) | NodeKind::Case(_) | NodeKind::While(_) | NodeKind::For => {
                self.functional_operands(node);
                self.symbol_uses(node);
            }
            NodeKind::IfRegion(_) | NodeKind::CaseRegion(_) => self.branch_regions(node),
            NodeKind::WhileRegion(_) => self.while_region(node),
            NodeKind::ForRegion => self.for_region(node),
        }
    }

    fn operands(&mut self, node: NodeId, region: RegionId) {
        let module = self.module;
        let n = &module.nodes[node];
        for (index, &v) in n.operands.iter().enumerate() {
            if !self.in_scope(v, region) {
                self.report(
                    Some(node),
                    VerifyErrorKind::ValueNotInScope {
                        index,
                        control: false,
                    },
                );
            } else if module.is_control(v) {
                self.report(Some(node), VerifyErrorKind::ControlAsData { index });
            } else if !self.defined_before(v, node) {
                self.report(
                    Some(node),
                    VerifyErrorKind::UseBeforeDef {
                        index,
                        control: false,
                    },
                );
            }
        }
        for (index, &v) in n.control_operands.iter().enumerate() {
            if !self.in_scope(v, region) {
                self.report(
                    Some(node),
                    VerifyErrorKind::ValueNotInScope {
                        index,
                        control: true,
                    },
                );
            } else if !module.is_control(v) {
                self.report(Some(node), VerifyErrorKind::DataAsControl { index });
            } else if !self.defined_before(v, node) {
                self.report(
                    Some(node),
                    VerifyErrorKind::UseBeforeDef {
                        index,
                        control: true,
                    },
                );
            }
        }
    }

    /// The value exists and is defined in `region` or a region enclosing it.
    fn in_scope(&self, value: Value, region: RegionId) -> bool {
        let module = self.module;
        if module.value_type(value).is_none() {
            return false;
        }
        let def_region = match value {
            Value::Result(r) => {
                if !module.is_attached(r.node) {
                    return false;
                }
                module.nodes[r.node].parent
            }
            Value::Control(n) => {
                if !module.is_attached(n) {
                    return false;
                }
                module.nodes[n].parent
            }
            Value::Arg(a) => a.region,
        };
        module.region_encloses(def_region, region)
    }

    /// An in-scope value defined by a node of an ordered body comes before
    /// the use, or before the node whose region contains the use. Graph
    /// bodies are unordered and are checked for cycles instead.
    fn defined_before(&self, value: Value, user: NodeId) -> bool {
        let module = self.module;
        let Some(def) = value.defining_node() else {
            return true;
        };
        let def_region = module.nodes[def].parent;
        if matches!(module.regions[def_region].owner, RegionOwner::Graph) {
            return true;
        }
        let mut anchor = user;
        while module.nodes[anchor].parent != def_region {
            match module.regions[module.nodes[anchor].parent].owner {
                RegionOwner::Node(owner) => anchor = owner,
                RegionOwner::Graph | RegionOwner::Function(_) => return true,
            }
        }
        match (self.positions.get(&def), self.positions.get(&anchor)) {
            (Some(d), Some(a)) => d < a,
            _ => true,
        }
    }

    fn return_node(&mut self, node: NodeId, region: RegionId) {
        let module = self.module;
        let n = &module.nodes[node];
        let Scope::Function(func) = module.scope_of(region) else {
            return;
        };
        if module.function(func).body() != region {
            return;
        }
        let expected = &module.function(func).function_type().results;
        self.value_list(node, &n.operands, expected, ListKind::Operands);

        if let Some(attrs) = n.attrs.get("control_ret_attrs") {
            let found = attrs.as_array().map_or(0, <[Attr]>::len);
            if found != n.control_operands.len() {
                self.report(
                    Some(node),
                    VerifyErrorKind::ControlRetAttrsLength {
                        expected: n.control_operands.len(),
                        found,
                    },
                );
            }
        }
    }

    fn get_result(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];
        if !self.generic {
            self.report(Some(node), VerifyErrorKind::GetResultOutsideGeneric);
            return;
        }
        let producer = match n.operands.as_slice() {
            [Value::Result(r)] if module.nodes[r.node].results.get(r.index as usize)
                == Some(&Type::Opaque) =>
            {
                r.node
            }
            _ => {
                self.report(Some(node), VerifyErrorKind::GetResultOperand);
                return;
            }
        };
        let name = n.attrs.get("name").and_then(Attr::as_str);
        let number = n.attrs.get("number").and_then(Attr::as_int);
        let (Some(name), Some(number)) = (name, number) else {
            self.report(Some(node), VerifyErrorKind::MissingAttr { name: "name" });
            return;
        };
        if !self.declares_output(producer, name, number) {
            self.report(
                Some(node),
                VerifyErrorKind::UnknownResultName {
                    name: name.to_string(),
                    number,
                },
            );
        }
    }

    /// Whether `producer` declares output `name:number`, through the op
    /// registry or the callee's `tfg.name` result attributes.
    fn declares_output(&self, producer: NodeId, name: &str, number: i64) -> bool {
        let module = self.module;
        if let Some(callee) = module.get_called_function(producer, self.symbols) {
            let f = module.function(callee);
            return number == 0
                && (0..f.function_type().results.len()).any(|i| f.result_name(i) == Some(name));
        }
        let NodeKind::Op(op) = &module.nodes[producer].kind else {
            return false;
        };
        match ops::lookup(op).and_then(|def| def.output(name)) {
            Some(out) => number >= 0 && (out.is_list || number == 0),
            None => false,
        }
    }

    // ── Functional control flow ─────────────────────────────────────

    fn functional_operands(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];
        let Some(family) = n.kind.family() else {
            return;
        };
        let lead = leading_operands(family);
        if n.operands.len() < lead {
            self.report(
                Some(node),
                VerifyErrorKind::OperandCount {
                    expected: lead,
                    found: n.operands.len(),
                },
            );
            return;
        }
        match family {
            CfFamily::If => {}
            CfFamily::Case => self.scalar_integer(node, n.operands[0], "branch_index"),
            CfFamily::While => {}
            CfFamily::For => {
                for (v, name) in n.operands[..3].iter().zip(["start", "limit", "delta"]) {
                    self.scalar_integer(node, *v, name);
                }
            }
        }
        if matches!(family, CfFamily::While | CfFamily::For) {
            let carried = &n.operands[lead..];
            let results = n.results.clone();
            self.value_list(node, carried, &results, ListKind::Results);
        }
    }

    fn scalar_integer(&mut self, node: NodeId, value: Value, operand: &'static str) {
        let ty = self.type_of(value);
        if !ty.is_scalar_integer_like() {
            self.report(
                Some(node),
                VerifyErrorKind::NonScalarInteger { operand, found: ty },
            );
        }
    }

    fn symbol_uses(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];

        let Some(cf) = FunctionalCf::new(module, node) else {
            // A plain call: operands feed the callee, results come back.
            if let Some(callee) = module.get_called_function(node, self.symbols) {
                let inputs: Vec<Type> = n.operands.iter().map(|&v| self.type_of(v)).collect();
                let results = n.results.clone();
                self.callee_signature(node, callee, &inputs, Some(&results));
            }
            return;
        };

        let family = cf.family();
        let callees = cf.callees();
        if callees.is_empty() || callees.iter().any(Option::is_none) {
            let name = cf.callee_keys()[0];
            self.report(Some(node), VerifyErrorKind::MissingAttr { name });
        }

        let args: Vec<Type> = cf.args().iter().map(|&v| self.type_of(v)).collect();
        let results = n.results.clone();

        let (in_key, out_key) = match family {
            CfFamily::If | CfFamily::Case => ("Tin", Some("Tout")),
            CfFamily::While | CfFamily::For => ("T", None),
        };
        self.type_list_attr(node, in_key, &args);
        if let Some(out_key) = out_key {
            self.type_list_attr(node, out_key, &results);
        }
        let declared_results: Vec<Type> = match out_key.and_then(|k| n.attrs.get(k)) {
            Some(list) => match list.as_dtype_list() {
                Some(dtypes) if dtypes.len() != results.len() => {
                    dtypes.into_iter().map(Type::unranked).collect()
                }
                _ => results.clone(),
            },
            None => results.clone(),
        };

        for (i, callee) in callees.into_iter().enumerate() {
            let Some(sym) = callee else { continue };
            let Some(func) = self.symbols.lookup(sym) else {
                // Undefined symbols are reported by the attribute walk when
                // verifying a whole region; report here for direct callers.
                if !self
                    .diagnostics
                    .iter()
                    .any(|d| d.node == Some(node) && matches!(d.kind, VerifyErrorKind::UndefinedSymbol { .. }))
                {
                    self.report(
                        Some(node),
                        VerifyErrorKind::UndefinedSymbol {
                            name: self.symbol_label(sym),
                        },
                    );
                }
                continue;
            };
            match family {
                CfFamily::If | CfFamily::Case => {
                    self.callee_signature(node, func, &args, Some(&declared_results));
                }
                CfFamily::While if i == 0 => {
                    self.callee_signature(node, func, &args, None);
                    let cond_results = &module.function(func).function_type().results;
                    match cond_results.as_slice() {
                        [pred] if pred.is_predicate_like() => {}
                        [pred] => self.report(
                            Some(node),
                            VerifyErrorKind::NonPredicate {
                                found: pred.clone(),
                            },
                        ),
                        other => self.report(
                            Some(node),
                            VerifyErrorKind::CalleeArity {
                                function: self.symbol_label(sym),
                                what: "result",
                                expected: 1,
                                found: other.len(),
                            },
                        ),
                    }
                }
                CfFamily::While => {
                    self.callee_signature(node, func, &args, Some(&args));
                }
                CfFamily::For => {
                    let mut inputs = vec![Type::scalar(ElementType::I32)];
                    inputs.extend(args.iter().cloned());
                    self.callee_signature(node, func, &inputs, Some(&args));
                }
            }
        }
    }

    /// Check `attr` (a dtype list) against the actual value types.
    fn type_list_attr(&mut self, node: NodeId, attr: &'static str, types: &[Type]) {
        let module = self.module;
        let Some(value) = module.nodes[node].attrs.get(attr) else {
            return;
        };
        let Some(dtypes) = value.as_dtype_list() else {
            self.report(Some(node), VerifyErrorKind::MissingAttr { name: attr });
            return;
        };
        if dtypes.len() != types.len() {
            self.report(
                Some(node),
                VerifyErrorKind::AttrListLength {
                    attr,
                    expected: types.len(),
                    found: dtypes.len(),
                },
            );
            return;
        }
        for (index, (&expected, found)) in dtypes.iter().zip(types).enumerate() {
            if !found.accepts_element(expected) {
                self.report(
                    Some(node),
                    VerifyErrorKind::AttrDType {
                        attr,
                        index,
                        expected,
                        found: found.clone(),
                    },
                );
            }
        }
    }

    /// Compare a callee's signature with what the caller passes and expects.
    /// `results: None` skips the result check.
    fn callee_signature(
        &mut self,
        node: NodeId,
        callee: FuncId,
        inputs: &[Type],
        results: Option<&[Type]>,
    ) {
        let module = self.module;
        let ty = module.function(callee).function_type();
        let function = module
            .function(callee)
            .name()
            .map(|s| self.symbol_label(s))
            .unwrap_or_default();

        let check = |what: &'static str, expected: &[Type], declared: &[Type]| {
            if expected.len() != declared.len() {
                return Some(VerifyErrorKind::CalleeArity {
                    function: function.clone(),
                    what,
                    expected: expected.len(),
                    found: declared.len(),
                });
            }
            expected
                .iter()
                .zip(declared)
                .enumerate()
                .find(|(_, (e, d))| !e.is_compatible_with(d))
                .map(|(index, (e, d))| VerifyErrorKind::CalleeType {
                    function: function.clone(),
                    what,
                    index,
                    expected: e.clone(),
                    found: d.clone(),
                })
        };

        let mut errors = Vec::new();
        errors.extend(check("argument", inputs, &ty.inputs));
        if let Some(results) = results {
            errors.extend(check("result", results, &ty.results));
        }
        for kind in errors {
            self.report(Some(node), kind);
        }
    }

    // ── Region control flow ─────────────────────────────────────────

    fn region_count(&mut self, node: NodeId, expected: usize) -> bool {
        let found = self.module.nodes[node].regions.len();
        if found != expected {
            self.report(Some(node), VerifyErrorKind::RegionCount { expected, found });
            return false;
        }
        true
    }

    fn branch_regions(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];
        if n.operands.len() != 1 {
            self.report(
                Some(node),
                VerifyErrorKind::OperandCount {
                    expected: 1,
                    found: n.operands.len(),
                },
            );
        } else if matches!(n.kind, NodeKind::CaseRegion(_)) {
            self.scalar_integer(node, n.operands[0], "branch_index");
        }
        if matches!(n.kind, NodeKind::IfRegion(_)) && !self.region_count(node, 2) {
            return;
        }
        if n.regions.is_empty() {
            self.report(
                Some(node),
                VerifyErrorKind::RegionCount {
                    expected: 1,
                    found: 0,
                },
            );
            return;
        }

        for (position, &region) in n.regions.iter().enumerate() {
            let args = module.regions[region].args.len();
            if args != 0 {
                self.report(
                    Some(node),
                    VerifyErrorKind::RegionArgCount {
                        region: position,
                        expected: 0,
                        found: args,
                    },
                );
            }
            self.region(region, position, Expect::Yield);
            if let Some(term) = self.terminator(region, Expect::Yield) {
                let yielded = &module.nodes[term].operands;
                self.yielded(node, position, yielded, &n.results);
            }
        }
    }

    fn yielded(&mut self, node: NodeId, region: usize, values: &[Value], expected: &[Type]) {
        if values.len() != expected.len() {
            self.report(
                Some(node),
                VerifyErrorKind::YieldArity {
                    region,
                    expected: expected.len(),
                    found: values.len(),
                },
            );
            return;
        }
        for (index, (&v, e)) in values.iter().zip(expected).enumerate() {
            let found = self.type_of(v);
            if !found.is_compatible_with(e) {
                self.report(
                    Some(node),
                    VerifyErrorKind::YieldType {
                        region,
                        index,
                        expected: e.clone(),
                        found,
                    },
                );
            }
        }
    }

    /// Region arguments must be the paired form of `expected`.
    fn region_args(&mut self, node: NodeId, position: usize, region: RegionId, expected: &[Type]) {
        let found = self.module.regions[region].data_arg_types();
        if found.len() != expected.len() {
            self.report(
                Some(node),
                VerifyErrorKind::RegionArgCount {
                    region: position,
                    expected: expected.len(),
                    found: found.len(),
                },
            );
            return;
        }
        for (index, (f, e)) in found.iter().zip(expected).enumerate() {
            if f != e {
                self.report(
                    Some(node),
                    VerifyErrorKind::RegionArgType {
                        region: position,
                        index,
                        expected: e.clone(),
                        found: f.clone(),
                    },
                );
            }
        }
    }

    fn while_region(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];
        if !self.region_count(node, 2) {
            return;
        }
        let init: Vec<Type> = n.operands.iter().map(|&v| self.type_of(v)).collect();
        let (cond, body) = (n.regions[0], n.regions[1]);

        self.region_args(node, 0, cond, &init);
        self.region_args(node, 1, body, &init);
        self.region(cond, 0, Expect::Condition);
        self.region(body, 1, Expect::Yield);

        let cond_carried = match self.terminator(cond, Expect::Condition) {
            Some(term) => {
                let ops = &module.nodes[term].operands;
                match ops.split_first() {
                    Some((&pred, carried)) => {
                        let pred_ty = self.type_of(pred);
                        if !pred_ty.is_predicate_like() {
                            self.report(Some(term), VerifyErrorKind::NonPredicate { found: pred_ty });
                        }
                        Some(carried)
                    }
                    None => {
                        self.report(
                            Some(term),
                            VerifyErrorKind::OperandCount {
                                expected: 1 + init.len(),
                                found: 0,
                            },
                        );
                        None
                    }
                }
            }
            None => None,
        };
        let body_yield = self
            .terminator(body, Expect::Yield)
            .map(|t| module.nodes[t].operands.as_slice());

        self.loop_carried(node, &init, cond_carried, body_yield);
        self.value_list(node, &n.operands, &n.results.clone(), ListKind::Results);
    }

    fn for_region(&mut self, node: NodeId) {
        let module = self.module;
        let n = &module.nodes[node];
        if n.operands.len() < 3 {
            self.report(
                Some(node),
                VerifyErrorKind::OperandCount {
                    expected: 3,
                    found: n.operands.len(),
                },
            );
            return;
        }
        for (v, name) in n.operands[..3].iter().zip(["start", "limit", "delta"]) {
            self.scalar_integer(node, *v, name);
        }
        if !self.region_count(node, 1) {
            return;
        }
        let body = n.regions[0];
        let init: Vec<Type> = n.operands[3..].iter().map(|&v| self.type_of(v)).collect();

        let body_args = module.regions[body].data_arg_types();
        let args_match = body_args.len() == init.len() + 1;
        match body_args.split_first() {
            Some((index, carried)) => {
                if !index.is_scalar_integer_like() {
                    self.report(
                        Some(node),
                        VerifyErrorKind::NonScalarInteger {
                            operand: "index",
                            found: index.clone(),
                        },
                    );
                }
                if carried.len() != init.len() {
                    self.report(
                        Some(node),
                        VerifyErrorKind::RegionArgCount {
                            region: 0,
                            expected: init.len() + 1,
                            found: body_args.len(),
                        },
                    );
                }
            }
            None => self.report(
                Some(node),
                VerifyErrorKind::RegionArgCount {
                    region: 0,
                    expected: init.len() + 1,
                    found: 0,
                },
            ),
        }
        self.region(body, 0, Expect::Yield);

        // A wrong argument count is already reported; the yield would only
        // repeat it.
        if args_match {
            let carried_args: Vec<Value> =
                (1..body_args.len()).map(|i| Value::arg(body, 2 * i)).collect();
            let body_yield = self
                .terminator(body, Expect::Yield)
                .map(|t| module.nodes[t].operands.as_slice());
            self.loop_carried(node, &init, Some(&carried_args), body_yield);
        }
        self.value_list(node, &n.operands[3..], &n.results.clone(), ListKind::Results);
    }

    /// Init, condition-carried and body-yielded types must agree index by
    /// index.
    fn loop_carried(
        &mut self,
        node: NodeId,
        init: &[Type],
        condition: Option<&[Value]>,
        body: Option<&[Value]>,
    ) {
        if let Some(cond) = condition
            && cond.len() != init.len()
        {
            self.report(
                Some(node),
                VerifyErrorKind::YieldArity {
                    region: 0,
                    expected: init.len(),
                    found: cond.len(),
                },
            );
            return;
        }
        if let Some(body) = body
            && body.len() != init.len()
        {
            let region = self.module.nodes[node].regions.len() - 1;
            self.report(
                Some(node),
                VerifyErrorKind::YieldArity {
                    region,
                    expected: init.len(),
                    found: body.len(),
                },
            );
            return;
        }
        for (index, init_ty) in init.iter().enumerate() {
            let cond_ty = condition.map_or(init_ty.clone(), |c| self.type_of(c[index]));
            let body_ty = body.map_or(init_ty.clone(), |b| self.type_of(b[index]));
            if !init_ty.is_compatible_with(&cond_ty)
                || !init_ty.is_compatible_with(&body_ty)
                || !cond_ty.is_compatible_with(&body_ty)
            {
                self.report(
                    Some(node),
                    VerifyErrorKind::LoopCarriedTypeMismatch {
                        index,
                        init: init_ty.clone(),
                        condition: cond_ty,
                        body: body_ty,
                    },
                );
            }
        }
    }

    /// Values flowing into a fixed type list: return operands against the
    /// function results, or loop inits against the node results.
    fn value_list(&mut self, node: NodeId, values: &[Value], expected: &[Type], kind: ListKind) {
        if values.len() != expected.len() {
            let (expected, found) = (expected.len(), values.len());
            self.report(
                Some(node),
                match kind {
                    ListKind::Operands => VerifyErrorKind::OperandCount { expected, found },
                    ListKind::Results => VerifyErrorKind::ResultCount {
                        expected: found,
                        found: expected,
                    },
                },
            );
            return;
        }
        for (index, (&v, e)) in values.iter().zip(expected).enumerate() {
            let found = self.type_of(v);
            if found.is_compatible_with(e) {
                continue;
            }
            let err = match kind {
                ListKind::Operands => VerifyErrorKind::OperandType {
                    index,
                    expected: e.clone(),
                    found,
                },
                ListKind::Results => VerifyErrorKind::ResultType {
                    index,
                    expected: found,
                    found: e.clone(),
                },
            };
            self.report(Some(node), err);
        }
    }
}

/// Which side of [`Verifier::value_list`] is authoritative.
#[derive(Clone, Copy)]
enum ListKind {
    /// The expected types are authoritative (return operands).
    Operands,
    /// The values are authoritative and the node results must follow them
    /// (loop inits).
    Results,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrDict;
    use crate::ir::{Flavor, VersionDef};
    use crate::types::FunctionType;

    fn f32_scalar() -> Type {
        Type::scalar(ElementType::F32)
    }

    fn i1() -> Type {
        Type::scalar(ElementType::Bool)
    }

    fn define(module: &mut Module, name: &str, inputs: Vec<Type>, results: Vec<Type>) -> FuncId {
        let f = module.create_function();
        let sym = module.intern(name);
        module.set_function_name(f, sym);
        module.set_function_type(f, FunctionType::new(inputs, results));
        f
    }

    /// A body that returns fresh constants of the declared result types.
    fn constant_body(module: &mut Module, f: FuncId) {
        let results = module.function(f).function_type().results.clone();
        let mut b = module.function_builder(f);
        let values: Vec<Value> = results
            .iter()
            .map(|t| {
                b.op("Const", &[], &[], AttrDict::new(), std::slice::from_ref(t))
                    .value(0)
                    .unwrap()
            })
            .collect();
        b.ret(&values, &[]);
    }

    #[test]
    fn well_formed_function_verifies() {
        let mut module = Module::new();
        let f = define(&mut module, "f", vec![f32_scalar()], vec![f32_scalar()]);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let ctl = b.arg_control(0);
        let neg = b.op("Neg", &[x], &[ctl], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[neg.value(0).unwrap()], &[neg.control()]);

        assert_eq!(verify_module(&module), Ok(()));
        assert_eq!(
            module.regions[module.function(f).body()].args[0].data().unwrap(),
            &f32_scalar()
        );
    }

    #[test]
    fn if_then_branch_result_count_mismatch_names_index() {
        let mut module = Module::new();
        let then_f = define(&mut module, "then", vec![], vec![f32_scalar(), f32_scalar()]);
        constant_body(&mut module, then_f);
        let else_f = define(
            &mut module,
            "else",
            vec![],
            vec![f32_scalar(), f32_scalar(), f32_scalar()],
        );
        constant_body(&mut module, else_f);
        let then_sym = module.intern("then");
        let else_sym = module.intern("else");

        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let node = b.functional_if(
            Flavor::Plain,
            pred,
            &[],
            &[],
            then_sym,
            else_sym,
            &[f32_scalar(), f32_scalar(), f32_scalar()],
        );

        let symbols = SymbolTable::build(&module);
        let err = verify_symbol_uses(&module, node, &symbols).unwrap_err();
        assert_eq!(err.diagnostics.len(), 1);
        assert_eq!(
            err.diagnostics[0].kind,
            VerifyErrorKind::CalleeArity {
                function: "then".into(),
                what: "result",
                expected: 3,
                found: 2,
            }
        );
        assert!(err.to_string().contains("index 2"), "{err}");
    }

    #[test]
    fn undefined_callee_is_reported() {
        let mut module = Module::new();
        let missing = module.intern("missing");
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let c = b
            .op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::I32)])
            .value(0)
            .unwrap();
        b.functional_for(c, c, c, &[], &[], missing);

        let err = verify_module(&module).unwrap_err();
        assert!(err.kinds().any(|k| matches!(
            k,
            VerifyErrorKind::UndefinedSymbol { name } if name == "missing"
        )));
    }

    #[test]
    fn for_bounds_must_be_scalar_integers() {
        let mut module = Module::new();
        let body = define(&mut module, "body", vec![Type::scalar(ElementType::I32)], vec![]);
        module.function_builder(body).ret(&[], &[]);
        let body_sym = module.intern("body");

        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let i = b
            .op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::I32)])
            .value(0)
            .unwrap();
        let x = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        b.functional_for(i, x, i, &[], &[], body_sym);

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::NonScalarInteger {
                operand: "limit",
                found: f32_scalar(),
            }]
        );
    }

    #[test]
    fn for_region_carried_count_mismatch_is_reported_once() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let i = b
            .op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::I32)])
            .value(0)
            .unwrap();
        let x = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        let node = b.for_region(i, i, i, &[x], &[], |body| {
            let carried = body.arg(1);
            body.yield_values(&[carried], &[]);
        });
        assert_eq!(verify_module(&module), Ok(()));

        // Drop the carried pair from the body, and the yield with it.
        let body = module.nodes[node].regions[0];
        module.regions[body].args.truncate(2);
        let term = module.regions[body].nodes[0];
        module.nodes[term].operands.clear();

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::RegionArgCount {
                region: 0,
                expected: 2,
                found: 1,
            }]
        );
    }

    #[test]
    fn loop_carried_types_must_agree() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let init = b
            .op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::I32)])
            .value(0)
            .unwrap();
        b.while_region(
            Flavor::Plain,
            &[init],
            &[],
            |c| {
                let x = c.arg(0);
                let p = c.op("Less", &[x], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
                c.condition(p, &[x], &[]);
            },
            |body| {
                let wrong = body
                    .op("Const", &[], &[], AttrDict::new(), &[Type::scalar(ElementType::F32)])
                    .value(0)
                    .unwrap();
                body.yield_values(&[wrong], &[]);
            },
        );

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::LoopCarriedTypeMismatch {
                index: 0,
                init: Type::scalar(ElementType::I32),
                condition: Type::scalar(ElementType::I32),
                body: f32_scalar(),
            }]
        );
    }

    #[test]
    fn if_region_branches_must_yield_node_results() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        b.if_region(
            Flavor::Plain,
            pred,
            &[],
            &[f32_scalar()],
            |t| {
                let v = t.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
                t.yield_values(&[v], &[]);
            },
            |e| {
                e.yield_values(&[], &[]);
            },
        );

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::YieldArity {
                region: 1,
                expected: 1,
                found: 0,
            }]
        );
    }

    #[test]
    fn get_result_rules() {
        let mut module = Module::new();
        let f = module.create_function();
        let name = module.intern("generic");
        module.set_function_name(f, name);
        module.set_generic(f, true);
        module.set_function_type(f, FunctionType::new(vec![Type::Opaque], vec![Type::Opaque]));
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let unique = b.op("Unique", &[x], &[], AttrDict::new(), &[]);
        let bundle = unique.bundle().unwrap();
        let _idx = b.get_result(bundle, "idx", 0);
        let bad = b.get_result(bundle, "nope", 0);
        b.ret(&[bad], &[]);

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::UnknownResultName {
                name: "nope".into(),
                number: 0,
            }]
        );
    }

    #[test]
    fn get_result_outside_generic_function() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let producer = module.builder(g).op("Unique", &[], &[], AttrDict::new(), &[]).node;
        module.push_node(crate::ir::Node {
            parent: g,
            kind: NodeKind::GetResult,
            operands: vec![Value::result(producer, 0)],
            control_operands: vec![],
            attrs: AttrDict::new()
                .with("name", Attr::Str("y".into()))
                .with("number", Attr::Int(0)),
            results: vec![f32_scalar()],
            regions: vec![],
        });

        let err = verify_module(&module).unwrap_err();
        assert!(err.kinds().any(|k| *k == VerifyErrorKind::GetResultOutsideGeneric));
    }

    #[test]
    fn control_output_requires_generic() {
        let mut module = Module::new();
        let f = define(&mut module, "f", vec![], vec![]);
        module.function_builder(f).ret(&[], &[]);
        module.function_mut(f).control_output = vec!["side_effect".into()];

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::ControlOutputOnNonGeneric]
        );
    }

    #[test]
    fn control_tokens_are_not_data() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let c = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);
        b.op("Neg", &[c.control()], &[c.value(0).unwrap()], AttrDict::new(), &[f32_scalar()]);

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![
                &VerifyErrorKind::ControlAsData { index: 0 },
                &VerifyErrorKind::DataAsControl { index: 0 },
            ]
        );
    }

    #[test]
    fn graphs_have_no_terminators() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        module.builder(g).ret(&[], &[]);
        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::UnexpectedTerminator]
        );
    }

    #[test]
    fn function_bodies_are_ordered() {
        let mut module = Module::new();
        let f = define(&mut module, "f", vec![f32_scalar()], vec![f32_scalar()]);
        let mut b = module.function_builder(f);
        let x = b.arg(0);
        let first = b.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);
        let second = b.op("Neg", &[first.value(0).unwrap()], &[], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[second.value(0).unwrap()], &[]);
        assert_eq!(verify_module(&module), Ok(()));

        // %0 = Neg(%1#0); %1 = Neg(%0#0)
        module.nodes[first.node].operands[0] = second.value(0).unwrap();
        let err = verify_module(&module).unwrap_err();
        assert_eq!(err.diagnostics.len(), 1);
        assert_eq!(err.diagnostics[0].node, Some(first.node));
        assert_eq!(
            err.diagnostics[0].kind,
            VerifyErrorKind::UseBeforeDef {
                index: 0,
                control: false,
            }
        );
    }

    #[test]
    fn nested_region_cannot_capture_a_later_node() {
        let mut module = Module::new();
        let f = define(&mut module, "f", vec![i1()], vec![f32_scalar()]);
        let mut b = module.function_builder(f);
        let pred = b.arg(0);
        let early = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);
        let ev = early.value(0).unwrap();
        let if_node = b.if_region(
            Flavor::Plain,
            pred,
            &[],
            &[f32_scalar()],
            |t| {
                t.yield_values(&[ev], &[]);
            },
            |e| {
                e.yield_values(&[ev], &[]);
            },
        );
        let late = b.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]);
        b.ret(&[Value::result(if_node, 0)], &[late.control()]);
        assert_eq!(verify_module(&module), Ok(()));

        let then_region = module.nodes[if_node].regions[0];
        let then_yield = module.regions[then_region].nodes[0];
        module.nodes[then_yield].control_operands.push(late.control());
        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::UseBeforeDef {
                index: 0,
                control: true,
            }]
        );
    }

    #[test]
    fn graph_order_is_free_but_cycles_are_not() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let x = b.op("Placeholder", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
        let first = b.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);
        let second = b.op("Neg", &[x], &[], AttrDict::new(), &[f32_scalar()]);

        // A use of a later node is fine in a graph.
        module.nodes[first.node].operands[0] = second.value(0).unwrap();
        assert_eq!(verify_module(&module), Ok(()));

        module.nodes[second.node].operands[0] = first.value(0).unwrap();
        let err = verify_module(&module).unwrap_err();
        assert_eq!(err.diagnostics.len(), 1);
        assert_eq!(err.diagnostics[0].kind, VerifyErrorKind::DependencyCycle);
        assert_eq!(err.diagnostics[0].node, Some(first.node));
    }

    #[test]
    fn graph_cycles_through_nested_regions_are_found() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let if_node = b.if_region(
            Flavor::Plain,
            pred,
            &[],
            &[f32_scalar()],
            |t| {
                let c = t.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
                t.yield_values(&[c], &[]);
            },
            |e| {
                let c = e.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap();
                e.yield_values(&[c], &[]);
            },
        );
        let after = b.op("Neg", &[Value::result(if_node, 0)], &[], AttrDict::new(), &[f32_scalar()]);
        assert_eq!(verify_module(&module), Ok(()));

        let then_region = module.nodes[if_node].regions[0];
        let then_const = module.regions[then_region].nodes[0];
        module.nodes[then_const].control_operands.push(after.control());
        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::DependencyCycle]
        );
    }

    #[test]
    fn port_limit_is_enforced() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let wide = vec![f32_scalar(); MAX_PORTS + 1];
        let node = module
            .builder(g)
            .op("IdentityN", &[], &[], AttrDict::new(), &wide)
            .node;

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::TooManyPorts {
                found: MAX_PORTS + 1
            }]
        );
        assert_eq!(err.diagnostics[0].node, Some(node));
    }

    #[test]
    fn values_from_sibling_regions_are_out_of_scope() {
        let mut module = Module::new();
        let g = module.create_graph(VersionDef::default());
        let mut b = module.builder(g);
        let pred = b.op("Placeholder", &[], &[], AttrDict::new(), &[i1()]).value(0).unwrap();
        let mut leaked = None;
        b.if_region(
            Flavor::Plain,
            pred,
            &[],
            &[],
            |t| {
                leaked = Some(t.op("Const", &[], &[], AttrDict::new(), &[f32_scalar()]).value(0).unwrap());
                t.yield_values(&[], &[]);
            },
            |e| {
                e.yield_values(&[], &[]);
            },
        );
        module
            .builder(g)
            .op("Neg", &[leaked.unwrap()], &[], AttrDict::new(), &[f32_scalar()]);

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err.kinds().collect::<Vec<_>>(),
            vec![&VerifyErrorKind::ValueNotInScope {
                index: 0,
                control: false,
            }]
        );
    }
}
