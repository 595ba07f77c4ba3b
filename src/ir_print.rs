//! Canonical text form.
//!
//! Nodes are numbered `%0, %1, ...` in pre-order within each graph or
//! function; data arguments are `%a0, %a1, ...` in the same order. A node's
//! data results are `%N#i` and its control token is `%N.ctl`; an argument's
//! paired control token is `%aK.ctl`.
//!
//! ```text
//! func @f(%a0: tensor<i1>, %a1: tensor<f32>) -> (tensor<f32>) {
//!   %0 = IfRegion(%a0) -> (tensor<f32>) then {
//!     yield(%a1)
//!   } else {
//!     %1 = Neg(%a1) -> (tensor<f32>)
//!     yield(%1#0)
//!   }
//!   return(%0#0) [%a1.ctl]
//! }
//! ```

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::attr::{Attr, AttrDict};
use crate::ir::{FuncId, Module, NodeId, NodeKind, RegionId, Value};

const INDENT: &str = "  ";

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(graph) = self.graph() {
            let mut p = Printer::new(self, graph.body, 0);
            let v = &graph.version;
            write!(
                f,
                "graph version(producer = {}, min_consumer = {}",
                v.producer, v.min_consumer
            )?;
            if !v.bad_consumers.is_empty() {
                f.write_str(", bad_consumers = [")?;
                for (i, c) in v.bad_consumers.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("]")?;
            }
            f.write_str(") {\n")?;
            p.region_body(f, graph.body, 1)?;
            f.write_str("}\n")?;
        }
        for func in self.functions() {
            self.fmt_function(f, func)?;
        }
        Ok(())
    }
}

/// Render a module in its canonical text form.
pub fn print_module(module: &Module) -> String {
    module.to_string()
}

impl Module {
    fn fmt_function(&self, f: &mut fmt::Formatter<'_>, func: FuncId) -> fmt::Result {
        let function = self.function(func);
        let body = function.body();
        let mut p = Printer::new(self, body, function.function_type().inputs.len());

        f.write_str("func ")?;
        if function.is_generic() {
            f.write_str("generic ")?;
        }
        f.write_str("@")?;
        fmt_symbol(f, function.name().map_or("", |n| self.symbol_name(n)))?;

        f.write_str("(")?;
        for (i, ty) in function.function_type().inputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%a{i}: {ty}")?;
            if let Some(attrs) = function.arg_attrs.get(i).filter(|a| !a.is_empty()) {
                f.write_str(" ")?;
                p.fmt_dict(f, attrs)?;
            }
        }
        f.write_str(") -> (")?;
        for (i, ty) in function.function_type().results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
            if let Some(attrs) = function.res_attrs.get(i).filter(|a| !a.is_empty()) {
                f.write_str(" ")?;
                p.fmt_dict(f, attrs)?;
            }
        }
        f.write_str(")")?;

        let extra = function_attrs(self, func);
        if !extra.is_empty() {
            f.write_str(" attributes ")?;
            p.fmt_dict(f, &extra)?;
        }
        f.write_str(" {\n")?;
        p.region_body(f, body, 1)?;
        f.write_str("}\n")
    }
}

/// Function-level fields that print in the `attributes {...}` clause.
pub(crate) fn function_attrs(module: &Module, func: FuncId) -> AttrDict {
    let f = module.function(func);
    let mut attrs = AttrDict::new();
    if let Some(description) = &f.description {
        attrs.insert("description", Attr::Str(description.clone()));
    }
    if let Some(gradient) = f.gradient {
        attrs.insert("gradient", Attr::Symbol(gradient));
    }
    if f.is_stateful {
        attrs.insert("is_stateful", Attr::Unit);
    }
    if !f.control_output.is_empty() {
        attrs.insert(
            "control_output",
            Attr::Array(f.control_output.iter().cloned().map(Attr::Str).collect()),
        );
    }
    if !f.resource_arg_unique_ids.is_empty() {
        attrs.insert(
            "resource_arg_unique_ids",
            Attr::Array(
                f.resource_arg_unique_ids
                    .iter()
                    .map(|&(arg, id)| Attr::Array(vec![Attr::Int(arg), Attr::Int(id)]))
                    .collect(),
            ),
        );
    }
    attrs
}

/// Labels of a region node's regions, in order.
pub(crate) fn region_label(kind: &NodeKind, index: usize) -> &'static str {
    match (kind, index) {
        (NodeKind::IfRegion(_), 0) => "then",
        (NodeKind::IfRegion(_), _) => "else",
        (NodeKind::WhileRegion(_), 0) => "cond",
        (NodeKind::WhileRegion(_) | NodeKind::ForRegion, _) => "do",
        _ => "branch",
    }
}

// ─── Printer ────────────────────────────────────────────────────────────────

struct Printer<'m> {
    module: &'m Module,
    node_names: HashMap<NodeId, usize>,
    /// Number of the first data argument of each region.
    arg_base: HashMap<RegionId, usize>,
}

impl<'m> Printer<'m> {
    fn new(module: &'m Module, body: RegionId, body_args: usize) -> Self {
        let mut p = Self {
            module,
            node_names: HashMap::new(),
            arg_base: HashMap::new(),
        };
        p.arg_base.insert(body, 0);
        let mut next_arg = body_args;
        p.number(body, &mut next_arg);
        p
    }

    fn number(&mut self, region: RegionId, next_arg: &mut usize) {
        let module = self.module;
        for &node in &module.regions[region].nodes {
            let n = self.node_names.len();
            self.node_names.insert(node, n);
            for &sub in &module.nodes[node].regions {
                self.arg_base.insert(sub, *next_arg);
                *next_arg += module.regions[sub].data_arg_count();
                self.number(sub, next_arg);
            }
        }
    }

    fn fmt_value(&self, f: &mut impl Write, value: Value) -> fmt::Result {
        match value {
            Value::Result(r) => match self.node_names.get(&r.node) {
                Some(n) => write!(f, "%{n}#{}", r.index),
                None => write!(f, "%?{}#{}", r.node.index(), r.index),
            },
            Value::Control(node) => match self.node_names.get(&node) {
                Some(n) => write!(f, "%{n}.ctl"),
                None => write!(f, "%?{}.ctl", node.index()),
            },
            Value::Arg(a) => {
                let k = a.index as usize / 2;
                let ctl = if a.index % 2 == 1 { ".ctl" } else { "" };
                match self.arg_base.get(&a.region) {
                    Some(base) => write!(f, "%a{}{ctl}", base + k),
                    None => write!(f, "%?a{}{ctl}", k),
                }
            }
        }
    }

    fn fmt_values(&self, f: &mut impl Write, values: &[Value]) -> fmt::Result {
        for (i, &v) in values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.fmt_value(f, v)?;
        }
        Ok(())
    }

    fn region_body(&mut self, f: &mut impl Write, region: RegionId, depth: usize) -> fmt::Result {
        for &node in &self.module.regions[region].nodes {
            self.fmt_node(f, node, depth)?;
        }
        Ok(())
    }

    fn fmt_node(&mut self, f: &mut impl Write, node: NodeId, depth: usize) -> fmt::Result {
        let module = self.module;
        let n = &module.nodes[node];
        let indent = INDENT.repeat(depth);
        f.write_str(&indent)?;

        if !n.kind.is_terminator() {
            write!(f, "%{} = ", self.node_names[&node])?;
        }
        f.write_str(&n.kind.name())?;
        f.write_str("(")?;
        self.fmt_values(f, &n.operands)?;
        f.write_str(")")?;
        if !n.control_operands.is_empty() {
            f.write_str(" [")?;
            self.fmt_values(f, &n.control_operands)?;
            f.write_str("]")?;
        }
        if !n.attrs.is_empty() {
            f.write_str(" ")?;
            self.fmt_dict(f, &n.attrs)?;
        }
        if !n.kind.is_terminator() {
            f.write_str(" -> (")?;
            for (i, ty) in n.results.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{ty}")?;
            }
            f.write_str(")")?;
        }

        for (i, &sub) in n.regions.iter().enumerate() {
            write!(f, " {}", region_label(&n.kind, i))?;
            let args = module.regions[sub].data_arg_types();
            if !args.is_empty() {
                let base = self.arg_base[&sub];
                f.write_str("(")?;
                for (k, ty) in args.iter().enumerate() {
                    if k > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "%a{}: {ty}", base + k)?;
                }
                f.write_str(")")?;
            }
            f.write_str(" {\n")?;
            self.region_body(f, sub, depth + 1)?;
            f.write_str(&indent)?;
            f.write_str("}")?;
        }
        f.write_str("\n")
    }

    fn fmt_dict(&self, f: &mut impl Write, dict: &AttrDict) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in dict.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(key)?;
            if *value != Attr::Unit {
                f.write_str(" = ")?;
                self.fmt_attr(f, value)?;
            }
        }
        f.write_str("}")
    }

    fn fmt_attr(&self, f: &mut impl Write, attr: &Attr) -> fmt::Result {
        match attr {
            Attr::Unit => f.write_str("unit"),
            Attr::Bool(b) => write!(f, "{b}"),
            Attr::Int(i) => write!(f, "{i}"),
            Attr::Float(x) => fmt_float(f, *x),
            Attr::Str(s) => fmt_string(f, s),
            Attr::DType(e) => write!(f, "{e}"),
            Attr::Type(t) => write!(f, "{t}"),
            Attr::Shape(s) => write!(f, "{s}"),
            Attr::Symbol(s) => {
                f.write_str("@")?;
                fmt_symbol(f, self.module.symbol_name(*s))
            }
            Attr::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.fmt_attr(f, item)?;
                }
                f.write_str("]")
            }
            Attr::Dict(d) => self.fmt_dict(f, d),
        }
    }
}

/// Floats always carry a `.` or exponent so they never read back as ints.
fn fmt_float(f: &mut impl Write, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("nan")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{x:?}")
    }
}

pub(crate) fn is_bare_symbol(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
}

fn fmt_symbol(f: &mut impl Write, name: &str) -> fmt::Result {
    if is_bare_symbol(name) {
        f.write_str(name)
    } else {
        fmt_string(f, name)
    }
}

fn fmt_string(f: &mut impl Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}
