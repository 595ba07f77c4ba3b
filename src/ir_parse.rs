//! Parser for the canonical text form.
//!
//! Reads what [`crate::ir_print`] writes. Two passes: text → AST, then
//! resolve `%N` and `%aK` references into a [`Module`]. Resolution allocates
//! every node of a graph or function before wiring any operand, so graph
//! bodies may reference nodes that appear later in the text.

use std::collections::HashMap;

use chumsky::prelude::*;

use crate::attr::{Attr, AttrDict};
use crate::ir::{
    FuncId, Function, Module, Node, NodeId, NodeKind, Region, RegionId, RegionOwner, Value, VersionDef,
};
use crate::ir_print::region_label;
use crate::types::{ElementType, FunctionType, Shape, Type, DYNAMIC};

// ─── AST types (first pass) ────────────────────────────────────────────────

/// A parsed value reference (unresolved).
#[derive(Debug, Clone, Copy)]
enum AstValue {
    /// `%3#1`
    Result(usize, usize),
    /// `%3.ctl`
    Control(usize),
    /// `%a2`
    Arg(usize),
    /// `%a2.ctl`
    ArgControl(usize),
}

/// A parsed attribute value. Symbols stay textual until resolution.
#[derive(Debug, Clone)]
enum AstAttr {
    Plain(Attr),
    Symbol(String),
    Array(Vec<AstAttr>),
    Dict(Vec<(String, AstAttr)>),
}

#[derive(Debug, Clone)]
struct AstRegion {
    label: String,
    args: Vec<(usize, Type)>,
    nodes: Vec<AstNode>,
}

#[derive(Debug, Clone)]
struct AstNode {
    number: Option<usize>,
    name: String,
    operands: Vec<AstValue>,
    controls: Vec<AstValue>,
    attrs: Vec<(String, AstAttr)>,
    results: Option<Vec<Type>>,
    regions: Vec<AstRegion>,
    span: SimpleSpan,
}

#[derive(Debug, Clone)]
struct AstParam {
    number: Option<usize>,
    ty: Type,
    attrs: Vec<(String, AstAttr)>,
}

#[derive(Debug, Clone)]
struct AstFunction {
    generic: bool,
    name: String,
    args: Vec<AstParam>,
    results: Vec<AstParam>,
    attributes: Vec<(String, AstAttr)>,
    body: Vec<AstNode>,
    span: SimpleSpan,
}

#[derive(Debug, Clone)]
struct AstGraph {
    version: VersionDef,
    body: Vec<AstNode>,
    span: SimpleSpan,
}

#[derive(Debug, Clone)]
enum AstItem {
    Graph(AstGraph),
    Function(AstFunction),
}

// ─── Parsers ────────────────────────────────────────────────────────────────

type Extra<'src> = extra::Err<Rich<'src, char>>;

/// Whitespace and `//` line comments.
fn ws<'src>() -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    let space = any().filter(|c: &char| c.is_whitespace()).ignored();
    let comment = just("//")
        .then(any().filter(|c: &char| *c != '\n').repeated())
        .ignored();
    space.or(comment).repeated().ignored()
}

fn uint<'src>() -> impl Parser<'src, &'src str, usize, Extra<'src>> + Clone {
    text::int::<_, Extra<'_>>(10)
        .try_map(|s: &str, span| s.parse::<usize>().map_err(|e| Rich::custom(span, e)))
}

fn int64<'src>() -> impl Parser<'src, &'src str, i64, Extra<'src>> + Clone {
    just('-')
        .or_not()
        .then(text::int::<_, Extra<'_>>(10))
        .to_slice()
        .try_map(|s: &str, span| s.parse::<i64>().map_err(|e| Rich::custom(span, e)))
}

/// A run of `[A-Za-z0-9_]`.
fn word<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .to_slice()
}

/// Op names and bare symbols: `AddV2`, `hlo.add`, `my_fn$1`.
fn name<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
        .repeated()
        .at_least(1)
        .to_slice()
}

/// Attribute keys: `T`, `then_branch`, `tfg.name`.
fn key<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
                .repeated(),
        )
        .to_slice()
}

/// Parse a comma-separated list between `open` and `close`.
fn bracketed_list<'src, T: 'src>(
    inner: impl Parser<'src, &'src str, T, Extra<'src>> + Clone,
    open: char,
    close: char,
) -> impl Parser<'src, &'src str, Vec<T>, Extra<'src>> + Clone {
    inner
        .separated_by(just(',').padded_by(ws()))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(open).then(ws()), ws().then(just(close)))
}

fn string_lit<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('"').to('"'),
        just('\\').to('\\'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));
    let plain = any().filter(|c: &char| *c != '"' && *c != '\\');
    plain
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
}

/// `@name` or `@"quoted name"`.
fn symbol_ref<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    just('@').ignore_then(string_lit().or(name().map(|s: &str| s.to_string())))
}

fn element_from_name(name: &str) -> Option<ElementType> {
    ElementType::ALL.into_iter().find(|e| e.name() == name)
}

fn element_type<'src>() -> impl Parser<'src, &'src str, ElementType, Extra<'src>> + Clone {
    let complex = just("complex<")
        .ignore_then(word())
        .then_ignore(just('>'))
        .try_map(|part: &str, span| match part {
            "f32" => Ok(ElementType::Complex64),
            "f64" => Ok(ElementType::Complex128),
            _ => Err(Rich::custom(span, format!("unknown complex part `{part}`"))),
        });
    let simple = word().try_map(|w: &str, span| {
        element_from_name(w).ok_or_else(|| Rich::custom(span, format!("unknown element type `{w}`")))
    });
    complex.or(simple)
}

fn dim<'src>() -> impl Parser<'src, &'src str, i64, Extra<'src>> + Clone {
    just('?').to(DYNAMIC).or(int64())
}

/// `tensor<2x?xf32>`, `tensor<*xi64>`, `tensor<f32>` or `!opaque`.
fn type_<'src>() -> impl Parser<'src, &'src str, Type, Extra<'src>> + Clone {
    let unranked = just("*x").ignore_then(element_type()).map(Type::unranked);
    let ranked = dim()
        .then_ignore(just('x'))
        .repeated()
        .collect::<Vec<_>>()
        .then(element_type())
        .map(|(dims, element)| Type::ranked(element, &dims));
    just("tensor<")
        .ignore_then(unranked.or(ranked))
        .then_ignore(just('>'))
        .or(just("!opaque").to(Type::Opaque))
}

/// `#shape<2x?>`, `#shape<*>`, `#shape<>`.
fn shape<'src>() -> impl Parser<'src, &'src str, Shape, Extra<'src>> + Clone {
    let dims = dim()
        .separated_by(just('x'))
        .collect::<Vec<_>>()
        .map(Shape::Ranked);
    just("#shape<")
        .ignore_then(just('*').to(Shape::Unranked).or(dims))
        .then_ignore(just('>'))
}

/// Ints, or floats when a `.` or exponent is present.
fn number<'src>() -> impl Parser<'src, &'src str, Attr, Extra<'src>> + Clone {
    let digits = any().filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1);
    let frac = just('.').then(digits.clone());
    let exp = one_of("eE").then(one_of("+-").or_not()).then(digits.clone());
    just('-')
        .or_not()
        .then(digits)
        .then(frac.or_not())
        .then(exp.or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            if s.contains(['.', 'e', 'E']) {
                s.parse::<f64>()
                    .map(Attr::Float)
                    .map_err(|e| Rich::custom(span, e))
            } else {
                s.parse::<i64>()
                    .map(Attr::Int)
                    .map_err(|e| Rich::custom(span, e))
            }
        })
}

/// Keywords and bare dtypes.
fn bare_attr<'src>() -> impl Parser<'src, &'src str, Attr, Extra<'src>> + Clone {
    let complex = just("complex<")
        .rewind()
        .ignore_then(element_type())
        .map(Attr::DType);
    let keyword = word().try_map(|w: &str, span| match w {
        "true" => Ok(Attr::Bool(true)),
        "false" => Ok(Attr::Bool(false)),
        "unit" => Ok(Attr::Unit),
        "inf" => Ok(Attr::Float(f64::INFINITY)),
        "nan" => Ok(Attr::Float(f64::NAN)),
        _ => element_from_name(w)
            .map(Attr::DType)
            .ok_or_else(|| Rich::custom(span, format!("unexpected `{w}` in attribute"))),
    });
    complex.or(keyword)
}

fn dict_of<'src>(
    value: impl Parser<'src, &'src str, AstAttr, Extra<'src>> + Clone,
) -> impl Parser<'src, &'src str, Vec<(String, AstAttr)>, Extra<'src>> + Clone {
    let entry = key()
        .then(
            just('=')
                .padded_by(ws())
                .ignore_then(value)
                .or_not(),
        )
        .map(|(k, v): (&str, Option<AstAttr>)| {
            (k.to_string(), v.unwrap_or(AstAttr::Plain(Attr::Unit)))
        });
    bracketed_list(entry, '{', '}')
}

fn attr<'src>() -> impl Parser<'src, &'src str, AstAttr, Extra<'src>> + Clone {
    recursive(|attr| {
        let array = bracketed_list(attr.clone(), '[', ']').map(AstAttr::Array);
        let dict = dict_of(attr).map(AstAttr::Dict);
        choice((
            array,
            dict,
            string_lit().map(|s| AstAttr::Plain(Attr::Str(s))),
            symbol_ref().map(AstAttr::Symbol),
            type_().map(|t| AstAttr::Plain(Attr::Type(t))),
            shape().map(|s| AstAttr::Plain(Attr::Shape(s))),
            just("-inf").to(AstAttr::Plain(Attr::Float(f64::NEG_INFINITY))),
            number().map(AstAttr::Plain),
            bare_attr().map(AstAttr::Plain),
        ))
    })
}

fn attr_dict<'src>() -> impl Parser<'src, &'src str, Vec<(String, AstAttr)>, Extra<'src>> + Clone {
    dict_of(attr())
}

/// Parse a value reference: `%3#0`, `%3.ctl`, `%a1`, `%a1.ctl`.
fn value<'src>() -> impl Parser<'src, &'src str, AstValue, Extra<'src>> + Clone {
    let arg = just("%a")
        .ignore_then(uint())
        .then(just(".ctl").or_not())
        .map(|(k, ctl)| match ctl {
            Some(_) => AstValue::ArgControl(k),
            None => AstValue::Arg(k),
        });
    let node = just('%')
        .ignore_then(uint())
        .then(
            just('#')
                .ignore_then(uint())
                .map(Some)
                .or(just(".ctl").to(None)),
        )
        .map(|(n, index)| match index {
            Some(i) => AstValue::Result(n, i),
            None => AstValue::Control(n),
        });
    arg.or(node)
}

fn region_label_word<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    word().try_map(|w: &str, span| match w {
        "then" | "else" | "branch" | "cond" | "do" => Ok(w),
        _ => Err(Rich::custom(span, format!("`{w}` is not a region label"))),
    })
}

fn node<'src>() -> impl Parser<'src, &'src str, AstNode, Extra<'src>> + Clone {
    recursive(|node| {
        let number = just('%')
            .ignore_then(uint())
            .then_ignore(just('=').padded_by(ws()));

        let region_args = bracketed_list(
            just("%a")
                .ignore_then(uint())
                .then_ignore(just(':').padded_by(ws()))
                .then(type_()),
            '(',
            ')',
        );
        let body = node
            .padded_by(ws())
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just('{').then(ws()), just('}'));
        let region = region_label_word()
            .then(ws().ignore_then(region_args).or_not())
            .then_ignore(ws())
            .then(body)
            .map(|((label, args), nodes)| AstRegion {
                label: label.to_string(),
                args: args.unwrap_or_default(),
                nodes,
            });

        number
            .or_not()
            .then(name())
            .then(bracketed_list(value(), '(', ')'))
            .then(ws().ignore_then(bracketed_list(value(), '[', ']')).or_not())
            .then(ws().ignore_then(attr_dict()).or_not())
            .then(
                ws().ignore_then(just("->"))
                    .ignore_then(ws())
                    .ignore_then(bracketed_list(type_(), '(', ')'))
                    .or_not(),
            )
            .then(ws().ignore_then(region).repeated().collect::<Vec<_>>())
            .map_with(
                |((((((number, name), operands), controls), attrs), results), regions), e| {
                    AstNode {
                        number,
                        name: name.to_string(),
                        operands,
                        controls: controls.unwrap_or_default(),
                        attrs: attrs.unwrap_or_default(),
                        results,
                        regions,
                        span: e.span(),
                    }
                },
            )
    })
}

fn block<'src>() -> impl Parser<'src, &'src str, Vec<AstNode>, Extra<'src>> + Clone {
    node()
        .padded_by(ws())
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just('{').then(ws()), just('}'))
}

fn graph<'src>() -> impl Parser<'src, &'src str, AstGraph, Extra<'src>> + Clone {
    let field = |k: &'static str| just(k).then(just('=').padded_by(ws()));
    let comma = just(',').padded_by(ws());
    let version = field("producer")
        .ignore_then(int64())
        .then_ignore(comma.clone())
        .then_ignore(field("min_consumer"))
        .then(int64())
        .then(
            comma
                .ignore_then(field("bad_consumers"))
                .ignore_then(bracketed_list(int64(), '[', ']'))
                .or_not(),
        )
        .delimited_by(just('(').then(ws()), ws().then(just(')')))
        .map(|((producer, min_consumer), bad)| VersionDef {
            producer,
            min_consumer,
            bad_consumers: bad.unwrap_or_default(),
        });

    just("graph")
        .ignore_then(ws())
        .ignore_then(just("version"))
        .ignore_then(ws())
        .ignore_then(version)
        .then_ignore(ws())
        .then(block())
        .map_with(|(version, body), e| AstGraph {
            version,
            body,
            span: e.span(),
        })
}

fn function<'src>() -> impl Parser<'src, &'src str, AstFunction, Extra<'src>> + Clone {
    let param_attrs = ws().ignore_then(attr_dict()).or_not();
    let arg = just("%a")
        .ignore_then(uint())
        .then_ignore(just(':').padded_by(ws()))
        .then(type_())
        .then(param_attrs.clone())
        .map(|((number, ty), attrs)| AstParam {
            number: Some(number),
            ty,
            attrs: attrs.unwrap_or_default(),
        });
    let result = type_().then(param_attrs).map(|(ty, attrs)| AstParam {
        number: None,
        ty,
        attrs: attrs.unwrap_or_default(),
    });

    just("func")
        .ignore_then(ws())
        .ignore_then(just("generic").then(ws()).or_not().map(|g| g.is_some()))
        .then(symbol_ref())
        .then_ignore(ws())
        .then(bracketed_list(arg, '(', ')'))
        .then_ignore(just("->").padded_by(ws()))
        .then(bracketed_list(result, '(', ')'))
        .then(
            ws().ignore_then(just("attributes"))
                .ignore_then(ws())
                .ignore_then(attr_dict())
                .or_not(),
        )
        .then_ignore(ws())
        .then(block())
        .map_with(
            |(((((generic, name), args), results), attributes), body), e| AstFunction {
                generic,
                name,
                args,
                results,
                attributes: attributes.unwrap_or_default(),
                body,
                span: e.span(),
            },
        )
}

fn program<'src>() -> impl Parser<'src, &'src str, Vec<AstItem>, Extra<'src>> + Clone {
    choice((graph().map(AstItem::Graph), function().map(AstItem::Function)))
        .padded_by(ws())
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
}

// ─── Resolution (second pass) ──────────────────────────────────────────────

/// Parse error with a `line:column` location.
#[derive(Debug)]
pub struct ParseError {
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

fn error_at(src: &str, offset: usize, message: impl std::fmt::Display) -> ParseError {
    let before = &src[..offset.min(src.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    ParseError {
        message: format!("{line}:{column}: {message}"),
    }
}

/// Parse a module from its canonical text form.
pub fn parse_module(input: &str) -> Result<Module, ParseError> {
    let items = program().parse(input).into_result().map_err(|errs| {
        let msgs: Vec<String> = errs
            .into_iter()
            .map(|e| error_at(input, e.span().start, &e).message)
            .collect();
        ParseError {
            message: msgs.join("\n"),
        }
    })?;

    let mut module = Module::new();
    let mut seen_graph = false;
    for item in &items {
        let mut resolver = Resolver::new(&mut module, input);
        match item {
            AstItem::Graph(g) => {
                if seen_graph {
                    return Err(error_at(input, g.span.start, "a module holds at most one graph"));
                }
                seen_graph = true;
                resolver.graph(g)?;
            }
            AstItem::Function(f) => resolver.function(f)?,
        }
    }
    tracing::debug!(functions = module.functions().count(), "parsed module");
    Ok(module)
}

/// Resolves one graph or function. `%N` and `%aK` are scoped to it.
struct Resolver<'m, 'src> {
    module: &'m mut Module,
    src: &'src str,
    nodes: HashMap<usize, NodeId>,
    args: HashMap<usize, (RegionId, usize)>,
}

impl<'m, 'src> Resolver<'m, 'src> {
    fn new(module: &'m mut Module, src: &'src str) -> Self {
        Self {
            module,
            src,
            nodes: HashMap::new(),
            args: HashMap::new(),
        }
    }

    fn graph(&mut self, g: &AstGraph) -> Result<(), ParseError> {
        let body = self.module.create_graph(g.version.clone());
        self.body(body, &g.body)
    }

    fn function(&mut self, f: &AstFunction) -> Result<(), ParseError> {
        let id = self.module.create_function();
        let name = self.module.intern(&f.name);
        self.module.set_function_name(id, name);
        self.module.set_function_type(
            id,
            FunctionType::new(
                f.args.iter().map(|a| a.ty.clone()).collect(),
                f.results.iter().map(|r| r.ty.clone()).collect(),
            ),
        );
        self.module.set_generic(id, f.generic);

        let body = self.module.function(id).body();
        for (i, arg) in f.args.iter().enumerate() {
            if let Some(k) = arg.number {
                self.bind_arg(k, body, i, f.span)?;
            }
            let attrs = self.dict(&arg.attrs);
            self.module.function_mut(id).arg_attrs[i] = attrs;
        }
        for (i, result) in f.results.iter().enumerate() {
            let attrs = self.dict(&result.attrs);
            self.module.function_mut(id).res_attrs[i] = attrs;
        }
        for (k, v) in &f.attributes {
            let value = self.attr(v);
            self.function_attr(id, k, value)
                .map_err(|msg| error_at(self.src, f.span.start, msg))?;
        }
        self.body(body, &f.body)
    }

    fn function_attr(&mut self, id: FuncId, key: &str, value: Attr) -> Result<(), String> {
        let func: &mut Function = self.module.function_mut(id);
        let bad = || format!("malformed function attribute `{key}`");
        match key {
            "description" => func.description = Some(value.as_str().ok_or_else(bad)?.to_string()),
            "gradient" => func.gradient = Some(value.as_symbol().ok_or_else(bad)?),
            "is_stateful" => {
                func.is_stateful = match value {
                    Attr::Unit => true,
                    v => v.truthiness().ok_or_else(bad)?,
                }
            }
            "control_output" => {
                let items = value.as_array().ok_or_else(bad)?;
                func.control_output = items
                    .iter()
                    .map(|a| a.as_str().map(str::to_string))
                    .collect::<Option<_>>()
                    .ok_or_else(bad)?;
            }
            "resource_arg_unique_ids" => {
                let items = value.as_array().ok_or_else(bad)?;
                func.resource_arg_unique_ids = items
                    .iter()
                    .map(|pair| match pair.as_array()? {
                        [a, b] => Some((a.as_int()?, b.as_int()?)),
                        _ => None,
                    })
                    .collect::<Option<_>>()
                    .ok_or_else(bad)?;
            }
            _ => return Err(format!("unknown function attribute `{key}`")),
        }
        Ok(())
    }

    fn body(&mut self, region: RegionId, nodes: &[AstNode]) -> Result<(), ParseError> {
        let mut allocated = Vec::new();
        self.allocate(region, nodes, &mut allocated)?;
        for (id, ast) in allocated {
            let operands = self.values(&ast.operands, ast.span)?;
            let controls = self.values(&ast.controls, ast.span)?;
            let node = &mut self.module.nodes[id];
            node.operands = operands;
            node.control_operands = controls;
        }
        Ok(())
    }

    /// Create every node under `region` in pre-order, without operands.
    fn allocate<'a>(
        &mut self,
        region: RegionId,
        nodes: &'a [AstNode],
        out: &mut Vec<(NodeId, &'a AstNode)>,
    ) -> Result<(), ParseError> {
        for ast in nodes {
            let kind = NodeKind::from_name(&ast.name);
            let src = self.src;
            let err = |msg: String| error_at(src, ast.span.start, msg);

            let results = match (&ast.results, kind.is_terminator()) {
                (Some(_), true) => return Err(err(format!("`{}` has no results", ast.name))),
                (None, false) => return Err(err(format!("`{}` is missing `-> (...)`", ast.name))),
                (Some(types), false) => types.clone(),
                (None, true) => Vec::new(),
            };
            match (ast.number, kind.is_terminator()) {
                (Some(_), true) => return Err(err(format!("`{}` cannot be named", ast.name))),
                (None, false) => return Err(err(format!("`{}` needs a `%N =` name", ast.name))),
                _ => {}
            }
            if !ast.regions.is_empty() && !kind.is_region_cf() {
                return Err(err(format!("`{}` does not take regions", ast.name)));
            }

            let attrs = self.dict(&ast.attrs);
            let id = self.module.push_node(Node {
                parent: region,
                kind: kind.clone(),
                operands: Vec::new(),
                control_operands: Vec::new(),
                attrs,
                results,
                regions: Vec::new(),
            });
            if let Some(n) = ast.number
                && self.nodes.insert(n, id).is_some()
            {
                return Err(error_at(self.src, ast.span.start, format!("%{n} is defined twice")));
            }
            out.push((id, ast));

            for (i, r) in ast.regions.iter().enumerate() {
                let expected = region_label(&kind, i);
                if r.label != expected {
                    return Err(error_at(
                        self.src,
                        ast.span.start,
                        format!("expected region `{expected}`, found `{}`", r.label),
                    ));
                }
                let types: Vec<Type> = r.args.iter().map(|(_, t)| t.clone()).collect();
                let sub = self
                    .module
                    .new_region(RegionOwner::Node(id), Region::paired_args(&types));
                self.module.nodes[id].regions.push(sub);
                for (k, (number, _)) in r.args.iter().enumerate() {
                    self.bind_arg(*number, sub, k, ast.span)?;
                }
                self.allocate(sub, &r.nodes, out)?;
            }
        }
        Ok(())
    }

    fn bind_arg(
        &mut self,
        number: usize,
        region: RegionId,
        index: usize,
        span: SimpleSpan,
    ) -> Result<(), ParseError> {
        if self.args.insert(number, (region, index)).is_some() {
            return Err(error_at(self.src, span.start, format!("%a{number} is defined twice")));
        }
        Ok(())
    }

    fn values(&self, values: &[AstValue], span: SimpleSpan) -> Result<Vec<Value>, ParseError> {
        values.iter().map(|&v| self.value(v, span)).collect()
    }

    fn value(&self, value: AstValue, span: SimpleSpan) -> Result<Value, ParseError> {
        let undefined = |what: String| error_at(self.src, span.start, format!("undefined value {what}"));
        match value {
            AstValue::Result(n, i) => {
                let node = *self.nodes.get(&n).ok_or_else(|| undefined(format!("%{n}")))?;
                if i >= self.module.nodes[node].results.len() {
                    return Err(error_at(self.src, span.start, format!("%{n} has no result #{i}")));
                }
                Ok(Value::result(node, i))
            }
            AstValue::Control(n) => {
                let node = *self.nodes.get(&n).ok_or_else(|| undefined(format!("%{n}")))?;
                Ok(Value::control(node))
            }
            AstValue::Arg(k) => {
                let (region, i) = *self.args.get(&k).ok_or_else(|| undefined(format!("%a{k}")))?;
                Ok(Value::arg(region, 2 * i))
            }
            AstValue::ArgControl(k) => {
                let (region, i) = *self.args.get(&k).ok_or_else(|| undefined(format!("%a{k}.ctl")))?;
                Ok(Value::arg(region, 2 * i + 1))
            }
        }
    }

    fn dict(&mut self, entries: &[(String, AstAttr)]) -> AttrDict {
        let mut dict = AttrDict::new();
        for (k, v) in entries {
            let value = self.attr(v);
            dict.insert(k, value);
        }
        dict
    }

    fn attr(&mut self, attr: &AstAttr) -> Attr {
        match attr {
            AstAttr::Plain(a) => a.clone(),
            AstAttr::Symbol(name) => Attr::Symbol(self.module.intern(name)),
            AstAttr::Array(items) => Attr::Array(items.iter().map(|a| self.attr(a)).collect()),
            AstAttr::Dict(entries) => Attr::Dict(self.dict(entries)),
        }
    }
}
