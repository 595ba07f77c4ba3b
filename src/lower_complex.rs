//! Lowering of complex arithmetic to real arithmetic.
//!
//! Each complex op becomes `hlo.*` ops over the real and imaginary parts of
//! its operands, recombined with `hlo.complex`. Transcendentals go through
//! exponential identities; `cosh`/`sinh` are built from `exp(b)` and
//! `exp(-b)`.

use crate::ir::{Module, RegionId};
use crate::rewrite::{
    PatternError, PatternSet, Pattern, ResultRule, RewriteStats, TargetOp, Tpl,
    apply_patterns_greedily,
};

// ─── Target op library ──────────────────────────────────────────────────────

const fn unary(name: &'static str, result: ResultRule) -> TargetOp {
    TargetOp {
        name,
        arity: 1,
        result,
    }
}

const fn binary(name: &'static str, result: ResultRule) -> TargetOp {
    TargetOp {
        name,
        arity: 2,
        result,
    }
}

pub static HLO_REAL: TargetOp = unary("hlo.real", ResultRule::RealPart);
pub static HLO_IMAG: TargetOp = unary("hlo.imag", ResultRule::RealPart);
pub static HLO_COMPLEX: TargetOp = binary("hlo.complex", ResultRule::ComplexOf);
pub static HLO_ADD: TargetOp = binary("hlo.add", ResultRule::SameAsOperand);
pub static HLO_SUBTRACT: TargetOp = binary("hlo.subtract", ResultRule::SameAsOperand);
pub static HLO_MULTIPLY: TargetOp = binary("hlo.multiply", ResultRule::SameAsOperand);
pub static HLO_DIVIDE: TargetOp = binary("hlo.divide", ResultRule::SameAsOperand);
pub static HLO_NEGATE: TargetOp = unary("hlo.negate", ResultRule::SameAsOperand);
pub static HLO_EXPONENTIAL: TargetOp = unary("hlo.exponential", ResultRule::SameAsOperand);
pub static HLO_SINE: TargetOp = unary("hlo.sine", ResultRule::SameAsOperand);
pub static HLO_COSINE: TargetOp = unary("hlo.cosine", ResultRule::SameAsOperand);
pub static HLO_SQRT: TargetOp = unary("hlo.sqrt", ResultRule::SameAsOperand);
pub static HLO_CONSTANT_LIKE: TargetOp = unary("hlo.constant_like", ResultRule::SameAsOperand);

// ─── Patterns ───────────────────────────────────────────────────────────────

// Locals 0..4 of binary patterns: re(x), im(x), re(y), im(y).
// Locals 0..2 of unary patterns: re(x), im(x).
const A: Tpl = Tpl::Local(0);
const B: Tpl = Tpl::Local(1);
const C: Tpl = Tpl::Local(2);
const D: Tpl = Tpl::Local(3);

/// Builds `exp(b)`, `exp(-b)`, `cosh(b)` and `sinh(b)` as locals 2..6.
macro_rules! hyperbolic_locals {
    () => {
        &[
            Tpl::Op(&HLO_REAL, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_IMAG, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_EXPONENTIAL, &[B]),
            Tpl::Op(&HLO_EXPONENTIAL, &[Tpl::Op(&HLO_NEGATE, &[B])]),
            Tpl::ConstantLike(&HLO_CONSTANT_LIKE, 0.5, &A),
            // cosh(b) = (e^b + e^-b) / 2
            Tpl::Op(
                &HLO_MULTIPLY,
                &[Tpl::Op(&HLO_ADD, &[Tpl::Local(2), Tpl::Local(3)]), Tpl::Local(4)],
            ),
            // sinh(b) = (e^b - e^-b) / 2
            Tpl::Op(
                &HLO_MULTIPLY,
                &[Tpl::Op(&HLO_SUBTRACT, &[Tpl::Local(2), Tpl::Local(3)]), Tpl::Local(4)],
            ),
        ]
    };
}

macro_rules! split_unary {
    () => {
        &[
            Tpl::Op(&HLO_REAL, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_IMAG, &[Tpl::Operand(0)]),
        ]
    };
}

macro_rules! split_binary {
    ($($extra:expr),* $(,)?) => {
        &[
            Tpl::Op(&HLO_REAL, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_IMAG, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_REAL, &[Tpl::Operand(1)]),
            Tpl::Op(&HLO_IMAG, &[Tpl::Operand(1)]),
            $($extra,)*
        ]
    };
}

pub static COMPLEX_PATTERNS: &[Pattern] = &[
    Pattern {
        name: "complex-add",
        roots: &["Add", "AddV2"],
        arity: 2,
        locals: split_binary!(),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[Tpl::Op(&HLO_ADD, &[A, C]), Tpl::Op(&HLO_ADD, &[B, D])],
        ),
    },
    Pattern {
        name: "complex-sub",
        roots: &["Sub"],
        arity: 2,
        locals: split_binary!(),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[Tpl::Op(&HLO_SUBTRACT, &[A, C]), Tpl::Op(&HLO_SUBTRACT, &[B, D])],
        ),
    },
    // (a+bi)(c+di) with three multiplies:
    // k1 = c(a+b), k2 = a(d-c), k3 = b(c+d); re = k1-k3, im = k1+k2.
    Pattern {
        name: "complex-mul",
        roots: &["Mul"],
        arity: 2,
        locals: split_binary!(
            Tpl::Op(&HLO_MULTIPLY, &[C, Tpl::Op(&HLO_ADD, &[A, B])]),
            Tpl::Op(&HLO_MULTIPLY, &[A, Tpl::Op(&HLO_SUBTRACT, &[D, C])]),
            Tpl::Op(&HLO_MULTIPLY, &[B, Tpl::Op(&HLO_ADD, &[C, D])]),
        ),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[
                Tpl::Op(&HLO_SUBTRACT, &[Tpl::Local(4), Tpl::Local(6)]),
                Tpl::Op(&HLO_ADD, &[Tpl::Local(4), Tpl::Local(5)]),
            ],
        ),
    },
    // (a+bi)/(c+di) = ((ac+bd) + (bc-ad)i) / (c²+d²)
    Pattern {
        name: "complex-div",
        roots: &["Div", "RealDiv"],
        arity: 2,
        locals: split_binary!(Tpl::Op(
            &HLO_ADD,
            &[Tpl::Op(&HLO_MULTIPLY, &[C, C]), Tpl::Op(&HLO_MULTIPLY, &[D, D])],
        )),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[
                Tpl::Op(
                    &HLO_DIVIDE,
                    &[
                        Tpl::Op(
                            &HLO_ADD,
                            &[Tpl::Op(&HLO_MULTIPLY, &[A, C]), Tpl::Op(&HLO_MULTIPLY, &[B, D])],
                        ),
                        Tpl::Local(4),
                    ],
                ),
                Tpl::Op(
                    &HLO_DIVIDE,
                    &[
                        Tpl::Op(
                            &HLO_SUBTRACT,
                            &[Tpl::Op(&HLO_MULTIPLY, &[B, C]), Tpl::Op(&HLO_MULTIPLY, &[A, D])],
                        ),
                        Tpl::Local(4),
                    ],
                ),
            ],
        ),
    },
    Pattern {
        name: "complex-neg",
        roots: &["Neg"],
        arity: 1,
        locals: split_unary!(),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[Tpl::Op(&HLO_NEGATE, &[A]), Tpl::Op(&HLO_NEGATE, &[B])],
        ),
    },
    Pattern {
        name: "complex-conj",
        roots: &["Conj"],
        arity: 1,
        locals: split_unary!(),
        result: Tpl::Op(&HLO_COMPLEX, &[A, Tpl::Op(&HLO_NEGATE, &[B])]),
    },
    // e^(a+bi) = e^a (cos b + i sin b)
    Pattern {
        name: "complex-exp",
        roots: &["Exp"],
        arity: 1,
        locals: &[
            Tpl::Op(&HLO_REAL, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_IMAG, &[Tpl::Operand(0)]),
            Tpl::Op(&HLO_EXPONENTIAL, &[A]),
        ],
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[
                Tpl::Op(&HLO_MULTIPLY, &[Tpl::Local(2), Tpl::Op(&HLO_COSINE, &[B])]),
                Tpl::Op(&HLO_MULTIPLY, &[Tpl::Local(2), Tpl::Op(&HLO_SINE, &[B])]),
            ],
        ),
    },
    // sin(a+bi) = sin a cosh b + i cos a sinh b
    Pattern {
        name: "complex-sin",
        roots: &["Sin"],
        arity: 1,
        locals: hyperbolic_locals!(),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[
                Tpl::Op(&HLO_MULTIPLY, &[Tpl::Op(&HLO_SINE, &[A]), Tpl::Local(5)]),
                Tpl::Op(&HLO_MULTIPLY, &[Tpl::Op(&HLO_COSINE, &[A]), Tpl::Local(6)]),
            ],
        ),
    },
    // cos(a+bi) = cos a cosh b - i sin a sinh b
    Pattern {
        name: "complex-cos",
        roots: &["Cos"],
        arity: 1,
        locals: hyperbolic_locals!(),
        result: Tpl::Op(
            &HLO_COMPLEX,
            &[
                Tpl::Op(&HLO_MULTIPLY, &[Tpl::Op(&HLO_COSINE, &[A]), Tpl::Local(5)]),
                Tpl::Op(
                    &HLO_NEGATE,
                    &[Tpl::Op(&HLO_MULTIPLY, &[Tpl::Op(&HLO_SINE, &[A]), Tpl::Local(6)])],
                ),
            ],
        ),
    },
    // |a+bi| = sqrt(a² + b²)
    Pattern {
        name: "complex-abs",
        roots: &["ComplexAbs"],
        arity: 1,
        locals: split_unary!(),
        result: Tpl::Op(
            &HLO_SQRT,
            &[Tpl::Op(
                &HLO_ADD,
                &[Tpl::Op(&HLO_MULTIPLY, &[A, A]), Tpl::Op(&HLO_MULTIPLY, &[B, B])],
            )],
        ),
    },
];

/// The validated complex-lowering pattern set.
pub fn complex_patterns() -> Result<PatternSet, PatternError> {
    PatternSet::new(COMPLEX_PATTERNS)
}

/// Lower every complex op under `region`.
pub fn lower_complex(module: &mut Module, region: RegionId) -> Result<RewriteStats, PatternError> {
    let patterns = complex_patterns()?;
    Ok(apply_patterns_greedily(module, region, &patterns))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::attr::AttrDict;
    use crate::ir::{FuncId, NodeKind, Value};
    use crate::types::{ElementType, FunctionType, Type};
    use crate::verify::verify_module;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum V {
        R(f64),
        C(f64, f64),
    }

    fn real(v: V) -> f64 {
        match v {
            V::R(x) => x,
            V::C(..) => panic!("expected a real value, got {v:?}"),
        }
    }

    /// Evaluate a straight-line function body over scalars.
    fn eval(module: &Module, f: FuncId, args: &[V]) -> Vec<V> {
        let body = module.function(f).body();
        let mut env: HashMap<Value, V> = HashMap::new();
        for (i, &a) in args.iter().enumerate() {
            env.insert(Value::arg(body, 2 * i), a);
        }
        for &nid in &module.regions[body].nodes {
            let node = &module.nodes[nid];
            let ins: Vec<V> = node.operands.iter().map(|v| env[v]).collect();
            let name = match &node.kind {
                NodeKind::Return => return ins,
                NodeKind::Op(name) => name.as_str(),
                other => panic!("unexpected {other:?}"),
            };
            let out = match name {
                "hlo.real" => match ins[0] {
                    V::C(re, _) => V::R(re),
                    V::R(_) => panic!("real of real"),
                },
                "hlo.imag" => match ins[0] {
                    V::C(_, im) => V::R(im),
                    V::R(_) => panic!("imag of real"),
                },
                "hlo.complex" => V::C(real(ins[0]), real(ins[1])),
                "hlo.add" => V::R(real(ins[0]) + real(ins[1])),
                "hlo.subtract" => V::R(real(ins[0]) - real(ins[1])),
                "hlo.multiply" => V::R(real(ins[0]) * real(ins[1])),
                "hlo.divide" => V::R(real(ins[0]) / real(ins[1])),
                "hlo.negate" => V::R(-real(ins[0])),
                "hlo.exponential" => V::R(real(ins[0]).exp()),
                "hlo.sine" => V::R(real(ins[0]).sin()),
                "hlo.cosine" => V::R(real(ins[0]).cos()),
                "hlo.sqrt" => V::R(real(ins[0]).sqrt()),
                "hlo.constant_like" => match node.attrs.get("value") {
                    Some(crate::attr::Attr::Float(x)) => V::R(*x),
                    other => panic!("bad constant {other:?}"),
                },
                other => panic!("op {other} was not lowered"),
            };
            env.insert(Value::result(nid, 0), out);
        }
        panic!("no return");
    }

    /// `f(x, y) = op(x, y)` or `f(x) = op(x)` over scalars of `operand`.
    fn single_op(
        op: &str,
        arity: usize,
        operand: ElementType,
        result: ElementType,
    ) -> (Module, FuncId) {
        let mut module = Module::new();
        let f = module.create_function();
        let name = module.intern("f");
        module.set_function_name(f, name);
        module.set_function_type(
            f,
            FunctionType::new(vec![Type::scalar(operand); arity], vec![Type::scalar(result)]),
        );
        let mut b = module.function_builder(f);
        let args = b.args();
        let n = b.op(op, &args, &[], AttrDict::new(), &[Type::scalar(result)]);
        let y = n.value(0).unwrap();
        b.ret(&[y], &[]);
        (module, f)
    }

    fn lowered(op: &str, arity: usize, result: ElementType) -> (Module, FuncId) {
        let (mut module, f) = single_op(op, arity, ElementType::Complex128, result);
        let body = module.function(f).body();
        let stats = lower_complex(&mut module, body).unwrap();
        assert_eq!(stats.rewrites, 1, "{op} was not rewritten");
        verify_module(&module).unwrap();
        (module, f)
    }

    fn assert_close(got: V, want: (f64, f64)) {
        let V::C(re, im) = got else {
            panic!("expected complex, got {got:?}");
        };
        assert!((re - want.0).abs() < 1e-12, "re {re} != {}", want.0);
        assert!((im - want.1).abs() < 1e-12, "im {im} != {}", want.1);
    }

    #[test]
    fn pattern_set_is_well_formed() {
        let set = complex_patterns().unwrap();
        assert_eq!(set.len(), COMPLEX_PATTERNS.len());
        assert!(set.find("RealDiv").is_some());
        assert!(set.find("MatMul").is_none());
    }

    #[test]
    fn division_matches_complex_division() {
        let (module, f) = lowered("Div", 2, ElementType::Complex128);
        let out = eval(&module, f, &[V::C(3.0, 4.0), V::C(1.0, 2.0)]);
        assert_close(out[0], (2.2, -0.4));
    }

    #[test]
    fn multiplication_uses_three_real_multiplies() {
        let (module, f) = lowered("Mul", 2, ElementType::Complex128);
        let body = module.function(f).body();
        let multiplies = module.regions[body]
            .nodes
            .iter()
            .filter(|&&n| module.nodes[n].kind == NodeKind::Op("hlo.multiply".into()))
            .count();
        assert_eq!(multiplies, 3);

        let out = eval(&module, f, &[V::C(3.0, 4.0), V::C(1.0, 2.0)]);
        assert_close(out[0], (-5.0, 10.0));
    }

    #[test]
    fn elementwise_ops() {
        let x = V::C(3.0, 4.0);
        let y = V::C(1.0, 2.0);
        for (op, want) in [("AddV2", (4.0, 6.0)), ("Add", (4.0, 6.0)), ("Sub", (2.0, 2.0))] {
            let (module, f) = lowered(op, 2, ElementType::Complex128);
            assert_close(eval(&module, f, &[x, y])[0], want);
        }
        for (op, want) in [("Neg", (-3.0, -4.0)), ("Conj", (3.0, -4.0))] {
            let (module, f) = lowered(op, 1, ElementType::Complex128);
            assert_close(eval(&module, f, &[x])[0], want);
        }
        let (module, f) = lowered("ComplexAbs", 1, ElementType::F64);
        assert_eq!(eval(&module, f, &[x])[0], V::R(5.0));
    }

    #[test]
    fn transcendental_ops() {
        let (a, b) = (0.5_f64, 0.25_f64);
        let z = V::C(a, b);
        let cases = [
            ("Exp", (a.exp() * b.cos(), a.exp() * b.sin())),
            ("Sin", (a.sin() * b.cosh(), a.cos() * b.sinh())),
            ("Cos", (a.cos() * b.cosh(), -(a.sin() * b.sinh()))),
        ];
        for (op, want) in cases {
            let (module, f) = lowered(op, 1, ElementType::Complex128);
            assert_close(eval(&module, f, &[z])[0], want);
        }
    }

    #[test]
    fn real_valued_ops_are_left_alone() {
        let mut module = Module::new();
        let f = module.create_function();
        let t = Type::scalar(ElementType::F32);
        module.set_function_type(f, FunctionType::new(vec![t.clone(), t.clone()], vec![t.clone()]));
        let mut b = module.function_builder(f);
        let (x, y) = (b.arg(0), b.arg(1));
        let n = b.op("Mul", &[x, y], &[], AttrDict::new(), &[t]);
        let out = n.value(0).unwrap();
        b.ret(&[out], &[]);
        let body = module.function(f).body();

        let stats = lower_complex(&mut module, body).unwrap();
        assert_eq!(stats.rewrites, 0);
    }

    #[test]
    fn lowered_multiply_text() {
        let (mut module, f) = single_op("Mul", 2, ElementType::Complex64, ElementType::Complex64);
        let body = module.function(f).body();
        lower_complex(&mut module, body).unwrap();
        insta::assert_snapshot!(module.to_string(), @r"
        func @f(%a0: tensor<complex<f32>>, %a1: tensor<complex<f32>>) -> (tensor<complex<f32>>) {
          %0 = hlo.real(%a0) -> (tensor<f32>)
          %1 = hlo.imag(%a0) -> (tensor<f32>)
          %2 = hlo.real(%a1) -> (tensor<f32>)
          %3 = hlo.imag(%a1) -> (tensor<f32>)
          %4 = hlo.add(%0#0, %1#0) -> (tensor<f32>)
          %5 = hlo.multiply(%2#0, %4#0) -> (tensor<f32>)
          %6 = hlo.subtract(%3#0, %2#0) -> (tensor<f32>)
          %7 = hlo.multiply(%0#0, %6#0) -> (tensor<f32>)
          %8 = hlo.add(%2#0, %3#0) -> (tensor<f32>)
          %9 = hlo.multiply(%1#0, %8#0) -> (tensor<f32>)
          %10 = hlo.subtract(%5#0, %9#0) -> (tensor<f32>)
          %11 = hlo.add(%5#0, %7#0) -> (tensor<f32>)
          %12 = hlo.complex(%10#0, %11#0) -> (tensor<complex<f32>>)
          return(%12#0)
        }
        ");
    }
}
