//! A graph IR for TensorFlow-style computations.
//!
//! A [`Module`] holds at most one top-level graph plus a set of functions.
//! Nodes produce typed data results and a control token; control flow comes
//! in two encodings, functional nodes that call other functions and region
//! nodes that own nested bodies, and [`convert`] moves between them.

pub mod attr;
pub mod config;
pub mod control_flow;
pub mod convert;
pub mod ir;
pub mod ir_parse;
pub mod ir_passes;
pub mod ir_print;
pub mod lower_complex;
pub mod ops;
pub mod rewrite;
pub mod symbol;
pub mod types;
pub mod verify;

pub use attr::{Attr, AttrDict};
pub use config::PipelineOptions;
pub use ir::{FuncId, Module, NodeId, NodeKind, RegionBuilder, RegionId, Value};
pub use ir_parse::{ParseError, parse_module};
pub use ir_passes::{PassError, PassManager, eliminate_dead_control_sinks, run_default_passes};
pub use ir_print::print_module;
pub use types::{ElementType, FunctionType, Shape, Type};
pub use verify::{VerifyError, verify_module};
