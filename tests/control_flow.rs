use tfg::attr::Attr;
use tfg::control_flow::{InvocationBounds, RegionCf, case_branch};
use tfg::convert::{inline, outline};
use tfg::symbol::SymbolTable;
use tfg::verify::verify_symbol_uses;
use tfg::{Module, NodeId, NodeKind, parse_module, print_module, verify_module};

fn node_named(module: &Module, body: tfg::RegionId, op: &str) -> NodeId {
    module
        .collect_nodes(body)
        .into_iter()
        .find(|&n| module.nodes[n].kind.name() == op)
        .unwrap_or_else(|| panic!("no {op} node"))
}

fn assert_verifies(module: &Module) {
    if let Err(e) = verify_module(module) {
        panic!("{e}\n{module}");
    }
}

/// Statically known operand values, read off `Const` producers.
fn operand_constants(module: &Module, node: NodeId) -> Vec<Option<Attr>> {
    module.nodes[node]
        .operands
        .iter()
        .map(|v| {
            let def = v.defining_node()?;
            let producer = &module.nodes[def];
            (producer.kind.name() == "Const")
                .then(|| producer.attrs.get("value").cloned())
                .flatten()
        })
        .collect()
}

const IF_GRAPH: &str = r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Placeholder() {dtype = i1} -> (tensor<i1>)
  %1 = Placeholder() {dtype = f32} -> (tensor<f32>)
  %2 = NoOp() -> ()
  %3 = StatelessIfRegion(%0#0) [%2.ctl] -> (tensor<f32>) then {
    %4 = Neg(%1#0) [%1.ctl] -> (tensor<f32>)
    yield(%4#0)
  } else {
    yield(%1#0)
  }
  %5 = Identity(%3#0) [%3.ctl] -> (tensor<f32>)
}
"#;

#[test]
fn outline_then_inline_preserves_meaning() {
    let mut module = parse_module(IF_GRAPH).unwrap();
    assert_verifies(&module);
    let body = module.graph().unwrap().body;
    let if_node = node_named(&module, body, "StatelessIfRegion");

    let functional = outline(&mut module, if_node).unwrap();
    assert_eq!(module.nodes[functional].kind.name(), "StatelessIf");
    assert_eq!(module.functions().count(), 2);
    let symbols = SymbolTable::build(&module);
    assert_eq!(verify_symbol_uses(&module, functional, &symbols), Ok(()));
    assert_verifies(&module);

    let identity = node_named(&module, body, "Identity");
    assert_eq!(
        module.nodes[identity].operands,
        vec![tfg::Value::result(functional, 0)]
    );

    let region_form = inline(&mut module, functional).unwrap();
    assert!(matches!(module.nodes[region_form].kind, NodeKind::IfRegion(_)));
    assert_verifies(&module);

    // The outlined functions are still around; dropping them leaves the
    // inlined graph self-contained.
    for f in module.functions().collect::<Vec<_>>() {
        module.remove_function(f);
    }
    assert_verifies(&module);
    let text = print_module(&module);
    assert!(text.contains("StatelessIfRegion(%0#0"), "{text}");
    assert!(text.contains("Neg("), "{text}");
}

#[test]
fn outlined_module_survives_a_text_round_trip() {
    let mut module = parse_module(IF_GRAPH).unwrap();
    let body = module.graph().unwrap().body;
    let if_node = node_named(&module, body, "StatelessIfRegion");
    outline(&mut module, if_node).unwrap();

    let text = print_module(&module);
    let reparsed = parse_module(&text).unwrap();
    assert_verifies(&reparsed);
    assert_eq!(print_module(&reparsed), text);
}

#[test]
fn callee_result_type_mismatch_names_the_index() {
    let module = parse_module(
        r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Placeholder() {dtype = i1} -> (tensor<i1>)
  %1 = If(%0#0) {Tout = [f32, i32], else_branch = @two, then_branch = @two} -> (tensor<f32>, tensor<f32>)
}
func @two() -> (tensor<f32>, tensor<f32>) {
  %0 = Const() {dtype = f32, value = 0.0} -> (tensor<f32>)
  return(%0#0, %0#0)
}
"#,
    )
    .unwrap();
    let body = module.graph().unwrap().body;
    let if_node = node_named(&module, body, "If");
    let symbols = SymbolTable::build(&module);
    let err = verify_symbol_uses(&module, if_node, &symbols).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("`Tout`[1]"), "{text}");
    assert!(text.contains("i32"), "{text}");
}

#[test]
fn for_with_constant_bounds_runs_an_exact_number_of_times() {
    let module = parse_module(
        r#"func @sum(%a0: tensor<i32>) -> (tensor<i32>) {
  %0 = Const() {dtype = i32, value = 0} -> (tensor<i32>)
  %1 = Const() {dtype = i32, value = 10} -> (tensor<i32>)
  %2 = Const() {dtype = i32, value = 3} -> (tensor<i32>)
  %3 = ForRegion(%0#0, %1#0, %2#0, %a0) -> (tensor<i32>) do(%a1: tensor<i32>, %a2: tensor<i32>) {
    %4 = AddV2(%a1, %a2) -> (tensor<i32>)
    yield(%4#0)
  }
  return(%3#0)
}
"#,
    )
    .unwrap();
    assert_verifies(&module);
    let f = module.function_by_name("sum").unwrap();
    let for_node = node_named(&module, module.function(f).body(), "ForRegion");
    let cf = RegionCf::new(&module, for_node).unwrap();
    assert_eq!(
        cf.invocation_bounds(&operand_constants(&module, for_node)),
        vec![InvocationBounds::exactly(4)]
    );
    assert_eq!(cf.invocation_bounds(&[]), vec![InvocationBounds::unbounded(0)]);
}

#[test]
fn case_with_constant_index_runs_one_branch() {
    let module = parse_module(
        r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Const() {dtype = i32, value = 7} -> (tensor<i32>)
  %1 = CaseRegion(%0#0) -> () branch {
    yield()
  } branch {
    yield()
  } branch {
    yield()
  }
}
"#,
    )
    .unwrap();
    assert_verifies(&module);
    let body = module.graph().unwrap().body;
    let case = node_named(&module, body, "CaseRegion");
    let cf = RegionCf::new(&module, case).unwrap();
    assert_eq!(case_branch(7, 3), 2);
    assert_eq!(
        cf.invocation_bounds(&operand_constants(&module, case)),
        vec![
            InvocationBounds::NEVER,
            InvocationBounds::NEVER,
            InvocationBounds::ONCE
        ]
    );
}

/// Outline the region op named `op`, then inline the result again, checking
/// that the module verifies at every step.
fn outline_and_inline(text: &str, op: &str) -> (Module, NodeId, NodeId) {
    let mut module = parse_module(text).unwrap();
    assert_verifies(&module);
    let body = module.graph().unwrap().body;
    let region_op = node_named(&module, body, op);

    let functional = outline(&mut module, region_op).unwrap();
    assert_verifies(&module);
    let symbols = SymbolTable::build(&module);
    assert_eq!(verify_symbol_uses(&module, functional, &symbols), Ok(()));
    let outlined = print_module(&module);

    let region_form = inline(&mut module, functional).unwrap();
    assert_verifies(&module);
    assert!(!module.is_attached(functional), "{outlined}");
    (module, functional, region_form)
}

#[test]
fn case_round_trips_through_functions() {
    let (module, _, region_form) = outline_and_inline(
        r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Placeholder() {dtype = i32} -> (tensor<i32>)
  %1 = Placeholder() {dtype = f32} -> (tensor<f32>)
  %2 = CaseRegion(%0#0) -> (tensor<f32>) branch {
    %3 = Neg(%1#0) -> (tensor<f32>)
    yield(%3#0)
  } branch {
    yield(%1#0)
  } branch {
    %4 = Abs(%1#0) -> (tensor<f32>)
    yield(%4#0)
  }
  %5 = Identity(%2#0) [%2.ctl] -> (tensor<f32>)
}
"#,
        "CaseRegion",
    );
    let names: Vec<&str> = module
        .functions()
        .filter_map(|f| module.function(f).name())
        .map(|s| module.symbol_name(s))
        .collect();
    assert_eq!(names, ["graph_branch0", "graph_branch1", "graph_branch2"]);

    let n = &module.nodes[region_form];
    assert!(matches!(n.kind, NodeKind::CaseRegion(_)));
    assert_eq!(n.regions.len(), 3);
    assert_eq!(n.operands.len(), 1);
    let body = module.graph().unwrap().body;
    let identity = node_named(&module, body, "Identity");
    assert_eq!(module.nodes[identity].operands, vec![tfg::Value::result(region_form, 0)]);
    assert_eq!(
        module.nodes[identity].control_operands,
        vec![tfg::Value::control(region_form)]
    );
    let text = print_module(&module);
    assert!(text.contains("Neg(%1#0)") && text.contains("Abs(%1#0)"), "{text}");
}

#[test]
fn while_with_a_captured_limit_round_trips() {
    let (module, functional, region_form) = outline_and_inline(
        r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Placeholder() {dtype = i32} -> (tensor<i32>)
  %1 = Const() {dtype = i32, value = 10} -> (tensor<i32>)
  %2 = WhileRegion(%0#0) -> (tensor<i32>) cond(%a0: tensor<i32>) {
    %3 = Less(%a0, %1#0) -> (tensor<i1>)
    condition(%3#0, %a0)
  } do(%a1: tensor<i32>) {
    %4 = AddV2(%a1, %1#0) -> (tensor<i32>)
    yield(%4#0)
  }
  %5 = Identity(%2#0) -> (tensor<i32>)
}
"#,
        "WhileRegion",
    );
    // The capture became a second loop-carried value.
    assert_eq!(module.nodes[functional].operands.len(), 2);
    let n = &module.nodes[region_form];
    assert!(matches!(n.kind, NodeKind::WhileRegion(_)));
    assert_eq!(n.operands, module.nodes[functional].operands);
    assert_eq!(n.results.len(), 2);
    assert_eq!(module.regions[n.regions[0]].data_arg_count(), 2);
    assert_eq!(module.regions[n.regions[1]].data_arg_count(), 2);

    let body = module.graph().unwrap().body;
    let identity = node_named(&module, body, "Identity");
    assert_eq!(module.nodes[identity].operands, vec![tfg::Value::result(region_form, 0)]);
}

#[test]
fn for_with_a_captured_step_round_trips() {
    let (module, functional, region_form) = outline_and_inline(
        r#"graph version(producer = 27, min_consumer = 0) {
  %0 = Const() {dtype = i32, value = 0} -> (tensor<i32>)
  %1 = Const() {dtype = i32, value = 5} -> (tensor<i32>)
  %2 = Const() {dtype = i32, value = 1} -> (tensor<i32>)
  %3 = Placeholder() {dtype = f32} -> (tensor<f32>)
  %4 = Placeholder() {dtype = f32} -> (tensor<f32>)
  %5 = ForRegion(%0#0, %1#0, %2#0, %3#0) -> (tensor<f32>) do(%a0: tensor<i32>, %a1: tensor<f32>) {
    %6 = AddV2(%a1, %4#0) -> (tensor<f32>)
    yield(%6#0)
  }
  %7 = Identity(%5#0) -> (tensor<f32>)
}
"#,
        "ForRegion",
    );
    assert_eq!(module.nodes[functional].operands.len(), 5);
    let n = &module.nodes[region_form];
    assert!(matches!(n.kind, NodeKind::ForRegion));
    assert_eq!(n.operands, module.nodes[functional].operands);
    assert_eq!(n.results.len(), 2);
    // Index, carried value, captured step.
    assert_eq!(module.regions[n.regions[0]].data_arg_count(), 3);

    let body = module.graph().unwrap().body;
    let identity = node_named(&module, body, "Identity");
    assert_eq!(module.nodes[identity].operands, vec![tfg::Value::result(region_form, 0)]);
    let cf = RegionCf::new(&module, region_form).unwrap();
    assert_eq!(
        cf.invocation_bounds(&operand_constants(&module, region_form)),
        vec![InvocationBounds::exactly(5)]
    );
}
