mod common;
use common::*;

use rustc_hash::FxHashMap;
use serde_json::json;
use weft::builder::{ValidationIssue, build_job};
use weft::graph::{NodeDetails, NodeId, NodeNamespace, ResultType};
use weft::meta::{FlowSocket, JobConfig, JobDefinition, ObjectSelector, StaticResolver};

fn run_adder_config() -> JobConfig {
    JobConfig::new(JobDefinition::RunModel {
        model: ObjectSelector::model("adder"),
        parameters: FxHashMap::from_iter([("bias".to_string(), json!(1))]),
        inputs: FxHashMap::from_iter([
            ("left".to_string(), json!({"path": "left.json"})),
            ("right".to_string(), json!({"path": "right.json"})),
        ]),
        outputs: FxHashMap::default(),
    })
}

fn rooted(name: &str) -> NodeId {
    NodeId::rooted(name, ResultType::Any)
}

fn within(ns: &NodeNamespace, name: &str) -> NodeId {
    NodeId::new(name, ns.clone(), ResultType::Any)
}

#[test]
fn run_model_job_compiles_to_the_expected_shape() {
    let graph = build_job(&run_adder_config(), &fixture_metadata()).unwrap();
    let inv = NodeNamespace::root().push("adder");

    // Outer argument nodes plus push/pop framing, inner sockets, the model
    // node, one output item, and the job-result tail.
    assert_eq!(graph.nodes().len(), 13);
    assert_eq!(graph.root(), &rooted("result"));

    for name in [
        "param:bias",
        "input:left:spec",
        "input:left",
        "input:right:spec",
        "input:right",
        "adder:push",
        "adder:pop",
        "result",
    ] {
        assert!(graph.nodes().contains_key(&rooted(name)), "missing {name}");
    }
    for name in ["bias", "left", "right", "model", "sum", "job_result"] {
        assert!(
            graph.nodes().contains_key(&within(&inv, name)),
            "missing {name} in invocation namespace"
        );
    }

    // The push mapping is sorted by inner socket name and draws from the
    // outer argument nodes.
    let push = &graph.nodes()[&rooted("adder:push")];
    let NodeDetails::ContextPush { mapping } = push.details() else {
        panic!("adder:push is not a context push");
    };
    let mapped: Vec<(String, String)> = mapping
        .iter()
        .map(|(outer, inner)| (outer.name().to_string(), inner.clone()))
        .collect();
    assert_eq!(
        mapped,
        vec![
            ("param:bias".to_string(), "bias".to_string()),
            ("input:left".to_string(), "left".to_string()),
            ("input:right".to_string(), "right".to_string()),
        ]
    );

    // The pop closes the invocation namespace and carries the job result.
    let pop = &graph.nodes()[&rooted("adder:pop")];
    let NodeDetails::ContextPop { mapping, closing } = pop.details() else {
        panic!("adder:pop is not a context pop");
    };
    assert_eq!(closing, &inv);
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping[0].0, within(&inv, "job_result"));

    // The model consumes exactly its three sockets.
    let model = &graph.nodes()[&within(&inv, "model")];
    let NodeDetails::RunModel { sockets, .. } = model.details() else {
        panic!("model node is not a run-model node");
    };
    assert_eq!(sockets.len(), 3);
}

#[test]
fn missing_required_socket_is_a_validation_error() {
    let config = JobConfig::new(JobDefinition::RunModel {
        model: ObjectSelector::model("adder"),
        parameters: FxHashMap::default(),
        inputs: FxHashMap::from_iter([("left".to_string(), json!({"path": "left.json"}))]),
        outputs: FxHashMap::default(),
    });
    let error = build_job(&config, &fixture_metadata()).unwrap_err();
    // Both the missing parameter and the missing input are reported in one
    // aggregate; nothing bails at the first problem.
    assert!(error.issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::MissingParameter { name, .. } if name == "bias"
    )));
    assert!(error.issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::MissingInput { name, .. } if name == "right"
    )));
}

#[test]
fn unknown_model_is_a_metadata_error() {
    let config = JobConfig::new(JobDefinition::RunModel {
        model: ObjectSelector::model("nonexistent"),
        parameters: FxHashMap::default(),
        inputs: FxHashMap::default(),
        outputs: FxHashMap::default(),
    });
    let error = build_job(&config, &StaticResolver::new()).unwrap_err();
    assert!(error
        .issues
        .iter()
        .any(|issue| matches!(issue, ValidationIssue::Metadata { .. })));
}

fn chained_flow_config() -> JobConfig {
    JobConfig::new(JobDefinition::RunFlow {
        flow: ObjectSelector::flow("chained"),
        models: FxHashMap::from_iter([
            ("first".to_string(), ObjectSelector::model("adder")),
            ("second".to_string(), ObjectSelector::model("adder")),
        ]),
        parameters: FxHashMap::from_iter([("bias".to_string(), json!(1))]),
        inputs: FxHashMap::from_iter([
            ("a".to_string(), json!({"path": "a.json"})),
            ("b".to_string(), json!({"path": "b.json"})),
            ("c".to_string(), json!({"path": "c.json"})),
        ]),
        outputs: FxHashMap::default(),
    })
}

#[test]
fn flow_positions_become_separate_invocations_wired_in_order() {
    let graph = build_job(&chained_flow_config(), &fixture_metadata()).unwrap();
    let flow_ns = NodeNamespace::root().push("chained");
    let first_ns = flow_ns.push("first");
    let second_ns = flow_ns.push("second");

    // Each model position gets its own namespace, so one model definition
    // serves both invocations without collision.
    assert!(graph.nodes().contains_key(&within(&first_ns, "model")));
    assert!(graph.nodes().contains_key(&within(&second_ns, "model")));
    assert!(graph.nodes().contains_key(&within(&flow_ns, "first:sum")));
    assert!(graph.nodes().contains_key(&within(&flow_ns, "total")));

    // The mid wire: the second invocation's left socket is pushed from the
    // first invocation's popped sum.
    let push = &graph.nodes()[&within(&flow_ns, "second:push")];
    let NodeDetails::ContextPush { mapping } = push.details() else {
        panic!("second:push is not a context push");
    };
    assert!(mapping
        .iter()
        .any(|(outer, inner)| inner == "left" && *outer == within(&flow_ns, "first:sum")));

    // The flow output is an identity over the second invocation's sum.
    let total = &graph.nodes()[&within(&flow_ns, "total")];
    let NodeDetails::Identity { source } = total.details() else {
        panic!("total is not an identity node");
    };
    assert_eq!(source, &within(&flow_ns, "second:sum"));
}

#[test]
fn removing_a_wire_surfaces_the_unfed_socket() {
    let mut flow = chained_flow();
    flow.edges.retain(|edge| {
        !(edge.source == FlowSocket::socket("first", "sum")
            && edge.target == FlowSocket::socket("second", "left"))
    });
    let metadata = StaticResolver::new().with_model(adder_model()).with_flow(flow);

    let error = build_job(&chained_flow_config(), &metadata).unwrap_err();
    assert!(error.issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::MissingSource { target, .. } if target == "second.left"
    )));
}

#[test]
fn signature_mismatch_is_reported_per_section() {
    let wrong = adder_model();
    let wrong = weft::meta::ModelDefinition {
        key: "adder".to_string(),
        outputs: FxHashMap::from_iter([(
            "result".to_string(),
            weft::meta::SocketSpec::required(ResultType::Integer),
        )]),
        ..wrong
    };
    let metadata = StaticResolver::new().with_model(wrong).with_flow(chained_flow());

    let error = build_job(&chained_flow_config(), &metadata).unwrap_err();
    assert!(error.issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::SignatureMismatch { node, .. } if node == "first"
    )));
    assert!(error.issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::SignatureMismatch { node, .. } if node == "second"
    )));
}

#[test]
fn job_group_children_chain_sequentially() {
    let transfer = |n: usize| JobDefinition::ImportData {
        source: json!({"path": format!("in-{n}.json")}),
        target: json!({"path": format!("out-{n}.json")}),
    };
    let config = JobConfig::new(JobDefinition::JobGroup {
        children: vec![transfer(0), transfer(1), transfer(2)],
        sequential: true,
    });
    let graph = build_job(&config, &StaticResolver::new()).unwrap();

    for index in 0..3 {
        let id = rooted(&format!("child-{index}"));
        let NodeDetails::ChildJob { after, .. } = graph.nodes()[&id].details() else {
            panic!("child-{index} is not a child-job node");
        };
        if index == 0 {
            assert!(after.is_empty());
        } else {
            assert_eq!(after, &vec![rooted(&format!("child-{}", index - 1))]);
        }
    }
    let NodeDetails::JobResult { outputs } = graph.nodes()[graph.root()].details() else {
        panic!("group root is not a job-result node");
    };
    assert_eq!(outputs.len(), 3);
}

#[test]
fn result_dir_adds_a_must_run_save() {
    let mut config = run_adder_config();
    config.result_dir = Some("/tmp/results".to_string());
    config.result_format = Some("parquet".to_string());
    let graph = build_job(&config, &fixture_metadata()).unwrap();

    let save = &graph.nodes()[&rooted("result:save")];
    let NodeDetails::SaveData { source, spec } = save.details() else {
        panic!("result:save is not a save node");
    };
    assert_eq!(source, &rooted("result"));
    let NodeDetails::DataSpec { spec } = graph.nodes()[spec].details() else {
        panic!("result:spec is not a data spec");
    };
    assert_eq!(spec["format"], json!("parquet"));
}
