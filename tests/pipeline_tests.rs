/// Pipeline facade and standard-node tests
///
/// Run protocol with guaranteed teardown, generators, serializer capture,
/// and shared graphs under concurrent contexts.
/// Run with: cargo test --test pipeline_tests

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use pipeflow::prelude::*;

fn sample_tree() -> Tree {
    Tree::new(
        Element::new("catalog")
            .attr("version", "1")
            .child(Element::new("entry").text("first"))
            .child(Element::new("entry").text("second")),
    )
}

fn identity_over(tree: Tree) -> Arc<dyn Processor> {
    let source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(tree));
    let identity: Arc<dyn Processor> = Arc::new(IdentityTransformer::new());
    connect(&source, PORT_DATA, &identity, PORT_DATA).unwrap();
    identity
}

#[test]
fn run_delivers_the_output_and_destroys_the_context() {
    let pipeline = Pipeline::new(identity_over(sample_tree()), PORT_DATA);
    let context = ExecutionContext::new();

    let output = pipeline.run_to_tree(&context).unwrap();
    assert_eq!(output, sample_tree());
    assert!(context.is_destroyed().unwrap());
}

#[test]
fn failed_run_destroys_with_failure_before_surfacing_the_error() {
    let config: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(Tree::new(
        Element::new("message").text("deliberately broken"),
    )));
    let error: Arc<dyn Processor> = Arc::new(ErrorNode::new());
    connect(&config, PORT_DATA, &error, PORT_CONFIG).unwrap();

    let context = ExecutionContext::new();
    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    context
        .add_listener_fn(move |success| {
            *slot.lock().unwrap() = Some(success);
            Ok(())
        })
        .unwrap();

    let result = Pipeline::new(error, PORT_DATA).run_to_tree(&context);
    match result {
        Err(PipeError::Configuration(message)) => {
            assert_eq!(message, "deliberately broken")
        }
        other => panic!("expected configuration error, got {:?}", other.err()),
    }
    // Teardown already ran, and saw the failure.
    assert_eq!(*observed.lock().unwrap(), Some(false));
}

#[test]
fn fan_out_feeds_multiple_consumers_from_one_output() {
    let source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(sample_tree()));
    let left: Arc<dyn Processor> = Arc::new(IdentityTransformer::new());
    let right: Arc<dyn Processor> = Arc::new(IdentityTransformer::new());
    connect(&source, PORT_DATA, &left, PORT_DATA).unwrap();
    connect(&source, PORT_DATA, &right, PORT_DATA).unwrap();

    let context = ExecutionContext::new();
    let left_tree = OutputRef::new(left, PORT_DATA).read_as_tree(&context).unwrap();
    let right_tree = OutputRef::new(right, PORT_DATA)
        .read_as_tree(&context)
        .unwrap();
    assert_eq!(*left_tree, *right_tree);
}

#[test]
fn double_connection_of_an_input_is_rejected() {
    let source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(sample_tree()));
    let identity: Arc<dyn Processor> = Arc::new(IdentityTransformer::new());
    connect(&source, PORT_DATA, &identity, PORT_DATA).unwrap();
    let result = connect(&source, PORT_DATA, &identity, PORT_DATA);
    assert!(matches!(result, Err(PipeError::InputAlreadyConnected(..))));
}

#[test]
fn tree_serializer_captures_its_input_per_context() {
    let source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(sample_tree()));
    let serializer = Arc::new(TreeSerializer::new());
    let as_node: Arc<dyn Processor> = Arc::clone(&serializer) as Arc<dyn Processor>;
    connect(&source, PORT_DATA, &as_node, PORT_DATA).unwrap();

    let context = ExecutionContext::new();
    assert!(serializer.tree(&context).is_err());

    serializer.start(&context).unwrap();
    assert_eq!(*serializer.tree(&context).unwrap(), sample_tree());

    // A different context has its own capture slot.
    let other = ExecutionContext::new();
    assert!(serializer.tree(&other).is_err());
}

#[test]
fn resource_generator_caches_by_last_modified_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    fs::write(&path, serde_json::to_string(&sample_tree()).unwrap()).unwrap();

    let generator: Arc<dyn Processor> = Arc::new(ResourceGenerator::new(&path));
    let output = OutputRef::new(Arc::clone(&generator), PORT_DATA);
    let context = ExecutionContext::new();

    let first = output.read_as_tree(&context).unwrap();
    let second = output.read_as_tree(&context).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, sample_tree());

    // New content with a new modification time invalidates the entry.
    let updated = Tree::new(Element::new("catalog").text("changed"));
    fs::write(&path, serde_json::to_string(&updated).unwrap()).unwrap();
    let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();

    let third = output.read_as_tree(&context).unwrap();
    assert_eq!(*third, updated);
}

#[test]
fn unreadable_resource_has_unknown_validity() {
    let generator = ResourceGenerator::new("/nonexistent/resource.json");
    let context = ExecutionContext::new();
    let validity = generator.validity(PORT_DATA, &context).unwrap();
    assert_eq!(validity, Validity::Unknown);

    let output: Arc<dyn Processor> = Arc::new(generator);
    let result = OutputRef::new(output, PORT_DATA).read_as_tree(&context);
    assert!(matches!(result, Err(PipeError::Resource(_))));
}

#[test]
fn independent_contexts_share_one_graph_safely() {
    let shared = identity_over(sample_tree());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let node = Arc::clone(&shared);
        let runs = Arc::clone(&runs);
        handles.push(std::thread::spawn(move || {
            let context = ExecutionContext::new();
            let tree = Pipeline::new(node, PORT_DATA).run_to_tree(&context).unwrap();
            assert_eq!(tree, sample_tree());
            runs.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}
