/// Statement interpreter tests
///
/// Template interpretation: parameter binding, row iteration, nested
/// statements, result branches, functions, and delegates.
/// Run with: cargo test --test interpreter_tests

use std::sync::Arc;

use pipeflow::db::JournalEntry;
use pipeflow::prelude::*;
use pipeflow::xml::TreeBuilder;

fn interpreter_for(config: Tree, input: Tree) -> Arc<dyn Processor> {
    let interpreter: Arc<dyn Processor> = Arc::new(SqlInterpreter::new());
    let config_source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(config));
    let input_source: Arc<dyn Processor> = Arc::new(LiteralGenerator::new(input));
    connect(&config_source, PORT_DATA, &interpreter, PORT_CONFIG).unwrap();
    connect(&input_source, PORT_DATA, &interpreter, PORT_DATA).unwrap();
    interpreter
}

fn run(
    interpreter: &Arc<dyn Processor>,
    datasource: &Arc<MemoryDatasource>,
) -> pipeflow::Result<Tree> {
    let context = ExecutionContext::new();
    let registry = Arc::new(DatasourceRegistry::new());
    registry
        .register("orders", Arc::clone(datasource) as Arc<dyn Datasource>)
        .unwrap();
    registry.install(&context).unwrap();

    let mut builder = TreeBuilder::new();
    interpreter.read(PORT_DATA, &context, &mut builder)?;
    builder.finish()
}

fn request_input() -> Tree {
    Tree::new(Element::new("request").child(Element::new("id").text("42")))
}

fn execute_element(statement: Element) -> Element {
    Element::new("sql:execute").child(statement)
}

fn config_around(body: Element) -> Tree {
    Tree::new(
        Element::new("sql:config")
            .child(Element::new("sql:connection").attr("datasource", "orders").child(body)),
    )
}

#[test]
fn query_iterates_row_template_per_row_with_row_relative_columns() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    datasource
        .script_query(
            "select name from orders where id = ?",
            &["name"],
            vec![
                vec![Value::Text("alpha".into())],
                vec![Value::Text("beta".into())],
            ],
        )
        .unwrap();

    let config = config_around(
        Element::new("report").child(
            execute_element(
                Element::new("sql:query")
                    .text("select name from orders where id = ")
                    .child(Element::new("sql:param").attr("select", "/request/id")),
            )
            .child(
                Element::new("sql:results").child(
                    Element::new("sql:row-results").child(
                        Element::new("row")
                            .child(
                                Element::new("sql:attribute")
                                    .attr("name", "index")
                                    .attr("select", "row-position()"),
                            )
                            .child(Element::new("sql:get-column").attr("name", "name")),
                    ),
                ),
            )
            .child(Element::new("sql:no-results").child(Element::new("empty"))),
        ),
    );

    let interpreter = interpreter_for(config, request_input());
    let output = run(&interpreter, &datasource).unwrap();

    let expected = Tree::new(
        Element::new("report")
            .child(Element::new("row").attr("index", "1").text("alpha"))
            .child(Element::new("row").attr("index", "2").text("beta")),
    );
    assert_eq!(output, expected);

    // The bound parameter came from the path expression against the input.
    let journal = datasource.journal().unwrap();
    assert_eq!(
        journal[1],
        JournalEntry::Executed {
            sql: "select name from orders where id = ?".into(),
            params: vec![Value::Text("42".into())],
        }
    );
}

#[test]
fn empty_result_takes_the_no_results_branch() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    datasource
        .script_query("select name from orders", &["name"], Vec::new())
        .unwrap();

    let config = config_around(
        Element::new("report").child(
            execute_element(Element::new("sql:query").text("select name from orders"))
                .child(
                    Element::new("sql:results")
                        .child(Element::new("sql:row-results").child(Element::new("row"))),
                )
                .child(Element::new("sql:no-results").child(Element::new("empty"))),
        ),
    );

    let interpreter = interpreter_for(config, request_input());
    let output = run(&interpreter, &datasource).unwrap();

    assert_eq!(
        output,
        Tree::new(Element::new("report").child(Element::new("empty")))
    );
}

#[test]
fn update_records_affected_count_and_never_iterates() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    datasource
        .script_update("update orders set done = 1 where id = ?", 3)
        .unwrap();

    let config = config_around(
        Element::new("report")
            .child(execute_element(
                Element::new("sql:update")
                    .text("update orders set done = 1 where id = ")
                    .child(
                        Element::new("sql:param")
                            .attr("select", "/request/id")
                            .attr("type", "int"),
                    ),
            ))
            .child(Element::new("done")),
    );

    let interpreter = interpreter_for(config, request_input());
    let output = run(&interpreter, &datasource).unwrap();

    assert_eq!(
        output,
        Tree::new(Element::new("report").child(Element::new("done")))
    );
    let journal = datasource.journal().unwrap();
    assert_eq!(
        journal[1],
        JournalEntry::Executed {
            sql: "update orders set done = 1 where id = ?".into(),
            params: vec![Value::Integer(42)],
        }
    );
}

#[test]
fn nested_statement_reads_the_enclosing_rows_columns() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    datasource
        .script_query(
            "select id, customer from orders",
            &["id", "customer"],
            vec![
                vec![Value::Integer(1), Value::Text("ann".into())],
                vec![Value::Integer(2), Value::Text("bob".into())],
            ],
        )
        .unwrap();
    datasource
        .script_query(
            "select total from lines where order_id = ?",
            &["total"],
            vec![vec![Value::Integer(10)]],
        )
        .unwrap();

    let inner = execute_element(
        Element::new("sql:query")
            .text("select total from lines where order_id = ")
            .child(
                Element::new("sql:param")
                    .attr("select", "get-column('id', 1)")
                    .attr("type", "int"),
            ),
    )
    .child(
        Element::new("sql:results").child(
            Element::new("sql:row-results").child(
                Element::new("total").child(Element::new("sql:get-column").attr("name", "total")),
            ),
        ),
    );

    let config = config_around(
        Element::new("orders").child(
            execute_element(Element::new("sql:query").text("select id, customer from orders"))
                .child(
                    Element::new("sql:results").child(
                        Element::new("sql:row-results").child(
                            Element::new("order")
                                .child(
                                    Element::new("customer").child(
                                        Element::new("sql:get-column").attr("name", "customer"),
                                    ),
                                )
                                .child(inner),
                        ),
                    ),
                ),
        ),
    );

    let interpreter = interpreter_for(config, request_input());
    let output = run(&interpreter, &datasource).unwrap();

    let order = |customer: &str| {
        Element::new("order")
            .child(Element::new("customer").text(customer))
            .child(Element::new("total").text("10"))
    };
    assert_eq!(
        output,
        Tree::new(Element::new("orders").child(order("ann")).child(order("bob")))
    );

    // The inner statement ran once per outer row, each time bound to that
    // row's id.
    let inner_params: Vec<_> = datasource
        .journal()
        .unwrap()
        .into_iter()
        .filter_map(|entry| match entry {
            JournalEntry::Executed { sql, params }
                if sql.starts_with("select total") =>
            {
                Some(params)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        inner_params,
        vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]
    );
}

#[test]
fn statement_local_functions_shadow_outer_definitions() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    datasource
        .script_query("select 1", &["x"], vec![vec![Value::Integer(1)]])
        .unwrap();

    let input = Tree::new(
        Element::new("request")
            .child(Element::new("outer").text("O"))
            .child(Element::new("inner").text("I")),
    );

    let nested = Element::new("sql:execute")
        .child(
            Element::new("sql:function")
                .attr("name", "label")
                .attr("select", "/request/inner"),
        )
        .child(Element::new("sql:query").text("select 1"))
        .child(Element::new("sql:value-of").attr("select", "label()"));

    let config = config_around(
        Element::new("out").child(
            Element::new("sql:execute")
                .child(
                    Element::new("sql:function")
                        .attr("name", "label")
                        .attr("select", "/request/outer"),
                )
                .child(Element::new("sql:query").text("select 1"))
                .child(Element::new("sql:value-of").attr("select", "label()"))
                .child(nested)
                .child(Element::new("sql:value-of").attr("select", "label()")),
        ),
    );

    let interpreter = interpreter_for(config, input);
    let output = run(&interpreter, &datasource).unwrap();

    // Inner definition shadows only for the nested statement's scope.
    assert_eq!(output.root().string_value(), "OIO");
}

#[test]
fn for_each_changes_path_context_without_a_sql_frame() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));

    let input = Tree::new(
        Element::new("request").child(
            Element::new("items")
                .child(Element::new("item").text("a"))
                .child(Element::new("item").text("b")),
        ),
    );

    let config = config_around(
        Element::new("list").child(
            Element::new("sql:for-each")
                .attr("select", "/request/items/item")
                .child(
                    Element::new("entry")
                        .child(Element::new("sql:value-of").attr("select", ".")),
                ),
        ),
    );

    let interpreter = interpreter_for(config, input);
    let output = run(&interpreter, &datasource).unwrap();

    assert_eq!(
        output,
        Tree::new(
            Element::new("list")
                .child(Element::new("entry").text("a"))
                .child(Element::new("entry").text("b"))
        )
    );
}

#[test]
fn oracle_delegate_binds_empty_text_as_null() {
    let script = "insert into notes (body) values ( ? )";
    let config = config_around(Element::new("done").child(execute_element(
        Element::new("sql:update")
            .text("insert into notes (body) values ( ")
            .child(Element::new("sql:param").attr("select", "/request/note"))
            .text(" )"),
    )));
    let input = Tree::new(Element::new("request").child(Element::new("note")));

    let bound_param = |product: &str| {
        let datasource = Arc::new(MemoryDatasource::new(product));
        datasource.script_update(script, 1).unwrap();
        let interpreter = interpreter_for(config.clone(), input.clone());
        run(&interpreter, &datasource).unwrap();
        match &datasource.journal().unwrap()[1] {
            JournalEntry::Executed { params, .. } => params[0].clone(),
            other => panic!("expected execution, got {:?}", other),
        }
    };

    assert_eq!(bound_param("Oracle Database 19c"), Value::Null);
    assert_eq!(bound_param("PostgreSQL 16"), Value::Text(String::new()));
}

#[test]
fn statements_outside_execute_are_configuration_errors() {
    let datasource = Arc::new(MemoryDatasource::new("memdb"));
    let config = config_around(
        Element::new("report").child(Element::new("sql:query").text("select 1")),
    );
    let interpreter = interpreter_for(config, request_input());
    let result = run(&interpreter, &datasource);
    assert!(matches!(result, Err(PipeError::Configuration(_))));
}
