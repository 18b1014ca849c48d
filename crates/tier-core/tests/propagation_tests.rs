//! Tests for dependency capture and forced propagation

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tier_core::{
    ConfigValue, Engine, EngineOptions, Error, MemoryStore, Reference, Schema, Section, TypeHint,
    config,
};
use tier_test_utils::{Recorder, constant, echo, p};

fn engine_with(definition: Section) -> Engine {
    let engine = Engine::new(MemoryStore::new());
    engine.load(definition).unwrap();
    engine
}

fn int(name: &str, value: i64) -> Schema {
    Schema::new().field(name, json!(value), TypeHint::Integer)
}

#[test]
fn using_a_reference_while_running_records_forced_edge() {
    let engine = engine_with(
        Section::new().section(
            "jobs",
            Section::new()
                .leaf(
                    "report",
                    echo("source").with_schema(Schema::new().field(
                        "source",
                        Reference::to(p("jobs.metrics")),
                        TypeHint::Reference,
                    )),
                )
                .leaf("metrics", constant(json!(7))),
        ),
    );

    assert_eq!(engine.run(&p("jobs.report")).unwrap(), json!(7));
    assert_eq!(
        engine.dependents_of(&p("jobs.metrics"), true),
        BTreeSet::from([p("jobs.report")])
    );

    engine.run(&p("jobs.report")).unwrap();
    assert_eq!(engine.edge_count(), 1);
}

#[test]
fn whole_item_references_stay_lazy_until_used() {
    let engine = engine_with(
        Section::new().section(
            "jobs",
            Section::new()
                .leaf(
                    "report",
                    constant(Value::Null).with_schema(Schema::new().field(
                        "source",
                        Reference::to(p("jobs.metrics")),
                        TypeHint::Reference,
                    )),
                )
                .leaf("metrics", constant(json!(7))),
        ),
    );

    let resolved = engine.resolve(&p("jobs.report")).unwrap();
    assert!(resolved["source"].as_reference().is_some());
    assert_eq!(engine.edge_count(), 0);
}

#[test]
fn dependent_receives_one_live_update_per_change() {
    let recorder = Recorder::new();
    let engine = engine_with(
        Section::new()
            .section("data", Section::new().leaf("source", constant(Value::Null).with_schema(int("x", 1))))
            .section(
                "models",
                Section::new().leaf(
                    "encoder",
                    recorder.leaf_with(Schema::new().field(
                        "x",
                        Reference::field(p("data.source"), "x"),
                        TypeHint::Integer,
                    )),
                ),
            ),
    );
    let encoder = p("models.encoder");
    let source = p("data.source");
    engine.get_object(&encoder).unwrap();
    assert_eq!(recorder.constructed(), 1);

    engine.update(&source, config([("x", json!(2))]), true).unwrap();
    assert_eq!(recorder.updates(), 1);
    assert_eq!(
        recorder.last_update().unwrap()["x"],
        ConfigValue::from(json!(2))
    );

    // Same value again is suppressed before anything propagates
    engine.update(&source, config([("x", json!(2))]), true).unwrap();
    assert_eq!(recorder.updates(), 1);

    engine.update(&source, config([("x", json!(3))]), true).unwrap();
    assert_eq!(recorder.updates(), 2);
    assert_eq!(recorder.constructed(), 1);
}

#[test]
fn diamond_dependent_is_refreshed_once_after_its_inputs() {
    let recorder = Recorder::new();
    let engine = engine_with(
        Section::new().section(
            "g",
            Section::new()
                .leaf("b", constant(Value::Null).with_schema(int("x", 1)))
                .leaf(
                    "c",
                    constant(Value::Null).with_schema(Schema::new().field(
                        "cx",
                        Reference::field(p("g.b"), "x"),
                        TypeHint::Integer,
                    )),
                )
                .leaf(
                    "a",
                    recorder.leaf_with(
                        Schema::new()
                            .field("bx", Reference::field(p("g.b"), "x"), TypeHint::Integer)
                            .field("cx", Reference::field(p("g.c"), "cx"), TypeHint::Integer),
                    ),
                ),
        ),
    );
    engine.get_object(&p("g.a")).unwrap();

    engine.update(&p("g.b"), config([("x", json!(5))]), true).unwrap();

    assert_eq!(recorder.updates(), 1);
    let seen = recorder.last_update().unwrap();
    assert_eq!(seen["bx"], ConfigValue::from(json!(5)));
    assert_eq!(seen["cx"], ConfigValue::from(json!(5)));
}

#[test]
fn refresh_dependents_orders_dependencies_first() {
    let engine = engine_with(
        Section::new().section(
            "g",
            Section::new()
                .leaf("a", constant(json!(1)))
                .leaf("b", constant(json!(2)))
                .leaf("c", constant(json!(3))),
        ),
    );
    engine.declare_dependency(&p("g.c"), &p("g.b"), true);
    engine.declare_dependency(&p("g.b"), &p("g.a"), true);

    let order = engine
        .refresh_dependents(&p("g.a"), &BTreeSet::from([p("g.a")]))
        .unwrap();
    assert_eq!(order, vec![p("g.b"), p("g.c")]);
}

#[test]
fn mutual_dependency_is_a_cycle() {
    let engine = engine_with(
        Section::new().section(
            "g",
            Section::new()
                .leaf("a", constant(Value::Null).with_schema(int("x", 0)))
                .leaf("b", constant(Value::Null).with_schema(int("x", 0))),
        ),
    );
    engine.declare_dependency(&p("g.a"), &p("g.b"), true);
    engine.declare_dependency(&p("g.b"), &p("g.a"), true);

    let err = engine
        .update(&p("g.a"), config([("x", json!(1))]), true)
        .unwrap_err();

    assert!(err.is_unresolvable());
    match err {
        Error::DependencyCycle { target, participants } => {
            assert_eq!(target, p("g.a"));
            assert_eq!(participants, vec![p("g.a"), p("g.b")]);
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
}

#[test]
fn cycle_built_by_two_updates_aborts_without_rollback() {
    let engine = engine_with(
        Section::new().section(
            "g",
            Section::new()
                .leaf("a", constant(Value::Null).with_schema(int("x", 1)))
                .leaf("b", constant(Value::Null).with_schema(int("y", 2))),
        ),
    );

    engine
        .update(&p("g.a"), config([("from_b", Reference::field(p("g.b"), "y"))]), true)
        .unwrap();
    let err = engine
        .update(&p("g.b"), config([("from_a", Reference::field(p("g.a"), "x"))]), true)
        .unwrap_err();
    assert!(matches!(err, Error::DependencyCycle { .. }));

    // The second update stays applied
    assert_eq!(
        engine.resolve(&p("g.b")).unwrap()["from_a"],
        ConfigValue::from(json!(1))
    );

    let err = engine
        .update(&p("g.a"), config([("x", json!(10))]), true)
        .unwrap_err();
    assert!(err.is_unresolvable());
}

#[test]
fn round_limit_stops_propagation() {
    let engine = Engine::new(MemoryStore::new()).with_options(EngineOptions {
        max_propagation_rounds: 0,
        ..EngineOptions::default()
    });
    engine
        .load(
            Section::new().section(
                "g",
                Section::new()
                    .leaf("a", constant(Value::Null).with_schema(int("x", 1)))
                    .leaf("b", constant(Value::Null)),
            ),
        )
        .unwrap();
    engine.declare_dependency(&p("g.b"), &p("g.a"), true);

    let err = engine
        .update(&p("g.a"), config([("x", json!(2))]), true)
        .unwrap_err();
    match err {
        Error::PropagationStalled { target, pending } => {
            assert_eq!(target, p("g.a"));
            assert_eq!(pending, vec![p("g.b")]);
        }
        other => panic!("expected PropagationStalled, got {other:?}"),
    }
}

#[test]
fn non_forced_edges_do_not_propagate() {
    let recorder = Recorder::new();
    let engine = engine_with(
        Section::new().section(
            "g",
            Section::new()
                .leaf("a", constant(Value::Null).with_schema(int("x", 1)))
                .leaf("b", recorder.leaf()),
        ),
    );
    engine.declare_dependency(&p("g.b"), &p("g.a"), false);
    engine.get_object(&p("g.b")).unwrap();

    engine.update(&p("g.a"), config([("x", json!(2))]), true).unwrap();

    assert_eq!(engine.stale_dependents(&p("g.a")), BTreeSet::from([p("g.b")]));
    assert!(engine.dependents_of(&p("g.a"), true).is_empty());
    assert_eq!(recorder.updates(), 0);
}

#[test]
fn reset_graph_drops_every_edge() {
    let engine = engine_with(Section::new().section("g", Section::new().leaf("a", constant(json!(1)))));
    engine.declare_dependency(&p("g.a"), &p("g.b"), true);
    engine.declare_dependency(&p("g.c"), &p("g.b"), false);
    assert_eq!(engine.edge_count(), 2);

    engine.reset_graph();

    assert_eq!(engine.edge_count(), 0);
    assert!(engine.stale_dependents(&p("g.b")).is_empty());
}

#[test]
fn section_change_reaches_leaves_and_their_dependents() {
    let encoder = Recorder::new();
    let decoder = Recorder::new();
    let engine = engine_with(
        Section::new()
            .section(
                "models",
                Section::new()
                    .with_config(config([("scale", json!(1))]))
                    .leaf("encoder", encoder.leaf())
                    .leaf("decoder", decoder.leaf()),
            )
            .section(
                "eval",
                Section::new().leaf(
                    "score",
                    constant(Value::Null).with_schema(Schema::new().field(
                        "scale",
                        Reference::field(p("models.encoder"), "scale"),
                        TypeHint::Integer,
                    )),
                ),
            ),
    );
    engine.get(&p("models")).unwrap();
    assert_eq!(
        engine.resolve(&p("eval.score")).unwrap()["scale"],
        ConfigValue::from(json!(1))
    );

    engine.update(&p("models"), config([("scale", json!(2))]), true).unwrap();

    assert_eq!(encoder.updates(), 1);
    assert_eq!(decoder.updates(), 1);
    assert_eq!(
        engine.resolve(&p("eval.score")).unwrap()["scale"],
        ConfigValue::from(json!(2))
    );
}
