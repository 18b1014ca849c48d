//! End-to-end checks of the engine's core guarantees
//!
//! Every scenario runs against a real `TomlStore` in a temporary directory,
//! so configuration comes from files the way it does in a session.

use std::collections::BTreeSet;
use std::fs;

use serde_json::{Value, json};
use tempfile::TempDir;
use tier_core::{
    ConfigValue, Engine, Error, Reference, Schema, Section, SectionPath, TypeHint, config,
};
use tier_fs::TomlStore;
use tier_test_utils::{Recorder, constant, echo, p};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// A config directory plus an engine reading from it.
struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, relative: &str, content: &str) {
        let file = self.dir.path().join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn engine(&self, definition: Section) -> Engine {
        let engine = Engine::new(TomlStore::new(self.dir.path()));
        engine.load(definition).unwrap();
        engine
    }
}

fn int(name: &str, value: i64) -> Schema {
    Schema::new().field(name, json!(value), TypeHint::Integer)
}

// =============================================================================
// Layer ordering
// =============================================================================

mod layer_ordering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn local_beats_sections_which_beat_leaf_defaults() {
        let ws = TestWorkspace::new();
        ws.write("models.toml", "a = 1\n");
        ws.write("models/vision.toml", "b = 2\n");
        let encoder = Recorder::new().leaf_with(
            Schema::new()
                .field("a", Value::Null, TypeHint::Any)
                .field("b", Value::Null, TypeHint::Any),
        );
        let engine = ws.engine(Section::new().section(
            "models",
            Section::new().section("vision", Section::new().leaf("encoder", encoder)),
        ));
        let path = p("models.vision.encoder");

        assert_eq!(
            engine.resolve(&path).unwrap(),
            config([("a", json!(1)), ("b", json!(2))])
        );

        engine
            .update(&SectionPath::root(), config([("a", json!(5))]), false)
            .unwrap();

        assert_eq!(
            engine.resolve(&path).unwrap(),
            config([("a", json!(5)), ("b", json!(2))])
        );
    }
}

// =============================================================================
// No-op suppression
// =============================================================================

mod no_op_suppression {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_update_changes_nothing() {
        let ws = TestWorkspace::new();
        ws.write("jobs/train.toml", "lr = 0.5\n");
        let recorder = Recorder::new();
        let engine = ws.engine(Section::new().section(
            "jobs",
            Section::new().leaf(
                "train",
                recorder.leaf_with(Schema::new().field("lr", json!(0.1), TypeHint::Float)),
            ),
        ));
        let train = p("jobs.train");
        engine.get_object(&train).unwrap();
        let edges = engine.edge_count();

        let outcome = engine.update(&train, config([("lr", json!(0.5))]), true).unwrap();

        assert!(!outcome.changed);
        assert!(engine.persisted_updates(&train).is_empty());
        assert_eq!(engine.edge_count(), edges);
        assert_eq!(recorder.updates(), 0);
    }
}

// =============================================================================
// Dependency capture
// =============================================================================

mod dependency_capture {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reference_from_file_used_while_running_records_one_edge() {
        let ws = TestWorkspace::new();
        ws.write("jobs/report.toml", "source = { ref = \"jobs.metrics\" }\n");
        let engine = ws.engine(Section::new().section(
            "jobs",
            Section::new()
                .leaf("report", echo("source"))
                .leaf("metrics", constant(json!(7))),
        ));

        assert_eq!(engine.run(&p("jobs.report")).unwrap(), json!(7));
        assert_eq!(
            engine.dependents_of(&p("jobs.metrics"), true),
            BTreeSet::from([p("jobs.report")])
        );

        engine.run(&p("jobs.report")).unwrap();
        assert_eq!(engine.edge_count(), 1);
    }
}

// =============================================================================
// Propagation convergence
// =============================================================================

mod propagation_convergence {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn materialized_dependent_is_updated_once_per_changed_value() {
        let ws = TestWorkspace::new();
        ws.write("data/source.toml", "x = 1\n");
        let recorder = Recorder::new();
        let engine = ws.engine(
            Section::new()
                .section("data", Section::new().leaf("source", constant(Value::Null)))
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
        let source = p("data.source");
        let encoder = p("models.encoder");
        engine.get_object(&encoder).unwrap();
        // A second, manual edge along the same pair
        engine.declare_dependency(&encoder, &source, true);

        engine.update(&source, config([("x", json!(2))]), true).unwrap();
        assert_eq!(recorder.updates(), 1);
        assert_eq!(recorder.last_update().unwrap()["x"], ConfigValue::from(json!(2)));

        engine.update(&source, config([("x", json!(2))]), true).unwrap();
        assert_eq!(recorder.updates(), 1);

        engine.update(&source, config([("x", json!(3))]), true).unwrap();
        assert_eq!(recorder.updates(), 2);
        assert_eq!(recorder.constructed(), 1);
    }
}

// =============================================================================
// Cycle detection
// =============================================================================

mod cycle_detection {
    use super::*;

    #[test]
    fn cycle_from_two_updates_is_unresolvable() {
        let ws = TestWorkspace::new();
        ws.write("g/a.toml", "x = 1\n");
        ws.write("g/b.toml", "y = 2\n");
        let engine = ws.engine(Section::new().section(
            "g",
            Section::new()
                .leaf("a", constant(Value::Null).with_schema(int("x", 0)))
                .leaf("b", constant(Value::Null).with_schema(int("y", 0))),
        ));

        engine
            .update(&p("g.a"), config([("from_b", Reference::field(p("g.b"), "y"))]), true)
            .unwrap();
        let err = engine
            .update(&p("g.b"), config([("from_a", Reference::field(p("g.a"), "x"))]), true)
            .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));

        let err = engine
            .update(&p("g.a"), config([("x", json!(10))]), true)
            .unwrap_err();
        assert!(err.is_unresolvable());
    }
}

// =============================================================================
// Refresh round-trip
// =============================================================================

mod refresh_round_trip {
    use super::*;
    use pretty_assertions::assert_eq;

    fn train_engine(ws: &TestWorkspace) -> Engine {
        ws.write("jobs/train.toml", "a = 0\n");
        ws.engine(Section::new().section(
            "jobs",
            Section::new().leaf("train", constant(Value::Null).with_schema(int("a", 9))),
        ))
    }

    #[test]
    fn persisted_update_survives_refresh() {
        let ws = TestWorkspace::new();
        let engine = train_engine(&ws);
        let train = p("jobs.train");

        engine.update(&train, config([("a", json!(1))]), true).unwrap();
        let outcome = engine.refresh(&train).unwrap();

        assert!(!outcome.changed);
        assert_eq!(engine.resolve(&train).unwrap()["a"], ConfigValue::from(json!(1)));
    }

    #[test]
    fn transient_update_reverts_to_file_default() {
        let ws = TestWorkspace::new();
        let engine = train_engine(&ws);
        let train = p("jobs.train");

        engine.update(&train, config([("a", json!(1))]), false).unwrap();
        let outcome = engine.refresh(&train).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.diff.len(), 1);
        assert_eq!(engine.resolve(&train).unwrap()["a"], ConfigValue::from(json!(0)));
    }
}

// =============================================================================
// Section fan-out
// =============================================================================

mod section_fan_out {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn three_leaves_give_an_ordered_sequence() {
        let ws = TestWorkspace::new();
        let engine = ws.engine(Section::new().section(
            "steps",
            Section::new()
                .leaf("fetch", constant(json!("f")))
                .leaf("build", constant(json!("b")))
                .leaf("deploy", constant(json!("d"))),
        ));
        assert_eq!(engine.run(&p("steps")).unwrap(), json!(["f", "b", "d"]));
    }

    #[test]
    fn leaf_and_subsection_give_a_named_mapping() {
        let ws = TestWorkspace::new();
        let engine = ws.engine(Section::new().section(
            "pipeline",
            Section::new()
                .leaf("prepare", constant(json!("ready")))
                .section("stages", Section::new().leaf("one", constant(json!(1)))),
        ));

        let result = engine.run(&p("pipeline")).unwrap();

        let mapping = result.as_object().unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["prepare"], json!("ready"));
        assert_eq!(mapping["stages"], json!([1]));
    }
}
