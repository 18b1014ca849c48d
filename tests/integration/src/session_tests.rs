//! Whole-session workflows over a file-backed store
//!
//! These follow what a user session does: edit files by hand, update and
//! save from code, reload, sweep parameters, and drive the engine from an
//! options file.

use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tier_core::{
    BatchEntry, ChangeSet, ConfigValue, Engine, EngineOptions, Error, Leaf, Schema, Section,
    TypeHint, config,
};
use tier_fs::TomlStore;
use tier_test_utils::{Recorder, StaticLoader, p, to_json};

struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn file(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn write(&self, relative: &str, content: &str) {
        let file = self.file(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.file(relative)).unwrap()
    }

    fn store(&self) -> TomlStore {
        TomlStore::new(self.dir.path())
    }
}

fn train_schema() -> Schema {
    Schema::new()
        .field("lr", json!(0.1), TypeHint::Float)
        .field("epochs", json!(10), TypeHint::Integer)
}

fn jobs(train: Leaf) -> Section {
    Section::new().section("jobs", Section::new().leaf("train", train))
}

#[test]
fn hand_edit_then_refresh_reaches_the_live_object() {
    let ws = TestWorkspace::new();
    ws.write("jobs/train.toml", "lr = 0.5\n");
    let recorder = Recorder::new();
    let engine = Engine::new(ws.store());
    engine.load(jobs(recorder.leaf_with(train_schema()))).unwrap();
    let train = p("jobs.train");
    let object = engine.get_object(&train).unwrap();

    ws.write("jobs/train.toml", "lr = 0.9\n");
    let outcome = engine.refresh(&train).unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.diff[0].key, "lr");
    assert_eq!(recorder.updates(), 1);
    assert_eq!(recorder.last_update().unwrap()["lr"], ConfigValue::from(json!(0.9)));
    assert!(object.ptr_eq(&engine.get_object(&train).unwrap()));
}

#[test]
fn saved_updates_are_seen_by_the_next_session() {
    let ws = TestWorkspace::new();
    ws.write("jobs/train.toml", "# tuned\nlr = 0.5\n");
    let train = p("jobs.train");

    let first = Engine::new(ws.store());
    first.load(jobs(Recorder::new().leaf_with(train_schema()))).unwrap();
    first.update(&train, config([("lr", json!(0.25))]), true).unwrap();
    first.update(&train, config([("epochs", json!(3))]), false).unwrap();
    first.save(&train).unwrap();

    let content = ws.read("jobs/train.toml");
    assert!(content.starts_with("# tuned\nlr = 0.25\n"));
    assert!(content.contains("epochs = 10"));

    let second = Engine::new(ws.store());
    second.load(jobs(Recorder::new().leaf_with(train_schema()))).unwrap();
    assert_eq!(
        second.resolve(&train).unwrap(),
        config([("epochs", json!(10)), ("lr", json!(0.25))])
    );
}

#[test]
fn created_section_is_saved_to_a_new_file() {
    let ws = TestWorkspace::new();
    let engine = Engine::new(ws.store());
    engine.load(Section::new()).unwrap();
    let extra = p("extras.notes");

    engine.reset(&extra, true).unwrap();
    engine.update(&extra, config([("owner", json!("ops"))]), true).unwrap();
    engine.save(&extra).unwrap();

    assert_eq!(ws.read("extras/notes.toml"), "owner = \"ops\"\n");
}

#[test]
fn declared_items_read_their_configuration_from_files() {
    let ws = TestWorkspace::new();
    ws.write("plugins/resize.toml", "size = 4\n");
    let loader = StaticLoader::new()
        .with(
            p("plugins.resize"),
            Leaf::function(|c, _| Ok(to_json(c)))
                .with_schema(Schema::new().field("size", json!(1), TypeHint::Integer)),
        )
        .malformed(p("plugins.broken"), "no entry point");
    let engine = Engine::new(ws.store()).with_loader(loader);
    engine
        .load(Section::new().section(
            "plugins",
            Section::new().declare("resize").declare("broken"),
        ))
        .unwrap();

    assert_eq!(engine.run(&p("plugins.resize")).unwrap(), json!({"size": 4}));
    assert!(matches!(
        engine.run(&p("plugins.broken")).unwrap_err(),
        Error::ItemMalformed { .. }
    ));
}

#[test]
fn options_file_selects_batch_behaviour() {
    let ws = TestWorkspace::new();
    ws.write("tier.toml", "batch_mode = \"stop-on-error\"\nmax_propagation_rounds = 8\n");
    let options = EngineOptions::load(ws.file("tier.toml")).unwrap();
    assert_eq!(options.max_propagation_rounds, 8);

    let engine = Engine::new(ws.store()).with_options(options);
    engine.load(jobs(Recorder::new().leaf_with(train_schema()))).unwrap();
    let train = p("jobs.train");

    let report = engine.batch_update(vec![
        BatchEntry::new(train.clone(), config([("epochs", json!("many"))])),
        BatchEntry::new(train.clone(), config([("lr", json!(0.3))])),
    ]);

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.skipped, vec![train.clone()]);
    assert_eq!(engine.resolve(&train).unwrap()["lr"], ConfigValue::from(json!(0.1)));
}

#[test]
fn sweep_leaves_the_files_alone() {
    let ws = TestWorkspace::new();
    let original = "# sweep base\na = 0\n";
    ws.write("grid/job.toml", original);
    let engine = Engine::new(ws.store());
    engine
        .load(Section::new().section(
            "grid",
            Section::new().leaf(
                "job",
                Leaf::function(|c, _| Ok(to_json(c)))
                    .with_schema(Schema::new().field("a", json!(0), TypeHint::Integer)),
            ),
        ))
        .unwrap();
    let job = p("grid.job");

    let runs = engine
        .iterate(
            &[job.clone()],
            vec![
                ChangeSet::new(job.clone(), config([("a", json!(1))])),
                ChangeSet::new(job.clone(), config([("a", json!(2))])),
            ],
        )
        .unwrap();
    engine.save(&job).unwrap();

    let results: Vec<_> = runs.into_iter().map(|run| run.result).collect();
    assert_eq!(results, vec![json!({"a": 1}), json!({"a": 2})]);
    assert_eq!(ws.read("grid/job.toml"), original);
}
