//! End-to-end runs of the loader against the in-memory graph.

use std::path::{Path, PathBuf};

use tabgraph_core::{LoadMode, LoadReport};
use tabgraph_graph::MemoryGraph;
use tabgraph_loader::confirm::confirm_wipe;
use tabgraph_loader::identity::IdentityAssigner;
use tabgraph_loader::validator::ValidationSummary;
use tabgraph_loader::{
    Loader, LoaderConfig, LoaderError, ReferencePolicy, RunFlags, RunOutcome, Schema,
};
use tempfile::TempDir;

const DOMAIN: &str = "research.example.org";

const SCHEMA: &str = r#"
Nodes:
  case:
    Props: [case_id, age]
    Id: case_id
  sample:
    Props: [sample_id, tissue]
    Id: sample_id
  consent:
    Props: [consent_id]
    Id: consent_id
Relationships:
  of_case:
    Mul: many_to_one
    Ends:
      - Src: sample
        Dst: case
  has_consent:
    Mul: one_to_one
    Ends:
      - Src: case
        Dst: consent
PropDefinitions:
  case_id:
    Type: String
    Req: true
  age:
    Type: Int
  sample_id:
    Type: String
    Req: true
  tissue:
    Enum: [blood, tumor, normal]
  consent_id:
    Type: String
    Req: true
"#;

struct Fixture {
    dir: TempDir,
    schema: Schema,
    config: LoaderConfig,
    graph: MemoryGraph,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.yml");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let schema = Schema::load(&[schema_path]).unwrap();
        Self {
            dir,
            schema,
            config: LoaderConfig {
                domain: DOMAIN.to_string(),
                ..Default::default()
            },
            graph: MemoryGraph::new(),
        }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn flags(&self, mode: LoadMode) -> RunFlags {
        RunFlags::new(mode, &self.config)
    }

    async fn run(&self, files: &[PathBuf], flags: &RunFlags) -> RunOutcome {
        Loader::new(&self.schema, &self.config)
            .run(&self.graph, files, flags, None)
            .await
            .unwrap()
    }
}

fn loaded(outcome: RunOutcome) -> LoadReport {
    match outcome {
        RunOutcome::Loaded(report) => report,
        other => panic!("expected a load, got {other:?}"),
    }
}

fn rejected(outcome: RunOutcome) -> ValidationSummary {
    match outcome {
        RunOutcome::Rejected(summary) => summary,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
}

fn case_and_samples(fx: &Fixture) -> Vec<PathBuf> {
    vec![
        fx.file("case.txt", "case_id\tage\nC1\t40\nC2\t51\n"),
        fx.file(
            "sample.txt",
            "sample_id\ttissue\tcase.case_id\nS1\tblood\tC1\nS2\ttumor\tC1\nS3\tnormal\tC2\n",
        ),
    ]
}

#[tokio::test]
async fn test_upsert_twice_creates_nothing_new() {
    let fx = Fixture::new();
    let files = case_and_samples(&fx);
    let flags = fx.flags(LoadMode::Upsert);

    let first = loaded(fx.run(&files, &flags).await);
    assert!(first.is_success());
    assert_eq!(first.counts.nodes_created, 5);
    assert_eq!(first.counts.relationships_created, 3);

    let second = loaded(fx.run(&files, &flags).await);
    assert_eq!(second.counts.nodes_created, 0);
    assert_eq!(second.counts.relationships_created, 0);
    assert_eq!(second.counts.relationships_deleted, 0);
    assert_eq!(second.counts.nodes_updated, 5);

    assert_eq!(fx.graph.node_count(), 5);
    assert_eq!(fx.graph.count_relationships("of_case"), 3);
}

#[tokio::test]
async fn test_new_mode_twice_conflicts_on_every_node() {
    let fx = Fixture::new();
    let files = case_and_samples(&fx);
    let flags = fx.flags(LoadMode::New);

    let first = loaded(fx.run(&files, &flags).await);
    assert!(first.is_success());
    assert_eq!(first.counts.nodes_created, 5);

    let second = loaded(fx.run(&files, &flags).await);
    assert!(!second.is_success());
    assert_eq!(second.counts.nodes_created, 0);
    assert!(second.files_loaded.is_empty());

    let failures: Vec<_> = second
        .failed_files
        .iter()
        .map(|f| (file_name(&f.file), f.reason.as_str()))
        .collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, "case.txt");
    assert!(failures[0].1.contains("2 node(s) already exist"));
    assert_eq!(failures[1].0, "sample.txt");
    assert!(failures[1].1.contains("3 node(s) already exist"));

    assert_eq!(fx.graph.node_count(), 5);
}

#[tokio::test]
async fn test_one_to_one_same_source_reports_one_violation() {
    let fx = Fixture::new();
    let files = vec![
        fx.file("consent.txt", "consent_id\nCA\nCB\n"),
        fx.file(
            "case.txt",
            "case_id\tage\tconsent.consent_id\nC1\t40\tCA\nC1\t40\tCB\n",
        ),
    ];

    let summary = rejected(fx.run(&files, &fx.flags(LoadMode::Upsert)).await);
    assert_eq!(summary.total(), 1, "{:?}", summary.violations);
    assert_eq!(summary.error_count, 1);
    let violation = &summary.violations[0];
    assert_eq!(file_name(&violation.file), "case.txt");
    assert_eq!(violation.line, Some(3));
    assert_eq!(violation.field.as_deref(), Some("consent.consent_id"));
    assert_eq!(fx.graph.node_count(), 0);
}

#[tokio::test]
async fn test_cheat_mode_bypasses_violations() {
    let fx = Fixture::new();
    let files = vec![fx.file("case.txt", "case_id\tage\nC1\tforty\nC2\t51\n")];

    let summary = rejected(fx.run(&files, &fx.flags(LoadMode::Upsert)).await);
    assert!(summary.error_count > 0);
    assert_eq!(fx.graph.node_count(), 0);

    let mut flags = fx.flags(LoadMode::Upsert);
    flags.cheat_mode = true;
    let report = loaded(fx.run(&files, &flags).await);
    assert!(report.violations.is_empty());
    assert_eq!(report.error_count, 0);
    assert_eq!(report.counts.nodes_created, 2);
    assert_eq!(fx.graph.count_label("case"), 2);
}

#[tokio::test]
async fn test_dry_run_never_writes() {
    let fx = Fixture::new();
    let flags = RunFlags {
        dry_run: true,
        ..fx.flags(LoadMode::Upsert)
    };

    // Clean batch.
    let outcome = fx.run(&case_and_samples(&fx), &flags).await;
    assert!(matches!(outcome, RunOutcome::DryRun(ref s) if s.total() == 0));

    // Batch with errors, even in cheat mode.
    let bad = vec![fx.file("bad_case.txt", "type\tcase_id\tage\ncase\t\tforty\n")];
    let cheat = RunFlags {
        cheat_mode: true,
        ..flags.clone()
    };
    match fx.run(&bad, &cheat).await {
        RunOutcome::DryRun(summary) => assert_eq!(summary.error_count, 2),
        other => panic!("expected a dry run, got {other:?}"),
    }

    let delete = RunFlags {
        mode: LoadMode::Delete,
        ..flags
    };
    fx.run(&case_and_samples(&fx), &delete).await;

    assert_eq!(fx.graph.node_count(), 0);
    assert_eq!(fx.graph.relationship_count(), 0);
}

#[tokio::test]
async fn test_unresolved_sample_then_upsert_after_case_exists() {
    let mut fx = Fixture::new();
    let sample = vec![fx.file("sample.txt", "sample_id\tcase.case_id\nS1\tC1\n")];

    // Alone, the sample's case reference cannot be resolved.
    let summary = rejected(fx.run(&sample, &fx.flags(LoadMode::Upsert)).await);
    assert_eq!(summary.total(), 1);
    assert!(summary.violations[0].message.contains("unresolved reference"));

    // A prior run creates Case C1.
    let case = vec![fx.file("case.txt", "case_id\nC1\n")];
    loaded(fx.run(&case, &fx.flags(LoadMode::Upsert)).await);

    // With out-of-batch references allowed, the sample now loads.
    fx.config.reference_policy = ReferencePolicy::AllowExternal;
    let report = loaded(fx.run(&sample, &fx.flags(LoadMode::Upsert)).await);
    assert!(report.is_success(), "{:?}", report.failed_files);
    assert_eq!(report.warning_count, 1);
    assert_eq!(report.counts.nodes_created, 1);
    assert_eq!(report.counts.relationships_created, 1);
    assert_eq!(fx.graph.count_label("case"), 1);

    let ids = IdentityAssigner::new(DOMAIN);
    assert!(fx.graph.has_relationship(
        "of_case",
        &ids.assign("sample", "S1"),
        &ids.assign("case", "C1")
    ));
}

#[tokio::test]
async fn test_external_reference_missing_at_load_fails_file() {
    let mut fx = Fixture::new();
    fx.config.external_types = vec!["case".to_string()];
    let files = vec![
        fx.file("case.txt", "case_id\nC1\n"),
        fx.file("sample.txt", "sample_id\tcase.case_id\nS1\tC1\nS2\tC404\n"),
    ];

    let report = loaded(fx.run(&files, &fx.flags(LoadMode::Upsert)).await);
    assert_eq!(report.files_loaded.len(), 1);
    assert_eq!(report.failed_files.len(), 1);
    assert!(report.failed_files[0].reason.contains("C404"));
    // The whole sample file was rolled back, S1 included.
    assert_eq!(fx.graph.count_label("sample"), 0);
    assert_eq!(fx.graph.count_label("case"), 1);
}

#[tokio::test]
async fn test_delete_mode_removes_nodes() {
    let fx = Fixture::new();
    let files = case_and_samples(&fx);
    loaded(fx.run(&files, &fx.flags(LoadMode::Upsert)).await);

    let samples = vec![files[1].clone()];
    let report = loaded(fx.run(&samples, &fx.flags(LoadMode::Delete)).await);
    assert_eq!(report.counts.nodes_deleted, 3);
    assert_eq!(report.counts.relationships_deleted, 3);
    assert_eq!(fx.graph.count_label("sample"), 0);
    assert_eq!(fx.graph.count_label("case"), 2);

    // Deleting again is a no-op.
    let again = loaded(fx.run(&samples, &fx.flags(LoadMode::Delete)).await);
    assert_eq!(again.counts.nodes_deleted, 0);
    assert!(again.is_success());
}

#[tokio::test]
async fn test_wipe_clears_store_before_loading() {
    let fx = Fixture::new();
    loaded(
        fx.run(
            &[fx.file("consent.txt", "consent_id\nCA\n")],
            &fx.flags(LoadMode::Upsert),
        )
        .await,
    );
    assert_eq!(fx.graph.count_label("consent"), 1);

    let confirmed = confirm_wipe(&mut "yes\n".as_bytes(), &mut Vec::<u8>::new(), "memory")
        .unwrap()
        .expect("confirmed");
    let outcome = Loader::new(&fx.schema, &fx.config)
        .run(
            &fx.graph,
            &case_and_samples(&fx),
            &fx.flags(LoadMode::Upsert),
            Some(confirmed),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(fx.graph.count_label("consent"), 0);
    assert_eq!(fx.graph.node_count(), 5);
}

#[tokio::test]
async fn test_parse_error_aborts_before_writing() {
    let fx = Fixture::new();
    let files = vec![
        fx.file("case.txt", "case_id\tage\nC1\t40\n"),
        fx.file("sample.txt", "sample_id\ttissue\nS1\n"),
    ];

    let err = Loader::new(&fx.schema, &fx.config)
        .run(&fx.graph, &files, &fx.flags(LoadMode::Upsert), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::Parse(_)));
    assert_eq!(fx.graph.node_count(), 0);
}
