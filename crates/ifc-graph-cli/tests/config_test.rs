//! Configuration file loading and flag merging

use clap::Parser;
use ifc_graph_cli::cli::{Commands, IngestArgs};
use ifc_graph_cli::commands::config::redacted;
use ifc_graph_cli::{Cli, CliError, FileConfig, StoreKind};
use std::path::PathBuf;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = FileConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(cfg, FileConfig::default());
    assert_eq!(cfg.store.kind, StoreKind::Memory);
    assert_eq!(cfg.pipeline.batch_size, 100);
}

#[test]
fn test_load_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[pipeline]
parallel_processing = true
max_workers = 6
parallel_batch_size = 500

[store]
kind = "http"
url = "http://graph.internal:15474"
api_key = "nx_0123456789abcdef"
"#,
    )
    .unwrap();

    let cfg = FileConfig::load(Some(&path)).unwrap();
    assert!(cfg.pipeline.parallel_processing);
    assert_eq!(cfg.pipeline.max_workers, Some(6));
    assert_eq!(cfg.pipeline.parallel_batch_size, 500);
    assert_eq!(cfg.pipeline.batch_size, 100);
    assert_eq!(cfg.store.kind, StoreKind::Http);
    assert_eq!(cfg.store.timeout_secs, 30);
    assert_eq!(cfg.store.http_config().api_key.as_deref(), Some("nx_0123456789abcdef"));
}

#[test]
fn test_invalid_file_is_reported_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[pipeline]\nbatch_size = \"many\"\n").unwrap();

    let err = FileConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, CliError::ConfigParse { .. }));
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn test_toml_round_trip_of_defaults() {
    let cfg = FileConfig::default();
    let text = cfg.to_toml().unwrap();
    assert!(text.contains("[pipeline]"));
    assert!(text.contains("[store]"));
    assert_eq!(FileConfig::from_toml(&text).unwrap(), cfg);
}

#[test]
fn test_flags_override_file_values() {
    let mut file = FileConfig::default();
    file.pipeline.batch_size = 50;
    file.pipeline.max_workers = Some(2);
    file.store.username = Some("loader".to_string());

    let args = IngestArgs {
        model: PathBuf::from("tower.json"),
        parallel: true,
        workers: Some(8),
        topology: true,
        store: Some(StoreKind::Http),
        url: Some("http://localhost:9999".to_string()),
        ..Default::default()
    };
    let cfg = args.apply(file);

    assert_eq!(cfg.pipeline.batch_size, 50);
    assert_eq!(cfg.pipeline.max_workers, Some(8));
    assert!(cfg.pipeline.parallel_processing);
    assert!(cfg.pipeline.enable_topological_analysis);
    assert!(!cfg.pipeline.clear_existing);
    assert_eq!(cfg.store.kind, StoreKind::Http);
    assert_eq!(cfg.store.url, "http://localhost:9999");
    assert_eq!(cfg.store.username.as_deref(), Some("loader"));
}

#[test]
fn test_redacted_masks_secrets() {
    let mut cfg = FileConfig::default();
    cfg.store.api_key = Some("nx_0123456789abcdef".to_string());
    cfg.store.password = Some("hunter2".to_string());

    let shown = redacted(&cfg);
    assert_eq!(shown.store.api_key.as_deref(), Some("nx_01234..."));
    assert_eq!(shown.store.password.as_deref(), Some("********"));
}

#[test]
fn test_redacted_hides_short_api_keys_completely() {
    for key in ["abc", "12345678", "0123456789abcdef"] {
        let mut cfg = FileConfig::default();
        cfg.store.api_key = Some(key.to_string());
        let shown = redacted(&cfg);
        assert_eq!(shown.store.api_key.as_deref(), Some("********"), "key {key}");
    }
}

#[test]
fn test_parse_ingest_arguments() {
    let cli = Cli::try_parse_from([
        "ifc-graph",
        "--json",
        "ingest",
        "tower.json",
        "--parallel",
        "--workers",
        "4",
        "--batch-size",
        "25",
        "--store",
        "http",
        "--monitor-dir",
        "perf",
    ])
    .unwrap();

    assert!(cli.json);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest");
    };
    assert_eq!(args.model, PathBuf::from("tower.json"));
    assert!(args.parallel);
    assert_eq!(args.workers, Some(4));
    assert_eq!(args.batch_size, Some(25));
    assert_eq!(args.store, Some(StoreKind::Http));
    assert_eq!(args.monitor_dir, Some(PathBuf::from("perf")));
}

#[test]
fn test_invalid_store_kind_is_rejected() {
    assert!(Cli::try_parse_from(["ifc-graph", "ingest", "m.json", "--store", "neo4j"]).is_err());
}
