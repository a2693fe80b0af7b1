//! Whole command runs against the in-memory store

use clap::Parser;
use ifc_graph_cli::Cli;
use std::path::Path;

fn write_model(dir: &Path) -> String {
    let path = dir.join("tower.json");
    std::fs::write(
        &path,
        r#"{
            "project": {"GlobalId": "P1", "Name": "Tower"},
            "sites": [{"GlobalId": "S1"}],
            "buildings": [{"GlobalId": "B1", "SiteGlobalId": "S1"}],
            "storeys": [{"GlobalId": "L1", "BuildingGlobalId": "B1"}],
            "elements": [
                {"GlobalId": "W1", "IFCType": "IfcWall", "ContainedIn": "L1"},
                {"GlobalId": "D1", "IFCType": "IfcDoor", "ContainedIn": "L1"}
            ],
            "relationships": [
                {"SourceGlobalId": "D1", "TargetGlobalId": "W1", "RelationshipType": "IfcRelFillsElement"}
            ],
            "topology": {"adjacency": {"W1": ["D1"]}}
        }"#,
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

fn args<'a>(config: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut all = vec!["ifc-graph", "--config", config, "--json"];
    all.extend_from_slice(rest);
    all
}

#[tokio::test]
async fn test_ingest_into_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());
    let config = dir.path().join("none.toml").to_string_lossy().into_owned();
    let perf = dir.path().join("perf").to_string_lossy().into_owned();

    let cli = Cli::try_parse_from(args(
        &config,
        &["ingest", &model, "--parallel", "--workers", "2", "--topology", "--monitor", "--monitor-dir", &perf],
    ))
    .unwrap();
    ifc_graph_cli::run(cli).await.unwrap();

    let reports: Vec<_> = std::fs::read_dir(&perf).unwrap().collect();
    assert_eq!(reports.len(), 2);
}

#[tokio::test]
async fn test_inspect_missing_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("none.toml").to_string_lossy().into_owned();
    let missing = dir.path().join("missing.json").to_string_lossy().into_owned();

    let cli = Cli::try_parse_from(args(&config, &["inspect", &missing])).unwrap();
    let err = ifc_graph_cli::run(cli).await.unwrap_err();
    assert!(err.to_string().contains("failed to load model"));
}

#[tokio::test]
async fn test_inspect_and_config_show() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());
    let config = dir.path().join("none.toml").to_string_lossy().into_owned();

    let inspect = Cli::try_parse_from(args(&config, &["inspect", &model])).unwrap();
    ifc_graph_cli::run(inspect).await.unwrap();

    let show = Cli::try_parse_from(args(&config, &["config", "show"])).unwrap();
    ifc_graph_cli::run(show).await.unwrap();
}
