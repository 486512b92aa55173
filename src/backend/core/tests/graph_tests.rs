//! Integration tests for the service graph and the built-in stack.

use stackup_core::config::Config;
use stackup_core::graph::{builtin, Node, NodeId, ServiceGraph};
use stackup_core::probe::ProbeSpec;
use stackup_core::ErrorCode;
use std::collections::HashMap;
use std::path::Path;

fn load(toml: &str) -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stackup.toml");
    std::fs::write(&path, toml).unwrap();
    Config::load_with_env(Some(Path::new(&path)), Some(HashMap::new())).unwrap()
}

const BASE: &str = r#"
[database]
host = "db"
user = "app"
password = "hunter2"
name = "app_db"

[cache]
host = "redis"
"#;

fn ids(order: &[NodeId]) -> Vec<&str> {
    order.iter().map(NodeId::as_str).collect()
}

#[test]
fn test_builtin_stack_without_migration() {
    let graph = ServiceGraph::from_config(&load(BASE)).unwrap();

    assert_eq!(graph.len(), 4);
    assert!(!graph.contains(&NodeId::from(builtin::MIGRATIONS)));

    let app = graph.node(&NodeId::from(builtin::APP)).unwrap();
    assert_eq!(
        app.depends_on,
        vec![NodeId::from(builtin::DATABASE), NodeId::from(builtin::CACHE)]
    );

    let order = graph.topological_order().unwrap();
    assert_eq!(ids(&order), vec!["database", "cache", "app", "verify"]);
}

#[test]
fn test_builtin_stack_with_migration() {
    let config = load(&format!(
        "{}\n[migration]\ncommand = \"alembic\"\nargs = [\"upgrade\", \"head\"]\n",
        BASE
    ));
    let graph = ServiceGraph::from_config(&config).unwrap();

    let migrations = graph.node(&NodeId::from(builtin::MIGRATIONS)).unwrap();
    assert_eq!(migrations.depends_on, vec![NodeId::from(builtin::DATABASE)]);
    assert_eq!(migrations.action.as_ref().map(|a| a.program()), Some("alembic"));

    let stages = graph.stages().unwrap();
    assert_eq!(
        stages,
        vec![
            vec![NodeId::from("database"), NodeId::from("cache")],
            vec![NodeId::from("migrations")],
            vec![NodeId::from("app")],
            vec![NodeId::from("verify")],
        ]
    );
}

#[test]
fn test_builtin_probe_targets() {
    let graph = ServiceGraph::from_config(&load(BASE)).unwrap();

    let database = graph.node(&NodeId::from(builtin::DATABASE)).unwrap();
    assert_eq!(database.probe.kind_name(), "postgres");
    assert_eq!(database.probe.target(), "db:5432/app_db");

    let cache = graph.node(&NodeId::from(builtin::CACHE)).unwrap();
    assert_eq!(cache.probe, ProbeSpec::Redis {
        host: "redis".into(),
        port: 6379,
        password: None,
    });

    let verify = graph.node(&NodeId::from(builtin::VERIFY)).unwrap();
    assert_eq!(verify.probe, ProbeSpec::http("http://localhost:8000/"));
}

#[test]
fn test_services_extend_the_stack() {
    let config = load(&format!(
        r#"{}
[[services]]
id = "collector"
depends_on = ["app"]
probe = {{ kind = "http", url = "http://localhost:9090/-/ready" }}

[[services]]
id = "dashboard"
depends_on = ["collector"]
probe = {{ kind = "http", url = "http://localhost:3000/api/health" }}
"#,
        BASE
    ));
    let graph = ServiceGraph::from_config(&config).unwrap();

    assert_eq!(graph.len(), 6);
    let order = graph.topological_order().unwrap();
    assert_eq!(ids(&order).last(), Some(&"dashboard"));
    assert_eq!(
        graph.dependents_of(&NodeId::from(builtin::APP)).unwrap(),
        vec![NodeId::from("verify"), NodeId::from("collector")]
    );
}

#[test]
fn test_service_clashing_with_builtin_is_rejected() {
    let config = load(&format!(
        r#"{}
[[services]]
id = "cache"
probe = {{ kind = "tcp", host = "localhost", port = 11211 }}
"#,
        BASE
    ));
    let err = ServiceGraph::from_config(&config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateNode);
}

#[test]
fn test_service_with_unknown_dependency_fails_validation() {
    let config = load(&format!(
        r#"{}
[[services]]
id = "alerts"
depends_on = ["collector"]
probe = {{ kind = "tcp", host = "localhost", port = 9093 }}
"#,
        BASE
    ));
    let graph = ServiceGraph::from_config(&config).unwrap();
    let err = graph.validate().unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownDependency);
    assert!(err.is_configuration());
}

#[test]
fn test_long_chain_order() {
    let mut graph = ServiceGraph::new();
    for i in (0..50).rev() {
        let mut node = Node::new(format!("n{}", i), ProbeSpec::tcp("localhost", 1));
        if i > 0 {
            node = node.depends_on(format!("n{}", i - 1));
        }
        graph.add_node(node).unwrap();
    }

    let order = graph.topological_order().unwrap();
    let expected: Vec<String> = (0..50).map(|i| format!("n{}", i)).collect();
    assert_eq!(ids(&order), expected.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(graph.stages().unwrap().len(), 50);
}
