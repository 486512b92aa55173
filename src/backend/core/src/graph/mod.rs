//! Service graph: the static declaration of services and their
//! "ready-before" edges.
//!
//! This module handles:
//! - Dependency resolution via a deterministic topological sort
//! - Cycle and dangling-reference detection
//! - Stage layering for concurrent probing
//! - The built-in stack declaration derived from configuration

mod node;

pub use node::{Node, NodeId};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::config::Config;
use crate::error::{Result, StackupError};
use crate::probe::ProbeSpec;

/// Node identifiers of the built-in stack.
pub mod builtin {
    pub const DATABASE: &str = "database";
    pub const MIGRATIONS: &str = "migrations";
    pub const CACHE: &str = "cache";
    pub const APP: &str = "app";
    pub const VERIFY: &str = "verify";
}

/// A directed graph of services. Edges point from a dependency to its
/// dependent.
///
/// Node indices follow declaration order, which is what makes
/// [`ServiceGraph::topological_order`] reproducible.
#[derive(Debug, Clone, Default)]
pub struct ServiceGraph {
    /// The underlying graph structure
    graph: DiGraph<Node, ()>,

    /// Map from NodeId to graph index for O(1) lookup
    index: HashMap<NodeId, NodeIndex>,
}

impl ServiceGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Dependencies may refer to nodes declared later; dangling
    /// references are reported by [`ServiceGraph::validate`].
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = node.id.clone();

        if self.index.contains_key(&id) {
            return Err(StackupError::duplicate_node(id.as_str()));
        }

        let deps: Vec<NodeIndex> = node
            .depends_on
            .iter()
            .filter_map(|dep| self.index.get(dep).copied())
            .collect();

        let idx = self.graph.add_node(node);
        self.index.insert(id.clone(), idx);

        for dep in deps {
            self.graph.update_edge(dep, idx, ());
        }

        // Earlier nodes waiting on this one
        let waiting: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&other| self.graph[other].depends_on.contains(&id))
            .collect();
        for other in waiting {
            self.graph.update_edge(idx, other, ());
        }

        Ok(id)
    }

    /// Get a node by ID.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Check that every dependency resolves and that the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for node in self.graph.node_weights() {
            if let Some(dep) = node.depends_on.iter().find(|dep| !self.index.contains_key(*dep)) {
                return Err(StackupError::unknown_dependency(node.id.as_str(), dep.as_str()));
            }
        }

        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let node = &self.graph[cycle.node_id()];
            StackupError::cycle_detected(node.id.as_str())
        })
    }

    /// Get nodes in dependency order. Among nodes whose dependencies are all
    /// placed, the one declared first goes next.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        self.validate()?;

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(i)) = ready.pop() {
            let idx = NodeIndex::new(i);
            order.push(self.graph[idx].id.clone());

            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        // validate() already rejected cycles
        debug_assert_eq!(order.len(), self.len());
        Ok(order)
    }

    /// Group nodes into stages. Nodes in the same stage have no path between
    /// them and may be probed concurrently.
    pub fn stages(&self) -> Result<Vec<Vec<NodeId>>> {
        let order = self.topological_order()?;
        let mut level: HashMap<&NodeId, usize> = HashMap::with_capacity(order.len());
        let mut stages: Vec<Vec<NodeId>> = Vec::new();

        for id in &order {
            let idx = self.index[id];
            let stage = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| level[&self.graph[dep].id] + 1)
                .max()
                .unwrap_or(0);

            level.insert(id, stage);
            if stages.len() <= stage {
                stages.resize_with(stage + 1, Vec::new);
            }
            stages[stage].push(id.clone());
        }

        Ok(stages)
    }

    /// Direct downstream nodes of `id`, in declaration order.
    pub fn dependents_of(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let idx = self
            .index
            .get(id)
            .ok_or_else(|| StackupError::node_not_found(id.as_str()))?;

        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*idx, Direction::Outgoing)
            .collect();
        dependents.sort();
        dependents.dedup();

        Ok(dependents
            .into_iter()
            .map(|idx| self.graph[idx].id.clone())
            .collect())
    }

    /// Build the stack declared by `config`: data store, optional migration
    /// step, cache, application and verification, followed by any extra
    /// `[[services]]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut graph = Self::new();
        let db = &config.database;

        let postgres = ProbeSpec::Postgres {
            host: db.host.clone(),
            port: db.port,
            user: db.user.clone(),
            password: db.password.clone(),
            database: db.name.clone(),
        };

        let mut database = Node::new(builtin::DATABASE, postgres.clone())
            .with_description("PostgreSQL data store");
        database.retry = db.retry.clone();
        graph.add_node(database)?;

        let app_upstream = match config.migration.action(db)? {
            Some(action) => {
                let mut migrations = Node::new(builtin::MIGRATIONS, postgres)
                    .depends_on(builtin::DATABASE)
                    .with_action(action)
                    .with_description("schema migration");
                migrations.retry = db.retry.clone();
                graph.add_node(migrations)?;
                builtin::MIGRATIONS
            }
            None => builtin::DATABASE,
        };

        let mut cache = Node::new(
            builtin::CACHE,
            ProbeSpec::Redis {
                host: config.cache.host.clone(),
                port: config.cache.port,
                password: config.cache.password.clone(),
            },
        )
        .with_description("Redis cache");
        cache.retry = config.cache.retry.clone();
        graph.add_node(cache)?;

        let mut app = Node::new(builtin::APP, ProbeSpec::http(config.app.health_url()))
            .depends_on(app_upstream)
            .depends_on(builtin::CACHE)
            .with_description("web application");
        app.retry = config.app.retry.clone();
        graph.add_node(app)?;

        let mut verify = Node::new(builtin::VERIFY, ProbeSpec::http(config.app.verify_url()))
            .depends_on(builtin::APP)
            .with_description("application serves requests");
        verify.retry = config.app.retry.clone();
        graph.add_node(verify)?;

        for service in &config.services {
            graph.add_node(service.clone())?;
        }

        Ok(graph)
    }
}
