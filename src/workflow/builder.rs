//! Stage-graph validation for workflow templates.
//!
//! A template's stages form a directed acyclic graph. Validation happens
//! once, at registration time:
//! - stage names must be unique
//! - every dependency must reference an existing stage
//! - no cycles are allowed (Kahn's algorithm)

use crate::errors::WorkflowError;
use crate::workflow::StageSpec;
use std::collections::{HashMap, HashSet};

/// Index into a template's stage list.
pub type StageIndex = usize;

/// Validated dependency graph over a template's stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Map from stage name to index.
    index_map: HashMap<String, StageIndex>,
    /// index -> stages that depend on it.
    forward_edges: Vec<Vec<StageIndex>>,
    /// index -> stages it depends on.
    reverse_edges: Vec<Vec<StageIndex>>,
}

impl StageGraph {
    /// Build and validate the graph for a list of stages.
    pub fn build(stages: &[StageSpec]) -> Result<Self, WorkflowError> {
        let mut index_map = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            if index_map.insert(stage.name.clone(), i).is_some() {
                return Err(WorkflowError::DuplicateStage {
                    name: stage.name.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); stages.len()];
        let mut reverse_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); stages.len()];

        for (to_idx, stage) in stages.iter().enumerate() {
            for dep in &stage.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| WorkflowError::UnknownDependency {
                            stage: stage.name.clone(),
                            dependency: dep.clone(),
                        })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = Self {
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.validate_no_cycles(stages)?;
        Ok(graph)
    }

    /// Validate acyclicity using Kahn's algorithm.
    fn validate_no_cycles(&self, stages: &[StageSpec]) -> Result<(), WorkflowError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();

        let mut queue: Vec<StageIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in &self.forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != stages.len() {
            let cycle_stages: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| stages[i].name.clone())
                .collect();
            return Err(WorkflowError::DependencyCycle {
                stages: cycle_stages,
            });
        }
        Ok(())
    }

    /// Stage indices the given stage depends on.
    pub fn dependencies(&self, index: StageIndex) -> &[StageIndex] {
        self.reverse_edges.get(index).map_or(&[], Vec::as_slice)
    }

    /// Whether every dependency of `index` is in `completed`.
    pub fn dependencies_satisfied(
        &self,
        index: StageIndex,
        completed: &HashSet<StageIndex>,
    ) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| completed.contains(dep))
    }

    /// Index for a stage name.
    pub fn index_of(&self, name: &str) -> Option<StageIndex> {
        self.index_map.get(name).copied()
    }
}
