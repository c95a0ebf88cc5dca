//! Dependency graph over workflow stages.
//!
//! The graph assigns dense integer ids in stage order and derives the
//! structures scheduling needs:
//! - successor lists (the inverse of `needs`),
//! - the root set (stages with no prerequisites, the successors of a
//!   virtual source node),
//! - the memoized transitive closure of `needs`, used as the readiness
//!   predicate,
//! - a deterministic topological ordering for serial script emission,
//! - the downstream closure of a stage, used for rerun invalidation.
//!
//! Construction validates acyclicity and reports the offending cycle by
//! name.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::workflow::{Workflow, WorkflowError};

/// Dense stage index in `[0, N)`, assigned in declaration order.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

#[derive(Debug, Clone)]
pub struct TaskGraph {
    names: Vec<String>,
    name_to_id: HashMap<String, TaskId>,
    needs: Vec<Vec<TaskId>>,
    successors: Vec<Vec<TaskId>>,
    all_needs: Vec<BTreeSet<TaskId>>,
    roots: Vec<TaskId>,
}

impl TaskGraph {
    /// Build the graph from a validated workflow and check it is acyclic.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let count = workflow.stages.len();
        let mut name_to_id = HashMap::with_capacity(count);
        let mut names = Vec::with_capacity(count);
        for (id, stage) in workflow.stages.iter().enumerate() {
            name_to_id.insert(stage.name.clone(), id);
            names.push(stage.name.clone());
        }

        let mut needs: Vec<Vec<TaskId>> = vec![Vec::new(); count];
        let mut successors: Vec<Vec<TaskId>> = vec![Vec::new(); count];
        for (id, stage) in workflow.stages.iter().enumerate() {
            for dependency in &stage.needs {
                let dep_id = name_to_id[dependency.as_str()];
                needs[id].push(dep_id);
                successors[dep_id].push(id);
            }
        }
        for list in needs.iter_mut().chain(successors.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let roots = (0..count).filter(|id| needs[*id].is_empty()).collect();

        let graph = Self {
            names,
            name_to_id,
            needs,
            successors,
            all_needs: Vec::new(),
            roots,
        };
        graph.ensure_acyclic()?;

        let all_needs = graph.compute_all_needs();
        Ok(Self { all_needs, ..graph })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, id: TaskId) -> &str {
        &self.names[id]
    }

    pub fn lookup(&self, name: &str) -> Option<TaskId> {
        self.name_to_id.get(name).copied()
    }

    /// Stages with no prerequisites, in id order.
    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    pub fn successors(&self, id: TaskId) -> &[TaskId] {
        &self.successors[id]
    }

    /// Transitive closure of a stage's prerequisites.
    pub fn all_needs(&self, id: TaskId) -> &BTreeSet<TaskId> {
        &self.all_needs[id]
    }

    /// The stage itself plus everything reachable through successor edges.
    pub fn downstream_closure(&self, id: TaskId) -> BTreeSet<TaskId> {
        let mut closure = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if closure.insert(current) {
                stack.extend(self.successors[current].iter().copied());
            }
        }
        closure
    }

    /// A topological ordering of all stage ids.
    ///
    /// Kahn traversal with a lowest-id tiebreak, so the ordering is
    /// deterministic for a given workflow.
    pub fn topological_sort(&self) -> Result<Vec<TaskId>, WorkflowError> {
        let mut indegree: Vec<usize> = self.needs.iter().map(Vec::len).collect();
        let mut heap: BinaryHeap<Reverse<TaskId>> = self
            .roots
            .iter()
            .map(|id| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(id)) = heap.pop() {
            order.push(id);
            for succ in &self.successors[id] {
                indegree[*succ] -= 1;
                if indegree[*succ] == 0 {
                    heap.push(Reverse(*succ));
                }
            }
        }

        if order.len() != self.len() {
            return Err(WorkflowError::DependencyCycle(
                "graph has no topological ordering".to_string(),
            ));
        }
        Ok(order)
    }

    /// Memoized DFS over `needs`; each stage's closure is computed once.
    fn compute_all_needs(&self) -> Vec<BTreeSet<TaskId>> {
        fn visit(
            id: TaskId,
            needs: &[Vec<TaskId>],
            memo: &mut Vec<Option<BTreeSet<TaskId>>>,
        ) -> BTreeSet<TaskId> {
            if let Some(cached) = &memo[id] {
                return cached.clone();
            }
            let mut closure = BTreeSet::new();
            for dep in &needs[id] {
                closure.insert(*dep);
                closure.extend(visit(*dep, needs, memo));
            }
            memo[id] = Some(closure.clone());
            closure
        }

        let mut memo = vec![None; self.len()];
        (0..self.len())
            .map(|id| visit(id, &self.needs, &mut memo))
            .collect()
    }

    fn ensure_acyclic(&self) -> Result<(), WorkflowError> {
        let mut states: HashMap<TaskId, VisitState> = HashMap::new();
        let mut path = Vec::new();
        let mut path_index: HashMap<TaskId, usize> = HashMap::new();

        for id in 0..self.len() {
            if states.contains_key(&id) {
                continue;
            }
            if let Some(cycle) = self.find_cycle(id, &mut states, &mut path, &mut path_index) {
                let rendered = cycle
                    .iter()
                    .map(|id| self.names[*id].as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(WorkflowError::DependencyCycle(rendered));
            }
        }

        Ok(())
    }

    fn find_cycle(
        &self,
        id: TaskId,
        states: &mut HashMap<TaskId, VisitState>,
        path: &mut Vec<TaskId>,
        path_index: &mut HashMap<TaskId, usize>,
    ) -> Option<Vec<TaskId>> {
        states.insert(id, VisitState::Visiting);
        path_index.insert(id, path.len());
        path.push(id);

        for dep in &self.needs[id] {
            match states.get(dep).copied() {
                None => {
                    if let Some(cycle) = self.find_cycle(*dep, states, path, path_index) {
                        return Some(cycle);
                    }
                }
                Some(VisitState::Visiting) => {
                    let start = path_index[dep];
                    let mut cycle = path[start..].to_vec();
                    cycle.push(*dep);
                    return Some(cycle);
                }
                Some(VisitState::Visited) => {}
            }
        }

        path.pop();
        path_index.remove(&id);
        states.insert(id, VisitState::Visited);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Stage;

    fn mk_stage(name: &str, needs: &[&str]) -> Stage {
        Stage {
            name: name.to_string(),
            cmd: "true".to_string(),
            cwd: String::new(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            resources: Default::default(),
            timeframe: -1,
        }
    }

    fn mk_graph(stages: &[(&str, &[&str])]) -> Result<TaskGraph, WorkflowError> {
        let workflow = Workflow {
            stages: stages
                .iter()
                .map(|&(name, needs)| mk_stage(name, needs))
                .collect(),
        };
        TaskGraph::from_workflow(&workflow)
    }

    #[test]
    fn ids_follow_stage_order() {
        let graph = mk_graph(&[("c", &[]), ("a", &[]), ("b", &["c"])]).unwrap();
        assert_eq!(graph.lookup("c"), Some(0));
        assert_eq!(graph.lookup("a"), Some(1));
        assert_eq!(graph.lookup("b"), Some(2));
        assert_eq!(graph.name(2), "b");
        assert_eq!(graph.lookup("ghost"), None);
    }

    #[test]
    fn roots_and_successors_invert_needs() {
        let graph = mk_graph(&[
            ("root", &[]),
            ("l", &["root"]),
            ("r", &["root"]),
            ("sink", &["l", "r"]),
        ])
        .unwrap();

        assert_eq!(graph.roots(), &[0]);
        assert_eq!(graph.successors(0), &[1, 2]);
        assert_eq!(graph.successors(1), &[3]);
        assert_eq!(graph.successors(3), &[] as &[TaskId]);
    }

    #[test]
    fn all_needs_is_transitive() {
        let graph = mk_graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &["b", "c"]),
        ])
        .unwrap();

        assert!(graph.all_needs(0).is_empty());
        assert_eq!(graph.all_needs(2), &BTreeSet::from([0, 1]));
        assert_eq!(graph.all_needs(3), &BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let err = mk_graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("dependency cycle detected"), "{rendered}");
        assert!(
            rendered.contains("a -> c -> b -> a")
                || rendered.contains("c -> b -> a -> c")
                || rendered.contains("b -> a -> c -> b"),
            "{rendered}"
        );
    }

    #[test]
    fn topological_sort_respects_edges_and_prefers_low_ids() {
        let graph = mk_graph(&[
            ("b", &[]),
            ("a", &[]),
            ("sink", &["a", "b"]),
            ("tail", &["sink"]),
        ])
        .unwrap();

        // Independent roots come out in id order.
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn topological_sort_of_diamond() {
        let graph = mk_graph(&[
            ("root", &[]),
            ("l", &["root"]),
            ("r", &["root"]),
            ("sink", &["l", "r"]),
        ])
        .unwrap();

        let order = graph.topological_sort().unwrap();
        let pos = |id: TaskId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn downstream_closure_includes_self_and_dependents() {
        let graph = mk_graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("other", &[]),
        ])
        .unwrap();

        assert_eq!(graph.downstream_closure(1), BTreeSet::from([1, 2]));
        assert_eq!(graph.downstream_closure(0), BTreeSet::from([0, 1, 2]));
        assert_eq!(graph.downstream_closure(3), BTreeSet::from([3]));
    }

    #[test]
    fn empty_workflow_is_valid() {
        let graph = mk_graph(&[]).unwrap();
        assert_eq!(graph.len(), 0);
        assert!(graph.roots().is_empty());
        assert!(graph.topological_sort().unwrap().is_empty());
    }

    #[test]
    fn duplicate_needs_entries_collapse() {
        let workflow = Workflow {
            stages: vec![
                mk_stage("a", &[]),
                Stage {
                    needs: vec!["a".to_string(), "a".to_string()],
                    ..mk_stage("b", &[])
                },
            ],
        };
        let graph = TaskGraph::from_workflow(&workflow).unwrap();
        assert_eq!(graph.successors(0), &[1]);
        assert_eq!(graph.all_needs(1), &BTreeSet::from([0]));
    }
}
