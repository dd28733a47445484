//! Depth-first searches over the task dependency graph.
//!
//! Edges point from a task to the tasks it depends on. The orchestrator keeps
//! each goal's graph acyclic; these helpers still report a cycle instead of
//! looping if one is ever found.

use crate::goal::Task;
use concord_core::{ConcordResult, EntityId, GoalError};
use std::collections::{HashMap, HashSet};

/// Dependency path `from -> ... -> to`, if `to` is reachable from `from`.
///
/// Adding the edge `to -> from` would close a cycle exactly when a path
/// exists.
pub(crate) fn dependency_path(
    tasks: &HashMap<EntityId, Task>,
    from: EntityId,
    to: EntityId,
) -> Option<Vec<EntityId>> {
    fn walk(
        tasks: &HashMap<EntityId, Task>,
        current: EntityId,
        target: EntityId,
        seen: &mut HashSet<EntityId>,
        path: &mut Vec<EntityId>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if seen.insert(current) {
            if let Some(task) = tasks.get(&current) {
                for dep in &task.dependencies {
                    if walk(tasks, *dep, target, seen, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    walk(tasks, from, to, &mut HashSet::new(), &mut path).then_some(path)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Every transitive dependency of `root` followed by `root` itself, each
/// task after all of its dependencies. Siblings are visited in creation
/// order (`seq`).
pub(crate) fn topological_order(
    tasks: &HashMap<EntityId, Task>,
    seq: &HashMap<EntityId, u64>,
    root: EntityId,
) -> ConcordResult<Vec<EntityId>> {
    fn visit(
        tasks: &HashMap<EntityId, Task>,
        seq: &HashMap<EntityId, u64>,
        id: EntityId,
        marks: &mut HashMap<EntityId, Mark>,
        stack: &mut Vec<EntityId>,
        order: &mut Vec<EntityId>,
    ) -> ConcordResult<()> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|t| *t == id).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(id);
                return Err(GoalError::CyclicDependency { task_id: id, cycle }.into());
            }
            None => {}
        }
        let task = tasks
            .get(&id)
            .ok_or(GoalError::TaskNotFound { task_id: id })?;

        marks.insert(id, Mark::Visiting);
        stack.push(id);
        let mut deps = task.dependencies.clone();
        deps.sort_by_key(|dep| seq.get(dep).copied().unwrap_or(u64::MAX));
        for dep in deps {
            visit(tasks, seq, dep, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        order.push(id);
        Ok(())
    }

    let mut order = Vec::new();
    visit(
        tasks,
        seq,
        root,
        &mut HashMap::new(),
        &mut Vec::new(),
        &mut order,
    )?;
    Ok(order)
}
