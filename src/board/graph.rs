//! The `depends_on`/`blocks` relation between tasks.
//!
//! Edges are stored symmetrically on both task records and are only written
//! after every check passes, so a rejected add leaves both tasks untouched.
//! Cycle detection walks the full transitive closure with a visited set and
//! terminates even on malformed edge data.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::board::store::TaskStore;
use crate::errors::{BoardError, Result};

/// Record that `task_id` depends on `depends_on_id`.
pub fn add_dependency(
    store: &mut TaskStore,
    task_id: &str,
    depends_on_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    // Existence first so the error names the right id.
    store.get(task_id)?;
    store.get(depends_on_id)?;

    if task_id == depends_on_id {
        return Err(BoardError::SelfDependency {
            task: task_id.to_string(),
        });
    }
    if store.get(task_id)?.depends_on.contains(depends_on_id) {
        return Err(BoardError::DuplicateDependency {
            task: task_id.to_string(),
            depends_on: depends_on_id.to_string(),
        });
    }
    if let Some(path) = path_to(store, depends_on_id, task_id) {
        return Err(BoardError::CircularDependency {
            task: task_id.to_string(),
            depends_on: depends_on_id.to_string(),
            path,
        });
    }

    store
        .get_mut(task_id)?
        .depends_on
        .insert(depends_on_id.to_string());
    store.get_mut(task_id)?.touch(now);
    store.get_mut(depends_on_id)?.blocks.insert(task_id.to_string());
    store.get_mut(depends_on_id)?.touch(now);
    Ok(())
}

/// Remove a previously recorded dependency from both sides.
pub fn remove_dependency(
    store: &mut TaskStore,
    task_id: &str,
    depends_on_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    store.get(task_id)?;
    store.get(depends_on_id)?;

    if !store.get(task_id)?.depends_on.contains(depends_on_id) {
        return Err(BoardError::DependencyNotFound {
            task: task_id.to_string(),
            depends_on: depends_on_id.to_string(),
        });
    }

    store.get_mut(task_id)?.depends_on.remove(depends_on_id);
    store.get_mut(task_id)?.touch(now);
    store.get_mut(depends_on_id)?.blocks.remove(task_id);
    store.get_mut(depends_on_id)?.touch(now);
    Ok(())
}

/// Depth-first walk from `start` along `depends_on` edges. Returns the id
/// chain from `start` to `target` when `target` is reachable.
fn path_to(store: &TaskStore, start: &str, target: &str) -> Option<Vec<String>> {
    let mut stack = vec![start.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    let mut parent: HashMap<String, String> = HashMap::new();

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if current == target {
            let mut path = vec![current.clone()];
            let mut cursor = current;
            while let Some(prev) = parent.get(&cursor) {
                path.push(prev.clone());
                cursor = prev.clone();
            }
            path.reverse();
            return Some(path);
        }
        // Unknown ids in edge data are skipped rather than trusted.
        if let Ok(task) = store.get(&current) {
            for next in &task.depends_on {
                if !visited.contains(next) {
                    parent.entry(next.clone()).or_insert_with(|| current.clone());
                    stack.push(next.clone());
                }
            }
        }
    }
    None
}
