//! Acyclic layer dependency graph.

use tinyai_common::{Result, TinyAiError};

/// `deps[i]` must be Loaded before `i`; `dependents` is the inverse.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new(layer_count: usize) -> Self {
        Self { deps: vec![Vec::new(); layer_count], dependents: vec![Vec::new(); layer_count] }
    }

    pub fn layer_count(&self) -> usize {
        self.deps.len()
    }

    pub fn dependencies(&self, layer: usize) -> &[usize] {
        self.deps.get(layer).map_or(&[], Vec::as_slice)
    }

    pub fn dependents(&self, layer: usize) -> &[usize] {
        self.dependents.get(layer).map_or(&[], Vec::as_slice)
    }

    fn check(&self, layer: usize) -> Result<()> {
        if layer < self.layer_count() {
            Ok(())
        } else {
            Err(TinyAiError::OutOfRange { index: layer, count: self.layer_count() })
        }
    }

    /// `true` if `to` is reachable from `from` along dependency edges.
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.layer_count()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !std::mem::replace(&mut seen[node], true) {
                stack.extend(self.dependencies(node).iter().copied());
            }
        }
        false
    }

    /// Validate `dependent -> dependency` without inserting it.
    pub fn check_edge(&self, dependent: usize, dependency: usize) -> Result<()> {
        self.check(dependent)?;
        self.check(dependency)?;
        if dependent == dependency {
            return Err(TinyAiError::SelfDependency(dependent));
        }
        if self.deps[dependent].contains(&dependency) {
            return Err(TinyAiError::DuplicateDependency { dependent, dependency });
        }
        if self.reaches(dependency, dependent) {
            return Err(TinyAiError::Cycle { dependent, dependency });
        }
        Ok(())
    }

    pub fn add(&mut self, dependent: usize, dependency: usize) -> Result<()> {
        self.check_edge(dependent, dependency)?;
        self.deps[dependent].push(dependency);
        self.dependents[dependency].push(dependent);
        Ok(())
    }

    /// Every layer reachable from `root` through dependencies, `root` excluded.
    pub fn closure(&self, root: usize) -> Vec<usize> {
        let mut seen = vec![false; self.layer_count()];
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.dependencies(root).to_vec();
        while let Some(node) = stack.pop() {
            if !std::mem::replace(&mut seen[node], true) {
                out.push(node);
                stack.extend(self.dependencies(node).iter().copied());
            }
        }
        out
    }

    /// Dependencies-first order of `root` and everything it needs, skipping
    /// layers for which `ready` holds. `root` is always last.
    pub fn load_order(&self, root: usize, ready: impl Fn(usize) -> bool) -> Vec<usize> {
        let mut visited = vec![false; self.layer_count()];
        let mut order = Vec::new();
        // (node, next child position)
        let mut stack = vec![(root, 0usize)];
        visited[root] = true;
        while let Some(top) = stack.last_mut() {
            let (node, child) = *top;
            if let Some(&next) = self.dependencies(node).get(child) {
                top.1 += 1;
                if !visited[next] && !ready(next) {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }
        order
    }

    pub fn clear(&mut self) {
        self.deps.iter_mut().for_each(Vec::clear);
        self.dependents.iter_mut().for_each(Vec::clear);
    }
}
