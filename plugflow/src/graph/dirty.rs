//! Batching and ordering of dirty notifications.
//!
//! Every plug dirtied within a scope becomes a vertex, with edges leading
//! from the plug that caused the dirtiness to the plug it dirtied. When the
//! outermost scope closes, plugs are signalled in topological order so that
//! no plug is signalled before the plugs upstream of it.

use std::collections::HashMap;

use log::error;

use super::plug::PlugId;

#[derive(Default)]
pub(crate) struct DirtyPlugs {
    depth: usize,
    vertices: Vec<PlugId>,
    index: HashMap<PlugId, usize>,
    edges: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

impl DirtyPlugs {
    pub(crate) fn begin(&mut self) {
        self.depth += 1;
    }

    /// Closes a scope. Returns true when it was the outermost one, at which
    /// point the accumulated plugs should be flushed.
    pub(crate) fn end(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    /// Adds `plug`, returning false if it was already dirtied in this scope.
    pub(crate) fn insert(&mut self, plug: PlugId) -> bool {
        if self.index.contains_key(&plug) {
            return false;
        }
        self.index.insert(plug, self.vertices.len());
        self.vertices.push(plug);
        self.edges.push(Vec::new());
        true
    }

    /// Records that `upstream` must be signalled before `downstream`. Both
    /// must already have been inserted.
    pub(crate) fn add_edge(&mut self, upstream: PlugId, downstream: PlugId) {
        if let (Some(&u), Some(&d)) = (self.index.get(&upstream), self.index.get(&downstream)) {
            if !self.edges[u].contains(&d) {
                self.edges[u].push(d);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Drains the accumulated plugs in emission order. Cycles are reported
    /// and broken arbitrarily; every plug is still emitted exactly once.
    pub(crate) fn take_ordered(&mut self, describe: impl Fn(PlugId) -> String) -> Vec<PlugId> {
        let count = self.vertices.len();
        let mut state = vec![Visit::Unvisited; count];
        let mut finished = Vec::with_capacity(count);
        let mut cycle_reported = false;

        for start in 0..count {
            if state[start] != Visit::Unvisited {
                continue;
            }
            // Iterative depth first search recording finish order.
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            state[start] = Visit::InProgress;
            while let Some((vertex, next_edge)) = stack.pop() {
                if let Some(&target) = self.edges[vertex].get(next_edge) {
                    stack.push((vertex, next_edge + 1));
                    match state[target] {
                        Visit::Unvisited => {
                            state[target] = Visit::InProgress;
                            stack.push((target, 0));
                        }
                        Visit::InProgress if !cycle_reported => {
                            error!(
                                "Plug dirty propagation : Cycle detected between \"{}\" and \"{}\"",
                                describe(self.vertices[vertex]),
                                describe(self.vertices[target])
                            );
                            cycle_reported = true;
                        }
                        _ => {}
                    }
                } else {
                    state[vertex] = Visit::Done;
                    finished.push(vertex);
                }
            }
        }

        let ordered = finished.into_iter().rev().map(|v| self.vertices[v]).collect();
        self.vertices.clear();
        self.index.clear();
        self.edges.clear();
        ordered
    }
}
