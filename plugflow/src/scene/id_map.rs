use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::ScenePath;

#[derive(Default)]
struct IdMapState {
    ids: HashMap<ScenePath, u32>,
    paths: HashMap<u32, ScenePath>,
}

/// Stable integer ids for scene locations, handed to renderer objects so
/// that picking results can be mapped back to paths. Id 0 means "none".
#[derive(Default)]
pub struct IdMap {
    state: RwLock<IdMapState>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for_path(&self, path: &[String], create_if_necessary: bool) -> u32 {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(id) = state.ids.get(path) {
                return *id;
            }
        }
        if !create_if_necessary {
            return 0;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.ids.get(path) {
            return *id;
        }
        let id = state.ids.len() as u32 + 1;
        state.ids.insert(path.to_vec(), id);
        state.paths.insert(id, path.to_vec());
        id
    }

    pub fn path_for_id(&self, id: u32) -> Option<ScenePath> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .paths
            .get(&id)
            .cloned()
    }
}
