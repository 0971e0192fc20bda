use super::{TileDataSet, TileStore};
use std::sync::Arc;

/// Read-only union of other tile stores
///
/// Dataset ids resolve against the member stores in order; the first store that
/// knows an id wins. Members are owned by whoever built them, so `init` and
/// `destroy` leave them alone.
pub struct MergingTileStore {
    stores: Vec<Arc<dyn TileStore>>,
}

impl MergingTileStore {
    pub fn new(stores: Vec<Arc<dyn TileStore>>) -> Self {
        Self { stores }
    }
}

impl TileStore for MergingTileStore {
    fn tile_data_set_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for store in &self.stores {
            for id in store.tile_data_set_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn tile_data_set(&self, id: &str) -> Option<Arc<dyn TileDataSet>> {
        self.stores.iter().find_map(|s| s.tile_data_set(id))
    }
}
