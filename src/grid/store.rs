//! The set of cells for one grid generation, and the swappable `Grid` holder.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use super::cell::{Cell, CellId, CellSnapshot, CellStatus};
use super::layout::GridLayout;

/// Counts of cells per status plus lifetime triggers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GridStats {
    pub generation: u64,
    pub total: usize,
    pub idle: usize,
    pub triggered: usize,
    pub cooldown: usize,
    pub disabled: usize,
    pub total_triggers: u64,
}

/// Fixed collection of cells built from one layout.
#[derive(Debug)]
pub struct CellStore {
    generation: u64,
    cells: Vec<Arc<Cell>>,
    index: HashMap<CellId, usize>,
}

impl CellStore {
    pub fn build(layout: &GridLayout, generation: u64) -> Result<Self> {
        let cells: Vec<Arc<Cell>> = layout.build_cells()?.into_iter().map(Arc::new).collect();
        let index = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| (cell.id(), i))
            .collect();

        Ok(Self {
            generation,
            cells,
            index,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: CellId) -> Option<&Arc<Cell>> {
        self.index.get(&id).map(|&i| &self.cells[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Cell>> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn set_enabled(&self, id: CellId, enabled: bool) -> bool {
        match self.get(id) {
            Some(cell) => {
                cell.set_enabled(enabled);
                log::info!("{}: {}", id, if enabled { "enabled" } else { "disabled" });
                true
            }
            None => false,
        }
    }

    pub fn reset(&self, id: CellId) -> bool {
        match self.get(id) {
            Some(cell) => {
                cell.set_idle();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for cell in &self.cells {
            cell.set_idle();
        }
        log::info!("Reset all {} cells", self.cells.len());
    }

    /// Applies lazy cooldown expiry to every cell. Returns how many became idle.
    pub fn expire_cooldowns(&self, now: Instant) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.expire_cooldown_at(now))
            .count()
    }

    pub fn statistics(&self) -> GridStats {
        let now = Instant::now();
        let mut stats = GridStats {
            generation: self.generation,
            total: self.cells.len(),
            ..GridStats::default()
        };
        for cell in &self.cells {
            match cell.status_at(now) {
                CellStatus::Idle => stats.idle += 1,
                CellStatus::Triggered => stats.triggered += 1,
                CellStatus::Cooldown => stats.cooldown += 1,
                CellStatus::Disabled => stats.disabled += 1,
            }
            stats.total_triggers += cell.trigger_count();
        }
        stats
    }

    pub fn snapshot(&self) -> Vec<CellSnapshot> {
        self.cells.iter().map(|c| c.snapshot()).collect()
    }
}

/// Owner of the current [`CellStore`]. Rebuilding swaps in a new generation.
#[derive(Debug)]
pub struct Grid {
    current: RwLock<Arc<CellStore>>,
}

impl Grid {
    pub fn new(layout: &GridLayout) -> Result<Self> {
        let store = CellStore::build(layout, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(store)),
        })
    }

    pub fn current(&self) -> Arc<CellStore> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn generation(&self) -> u64 {
        self.current().generation()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Replaces every cell. Work dispatched under the old generation becomes stale.
    pub fn rebuild(&self, layout: &GridLayout) -> Result<u64> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let generation = guard.generation() + 1;
        let store = CellStore::build(layout, generation)?;
        log::info!(
            "Grid rebuilt: generation {}, {} cells ({}x{} on {} monitor(s))",
            generation,
            store.len(),
            layout.rows,
            layout.cols,
            layout.monitors.len()
        );
        *guard = Arc::new(store);
        Ok(generation)
    }
}
