//! Cell store: monitored screen regions and their trigger state.
//!
//! The screen is divided into `rows x cols` cells per monitor. Each cell runs
//! its own `Idle → Triggered → Cooldown → Idle` state machine; the [`Grid`]
//! holds the current generation of cells and can be rebuilt from a new layout.

mod cell;
mod layout;
mod store;

pub use cell::{Cell, CellId, CellSnapshot, CellStatus, Rect};
pub use layout::GridLayout;
pub use store::{Grid, GridStats};
