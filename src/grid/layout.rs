//! Grid geometry: splitting monitors into cells.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::cell::{Cell, CellId, Rect};

/// Position and size of one monitor in virtual-screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for MonitorGeometry {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Grid layout parameters (`grid` section of config.json).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    #[serde(default = "default_rows")]
    pub rows: u32,

    #[serde(default = "default_cols")]
    pub cols: u32,

    /// Height of the strip at the bottom of each cell that is captured.
    /// 0 captures the whole cell.
    #[serde(default = "default_capture_height")]
    pub capture_height: u32,

    #[serde(default)]
    pub capture_inset_x: u32,

    #[serde(default = "default_monitors")]
    pub monitors: Vec<MonitorGeometry>,

    /// Cells excluded from scanning whenever this layout is applied.
    #[serde(default)]
    pub disabled_cells: Vec<CellId>,
}

fn default_rows() -> u32 {
    3
}

fn default_cols() -> u32 {
    5
}

fn default_capture_height() -> u32 {
    80
}

fn default_monitors() -> Vec<MonitorGeometry> {
    vec![MonitorGeometry::default()]
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            capture_height: default_capture_height(),
            capture_inset_x: 0,
            monitors: default_monitors(),
            disabled_cells: Vec::new(),
        }
    }
}

impl GridLayout {
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            bail!("grid must have at least one row and one column ({}x{})", self.rows, self.cols);
        }
        if self.monitors.is_empty() {
            bail!("grid needs at least one monitor");
        }
        for (index, monitor) in self.monitors.iter().enumerate() {
            if Rect::new(monitor.x, monitor.y, monitor.width, monitor.height).is_empty() {
                bail!("monitor {} has no area", index);
            }
            if monitor.width < self.cols || monitor.height < self.rows {
                bail!(
                    "monitor {} ({}x{}) is too small for a {}x{} grid",
                    index,
                    monitor.width,
                    monitor.height,
                    self.rows,
                    self.cols
                );
            }
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.monitors.len() * self.rows as usize * self.cols as usize
    }

    /// Builds every cell, monitor by monitor, row-major.
    pub fn build_cells(&self) -> Result<Vec<Cell>> {
        self.validate()?;

        let mut cells = Vec::with_capacity(self.cell_count());
        for (monitor_index, monitor) in self.monitors.iter().enumerate() {
            let cell_width = monitor.width / self.cols;
            let cell_height = monitor.height / self.rows;

            for row in 0..self.rows {
                for col in 0..self.cols {
                    let bounds = Rect::new(
                        monitor.x + (col * cell_width) as i32,
                        monitor.y + (row * cell_height) as i32,
                        cell_width,
                        cell_height,
                    );
                    let id = CellId::new(monitor_index as u32, row, col);
                    cells.push(Cell::new(id, bounds, self.capture_area(bounds)));
                }
            }
        }
        Ok(cells)
    }

    /// Bottom strip of `bounds`, inset horizontally and clamped inside the cell.
    pub fn capture_area(&self, bounds: Rect) -> Rect {
        let height = match self.capture_height {
            0 => bounds.height,
            h => h.min(bounds.height),
        };
        let inset = self.capture_inset_x.min(bounds.width.saturating_sub(1) / 2);
        let width = bounds.width - inset * 2;

        Rect::new(
            bounds.x + inset as i32,
            bounds.bottom() - height as i32,
            width,
            height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_builds_fifteen_cells() {
        let layout = GridLayout::default();
        let cells = layout.build_cells().unwrap();
        assert_eq!(cells.len(), 15);

        let first = &cells[0];
        assert_eq!(first.id(), CellId::new(0, 0, 0));
        assert_eq!(first.bounds(), Rect::new(0, 0, 384, 360));
        assert_eq!(first.capture_area(), Rect::new(0, 280, 384, 80));

        let last = &cells[14];
        assert_eq!(last.id(), CellId::new(0, 2, 4));
        assert_eq!(last.bounds(), Rect::new(1536, 720, 384, 360));
    }

    #[test]
    fn test_second_monitor_offsets() {
        let layout = GridLayout {
            rows: 2,
            cols: 2,
            monitors: vec![
                MonitorGeometry::default(),
                MonitorGeometry {
                    x: 1920,
                    y: -200,
                    width: 1280,
                    height: 1024,
                },
            ],
            ..GridLayout::default()
        };
        let cells = layout.build_cells().unwrap();
        assert_eq!(cells.len(), 8);

        let cell = cells
            .iter()
            .find(|c| c.id() == CellId::new(1, 1, 1))
            .unwrap();
        assert_eq!(cell.bounds(), Rect::new(2560, 312, 640, 512));
    }

    #[test]
    fn test_capture_area_is_clamped() {
        let layout = GridLayout {
            capture_height: 500,
            capture_inset_x: 1000,
            ..GridLayout::default()
        };
        let bounds = Rect::new(100, 100, 40, 30);
        let area = layout.capture_area(bounds);
        assert_eq!(area.height, 30);
        assert!(area.width >= 1);
        assert!(area.x >= bounds.x && area.right() <= bounds.right());
        assert!(area.y >= bounds.y && area.bottom() <= bounds.bottom());
    }

    #[test]
    fn test_zero_capture_height_takes_whole_cell() {
        let layout = GridLayout {
            capture_height: 0,
            ..GridLayout::default()
        };
        let bounds = Rect::new(0, 0, 384, 360);
        assert_eq!(layout.capture_area(bounds), bounds);
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        let no_rows = GridLayout {
            rows: 0,
            ..GridLayout::default()
        };
        assert!(no_rows.build_cells().is_err());

        let no_monitors = GridLayout {
            monitors: Vec::new(),
            ..GridLayout::default()
        };
        assert!(no_monitors.validate().is_err());

        let tiny = GridLayout {
            monitors: vec![MonitorGeometry {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
            }],
            ..GridLayout::default()
        };
        assert!(tiny.validate().is_err());

        let flat = GridLayout {
            monitors: vec![MonitorGeometry {
                height: 0,
                ..MonitorGeometry::default()
            }],
            ..GridLayout::default()
        };
        let err = flat.validate().unwrap_err();
        assert!(err.to_string().contains("no area"));
    }
}
