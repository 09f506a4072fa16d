//! Peak finding by persistent homology.
//!
//! A density threshold is lowered from 100% to 1% of the grid maximum. At
//! each level the cells in the current density band either join the nearest
//! existing peak or seed a new one; touching peaks are then merged unless both
//! have proven significant. A peak that reaches `min_peak_size` area while
//! surviving more than `min_peak_height` levels without merging becomes a
//! true peak. Only true peaks survive the run.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use ordered_float::OrderedFloat;

use crate::{
    density::DensityGrid,
    error::{GatingError, Result},
    geometry::R2,
    options::GatingOptions,
    peak::{Peak, PeakId},
    verdict::{Criterion, PeakVerdict},
};

/// More true peaks than this means noisy or mis-scaled input.
pub const MAX_TRUE_PEAKS: usize = 5;

/// Each band spans this many percentage points of the max density.
pub const BAND_WIDTH: u32 = 2;

pub struct PeakFinder<'a> {
    grid: &'a DensityGrid,
    options: &'a GatingOptions,
    peaks: Vec<Peak>,
    next_id: u32,
}

impl<'a> PeakFinder<'a> {
    pub fn new(grid: &'a DensityGrid, options: &'a GatingOptions) -> Result<Self> {
        if grid.is_empty() {
            return Err(GatingError::EmptyDensity {
                width: grid.width,
                height: grid.height,
                max_density: grid.max_density,
            });
        }
        Ok(PeakFinder { grid, options, peaks: Vec::new(), next_id: 0 })
    }

    fn next_id(&mut self) -> PeakId {
        let id = PeakId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    /// Create a protected peak around each known nucleus.
    pub fn seed(&mut self, nuclei: &[R2<f64>]) {
        let radius = self.options.known_peak_radius();
        for nucleus in nuclei {
            let cells: BTreeSet<R2<usize>> = self
                .grid
                .cells()
                .filter(|(cell, v)| *v > 0. && cell.center().distance(nucleus) <= radius)
                .map(|(cell, _)| cell)
                .collect();
            let id = self.next_id();
            debug!("seeding protected peak {} at {} with {} cells", id, nucleus, cells.len());
            self.peaks.push(Peak::seeded(id, *nucleus, radius, cells));
        }
    }

    /// One threshold level: grow peaks with the cells in the band
    /// `[height%, (height + 2)%)` of the max density, then merge and promote.
    pub fn step(&mut self, height: u32) {
        self.grow(height);
        self.merge();
        self.promote();
    }

    fn grow(&mut self, height: u32) {
        let max = self.grid.max_density;
        let lo = max * (height as f64 / 100.);
        let hi = max * ((height + BAND_WIDTH) as f64 / 100.);
        let edge_distance = self.options.edge_distance();

        // Cells attached during this band count towards their peak's reach
        // before its hull is recomputed, so a plateau grows as one peak.
        let mut pending: Vec<Vec<R2<usize>>> = vec![Vec::new(); self.peaks.len()];
        let grid = self.grid;
        for (cell, v) in grid.cells() {
            if v < lo || v >= hi || v <= 0. {
                continue;
            }
            let p = cell.center();
            if self.peaks.iter().any(|peak| peak.latest().contains(&p)) {
                continue;
            }
            let closest = self
                .peaks
                .iter()
                .zip(&pending)
                .enumerate()
                .map(|(idx, (peak, cells))| {
                    let to_cells = cells.iter().map(|c| c.center().distance(&p)).fold(f64::INFINITY, f64::min);
                    (idx, peak.latest().boundary_distance(&p).min(to_cells))
                })
                .min_by_key(|(_, d)| OrderedFloat(*d));
            match closest {
                Some((idx, d)) if d < edge_distance => pending[idx].push(cell),
                _ => {
                    let id = self.next_id();
                    self.peaks.push(Peak::from_cell(id, cell));
                    pending.push(Vec::new());
                }
            }
        }

        for (peak, cells) in self.peaks.iter_mut().zip(pending) {
            if !cells.is_empty() {
                peak.grow(&cells);
            }
        }
    }

    /// Small, unprotected peaks that have stood alone for more than
    /// `min_peak_height` levels give way to the neighbour they touch.
    fn absorbable(&self, peak: &Peak) -> bool {
        !peak.protected
            && peak.area() < self.options.min_peak_size()
            && peak.height as f64 > self.options.min_peak_height()
    }

    /// Merge touching peaks, building the next peak list from a snapshot of
    /// the current one. Only the smaller peak of a pair is ever absorbed; a
    /// pair where it does not qualify is left as is.
    fn merge(&mut self) {
        let edge_distance = self.options.edge_distance();
        let snapshot = std::mem::take(&mut self.peaks);
        let n = snapshot.len();
        let mut absorbed_into: Vec<Option<usize>> = vec![None; n];
        let mut absorbs: Vec<Vec<usize>> = vec![Vec::new(); n];

        for i in 0..n {
            for j in (i + 1)..n {
                if absorbed_into[i].is_some() || absorbed_into[j].is_some() {
                    continue;
                }
                let (a, b) = (&snapshot[i], &snapshot[j]);
                if a.latest().distance_to_polygon(b.latest()) >= edge_distance {
                    continue;
                }
                let (small, large) = if a.area() <= b.area() { (i, j) } else { (j, i) };
                if !self.absorbable(&snapshot[small]) || !absorbs[small].is_empty() {
                    continue;
                }
                debug!("peak {} absorbed into {}", snapshot[small].id, snapshot[large].id);
                absorbed_into[small] = Some(large);
                absorbs[large].push(small);
            }
        }

        let mut slots: Vec<Option<Peak>> = snapshot.into_iter().map(Some).collect();
        let mut next = Vec::with_capacity(n);
        for i in 0..n {
            if absorbed_into[i].is_some() {
                continue;
            }
            let Some(mut peak) = slots[i].take() else { continue };
            if absorbs[i].is_empty() {
                peak.height += 1;
            } else {
                for &victim in &absorbs[i] {
                    if let Some(other) = slots[victim].take() {
                        peak.absorb(other);
                    }
                }
            }
            next.push(peak);
        }
        self.peaks = next;
    }

    fn promote(&mut self) {
        let min_size = self.options.min_peak_size();
        let min_height = self.options.min_peak_height();
        for peak in &mut self.peaks {
            if !peak.true_peak && peak.area() >= min_size && peak.height as f64 > min_height {
                debug!("peak {} promoted: area {:.1}, height {}", peak.id, peak.area(), peak.height);
                peak.promote();
            }
        }
    }

    /// Run every level from 100% down to 1% and keep the true peaks.
    pub fn run(mut self) -> PeakVerdict {
        for height in (1..=100).rev() {
            self.step(height);
        }
        self.finish()
    }

    fn finish(self) -> PeakVerdict {
        let default_offset = self.options.default_boundary_offset() as i64;
        let total = self.peaks.len();
        let mut peaks: Vec<Peak> = self.peaks.into_iter().filter(|p| p.true_peak).collect();
        for peak in &mut peaks {
            peak.set_boundary_offset(default_offset);
        }
        info!("find_peaks: {} true peaks out of {} candidates", peaks.len(), total);

        if peaks.len() > MAX_TRUE_PEAKS {
            warn!("find_peaks: {} true peaks exceeds the maximum of {}", peaks.len(), MAX_TRUE_PEAKS);
            let criterion = Criterion::fail(
                format!("Found {} populations, more than the {} automated gating supports", peaks.len(), MAX_TRUE_PEAKS),
                "The data may be noisy or badly scaled; check the axis scales or gate this plot manually",
            );
            return PeakVerdict::Fail { peaks, criteria: vec![criterion] };
        }
        PeakVerdict::Success { peaks }
    }
}

/// Find the statistically significant peaks of `grid`, seeding protected
/// peaks at `known_nuclei` (pixel coordinates).
pub fn find_peaks(grid: &DensityGrid, options: &GatingOptions, known_nuclei: &[R2<f64>]) -> Result<PeakVerdict> {
    let mut finder = PeakFinder::new(grid, options)?;
    finder.seed(known_nuclei);
    Ok(finder.run())
}
