//! Exception region splitting.
//!
//! A suspension is a hard exit from the step procedure followed, later, by a
//! fresh entry at the resume label. A protected region must not contain that
//! exit/re-entry edge, so every region that is active at a suspend point is
//! cut in two around it:
//!
//! ```text
//! original:   [start ........................................ end) -> H
//!
//! split:      [start .. suspend)  spill/suspend/return  [resume .. end) -> H
//!                     -> H                                      -> H
//! ```
//!
//! The spill code between the suspend label and the return is covered by no
//! region; the restore code after the resume label is covered again, so a
//! rethrown resume error reaches the original handler with restored locals.
//!
//! Each original region moves `Pending -> Active -> Closed` as the code
//! generator walks the body and reports labels and suspend points. Pieces of
//! one region keep its handler and catch type and are emitted grouped by the
//! original region's index, preserving handler priority.

use crate::bytecode::{ExceptionRegion, Label};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use spindle_core::{SpindleError, SpindleResult};
use std::sync::Arc;

/// Lifecycle of one original region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionState {
    /// Start label not reached yet.
    Pending,
    /// Inside the region; the current piece began at this (output) label.
    Active(Label),
    /// End label reached.
    Closed,
}

#[derive(Debug)]
struct TrackedRegion {
    original: ExceptionRegion,
    state: RegionState,
    pieces: SmallVec<[(Label, Label); 2]>,
}

/// Splits regions around suspend points while code is generated.
#[derive(Debug)]
pub struct RegionSplitter {
    procedure: Arc<str>,
    regions: Vec<TrackedRegion>,
    /// Original label -> regions starting there.
    starts: FxHashMap<Label, SmallVec<[usize; 2]>>,
    /// Original label -> regions ending there.
    ends: FxHashMap<Label, SmallVec<[usize; 2]>>,
}

impl RegionSplitter {
    /// Track the regions of an original procedure.
    pub fn new(procedure: Arc<str>, regions: &[ExceptionRegion]) -> Self {
        let mut starts: FxHashMap<Label, SmallVec<[usize; 2]>> = FxHashMap::default();
        let mut ends: FxHashMap<Label, SmallVec<[usize; 2]>> = FxHashMap::default();
        for (index, region) in regions.iter().enumerate() {
            starts.entry(region.start).or_default().push(index);
            ends.entry(region.end).or_default().push(index);
        }
        Self {
            procedure,
            regions: regions
                .iter()
                .map(|region| TrackedRegion {
                    original: region.clone(),
                    state: RegionState::Pending,
                    pieces: SmallVec::new(),
                })
                .collect(),
            starts,
            ends,
        }
    }

    /// The original label `original` was emitted as `emitted`.
    pub fn on_label(&mut self, original: Label, emitted: Label) -> SpindleResult<()> {
        if let Some(indices) = self.starts.get(&original) {
            for &index in indices {
                let region = &mut self.regions[index];
                if region.state != RegionState::Pending {
                    return Err(SpindleError::region(
                        &self.procedure,
                        index,
                        "start label reached twice",
                    ));
                }
                region.state = RegionState::Active(emitted);
            }
        }
        if let Some(indices) = self.ends.get(&original) {
            for &index in indices {
                let region = &mut self.regions[index];
                match region.state {
                    RegionState::Active(from) => {
                        region.pieces.push((from, emitted));
                        region.state = RegionState::Closed;
                    }
                    RegionState::Pending => {
                        return Err(SpindleError::region(
                            &self.procedure,
                            index,
                            "end label reached before start label",
                        ));
                    }
                    RegionState::Closed => {
                        return Err(SpindleError::region(
                            &self.procedure,
                            index,
                            "end label reached twice",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// A suspend point spans `[suspend, resume)` in the output.
    pub fn on_suspend(&mut self, suspend: Label, resume: Label) {
        for region in &mut self.regions {
            if let RegionState::Active(from) = region.state {
                region.pieces.push((from, suspend));
                region.state = RegionState::Active(resume);
            }
        }
    }

    /// Number of regions currently active.
    pub fn active(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| matches!(r.state, RegionState::Active(_)))
            .count()
    }

    /// Produce the split exception table, remapping handlers with `map`.
    pub fn finish(self, mut map: impl FnMut(Label) -> Label) -> SpindleResult<Vec<ExceptionRegion>> {
        let mut out = Vec::new();
        for (index, region) in self.regions.into_iter().enumerate() {
            if region.state != RegionState::Closed {
                return Err(SpindleError::region(
                    &self.procedure,
                    index,
                    "region never closed",
                ));
            }
            let handler = map(region.original.handler);
            for (start, end) in region.pieces {
                out.push(ExceptionRegion {
                    start,
                    end,
                    handler,
                    catch_type: region.original.catch_type.clone(),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: u32, end: u32, handler: u32) -> ExceptionRegion {
        ExceptionRegion {
            start: Label(start),
            end: Label(end),
            handler: Label(handler),
            catch_type: Some(Arc::from("Exception")),
        }
    }

    fn splitter(regions: &[ExceptionRegion]) -> RegionSplitter {
        RegionSplitter::new(Arc::from("T.p"), regions)
    }

    #[test]
    fn test_single_suspend_yields_two_pieces() {
        let mut s = splitter(&[region(0, 1, 2)]);
        s.on_label(Label(0), Label(10)).unwrap();
        s.on_suspend(Label(20), Label(21));
        s.on_label(Label(1), Label(11)).unwrap();
        let out = s.finish(|l| Label(l.0 + 10)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start, out[0].end), (Label(10), Label(20)));
        assert_eq!((out[1].start, out[1].end), (Label(21), Label(11)));
        assert!(out.iter().all(|r| r.handler == Label(12)));
    }

    #[test]
    fn test_two_suspends_yield_three_pieces() {
        let mut s = splitter(&[region(0, 1, 2)]);
        s.on_label(Label(0), Label(0)).unwrap();
        s.on_suspend(Label(5), Label(6));
        s.on_suspend(Label(7), Label(8));
        s.on_label(Label(1), Label(1)).unwrap();
        let out = s.finish(|l| l).unwrap();
        let spans: Vec<_> = out.iter().map(|r| (r.start.0, r.end.0)).collect();
        assert_eq!(spans, vec![(0, 5), (6, 7), (8, 1)]);
    }

    #[test]
    fn test_suspend_outside_region_is_ignored() {
        let mut s = splitter(&[region(0, 1, 2)]);
        s.on_suspend(Label(5), Label(6));
        s.on_label(Label(0), Label(0)).unwrap();
        s.on_label(Label(1), Label(1)).unwrap();
        s.on_suspend(Label(7), Label(8));
        assert_eq!(s.finish(|l| l).unwrap().len(), 1);
    }

    #[test]
    fn test_nested_regions_keep_priority_order() {
        // inner [1, 2) has priority over outer [0, 3)
        let mut s = splitter(&[region(1, 2, 9), region(0, 3, 8)]);
        s.on_label(Label(0), Label(0)).unwrap();
        s.on_label(Label(1), Label(1)).unwrap();
        assert_eq!(s.active(), 2);
        s.on_suspend(Label(5), Label(6));
        s.on_label(Label(2), Label(2)).unwrap();
        s.on_label(Label(3), Label(3)).unwrap();
        let out = s.finish(|l| l).unwrap();
        let handlers: Vec<_> = out.iter().map(|r| r.handler.0).collect();
        assert_eq!(handlers, vec![9, 9, 8, 8]);
    }

    #[test]
    fn test_region_never_closed_is_an_error() {
        let mut s = splitter(&[region(0, 1, 2)]);
        s.on_label(Label(0), Label(0)).unwrap();
        assert!(matches!(
            s.finish(|l| l),
            Err(SpindleError::Region { region: 0, .. })
        ));
    }

    #[test]
    fn test_end_before_start_is_an_error() {
        let mut s = splitter(&[region(0, 1, 2)]);
        assert!(s.on_label(Label(1), Label(1)).is_err());
    }

    #[test]
    fn test_empty_region() {
        let mut s = splitter(&[region(0, 0, 2)]);
        s.on_label(Label(0), Label(4)).unwrap();
        let out = s.finish(|l| l).unwrap();
        assert_eq!((out[0].start, out[0].end), (Label(4), Label(4)));
    }
}
