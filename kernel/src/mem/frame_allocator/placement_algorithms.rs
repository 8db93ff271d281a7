//! Frame placement policies.

use super::CoreMapEntry;
use core::ops::Range;

/// A placement algorithm for allocating frames.
pub trait PlacementAlgorithm: Default {
    /// Returns the frame numbers to allocate, or [`None`] if no large enough
    /// run of free frames exists.
    fn place(&mut self, core_map: &[CoreMapEntry], frames_requested: usize)
        -> Option<Range<usize>>;
}

/// Resumes each search where the previous allocation ended, so freshly
/// freed frames near the start are not handed straight back out.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

impl PlacementAlgorithm for NextFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Option<Range<usize>> {
        let total_frames = core_map.len();
        let mut start = self.position;
        let mut wrapped_around = false;

        while !(wrapped_around && start >= self.position) {
            if start + frames_requested > total_frames {
                // A second wrap means the request can never fit.
                if wrapped_around {
                    break;
                }
                start = 0;
                wrapped_around = true;
                continue;
            }

            let free_run = core_map[start..start + frames_requested]
                .iter()
                .take_while(|entry| !entry.allocated())
                .count();

            if free_run == frames_requested {
                self.position = (start + free_run) % total_frames;
                return Some(start..start + free_run);
            }
            start += free_run + 1;
        }

        None
    }
}
