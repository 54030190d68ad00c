//! Groups OCR fragments into plate candidates
//!
//! Text readers often split one plate into several fragments ("ABC", "123").
//! Fragments are visited left to right; each joins the first group whose last
//! fragment sits on roughly the same line and ends close enough before it.

use crate::domain::types::{BoundingBox, TextFragment};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingTolerance {
    /// Maximum vertical-centre distance between neighbouring fragments
    pub vertical_px: f32,
    /// Maximum gap from the previous fragment's right edge
    pub horizontal_gap_px: f32,
}

impl Default for GroupingTolerance {
    fn default() -> Self {
        Self { vertical_px: 50.0, horizontal_gap_px: 200.0 }
    }
}

/// Fragments believed to form one plate
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionCandidate {
    fragments: SmallVec<[TextFragment; 4]>,
}

impl DetectionCandidate {
    fn new(first: TextFragment) -> Self {
        let mut fragments = SmallVec::new();
        fragments.push(first);
        Self { fragments }
    }

    pub fn fragments(&self) -> &[TextFragment] {
        &self.fragments
    }

    /// Fragment texts concatenated in reading order
    pub fn text(&self) -> String {
        self.fragments.iter().map(|f| f.text.as_str()).collect()
    }

    /// Region covering all fragments
    pub fn bounds(&self) -> BoundingBox {
        let first = self.fragments[0].bounds;
        self.fragments.iter().skip(1).fold(first, |acc, f| acc.union(&f.bounds))
    }

    fn accepts(&self, fragment: &TextFragment, tolerance: &GroupingTolerance) -> bool {
        let Some(last) = self.fragments.last() else {
            return false;
        };
        let dy = (fragment.bounds.center_y() - last.bounds.center_y()).abs();
        let gap = fragment.bounds.x1 - last.bounds.x2;
        dy < tolerance.vertical_px && gap < tolerance.horizontal_gap_px
    }
}

/// Group fragments into candidates, ordered by each group's leftmost fragment
pub fn group_fragments(
    mut fragments: Vec<TextFragment>,
    tolerance: &GroupingTolerance,
) -> Vec<DetectionCandidate> {
    fragments.sort_by(|a, b| a.bounds.x1.total_cmp(&b.bounds.x1));

    let mut groups: Vec<DetectionCandidate> = Vec::new();
    for fragment in fragments {
        match groups.iter_mut().find(|g| g.accepts(&fragment, tolerance)) {
            Some(group) => group.fragments.push(fragment),
            None => groups.push(DetectionCandidate::new(fragment)),
        }
    }
    groups
}
