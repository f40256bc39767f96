//! The per-session checklist of target points (spec §4.5 step 2/6/7):
//! everything selected as due at session start, moving one at a time from
//! unchecked to checked as the evaluator credits a demonstration.

use recall_core::{RecallPoint, RecallPointId};
use recall_evaluator::ChecklistEntry;

#[derive(Debug, Clone, Default)]
pub struct Checklist {
    unchecked: Vec<RecallPoint>,
    checked: Vec<RecallPoint>,
}

impl Checklist {
    pub fn new(points: Vec<RecallPoint>) -> Self {
        Self { unchecked: points, checked: Vec::new() }
    }

    pub fn total(&self) -> usize {
        self.unchecked.len() + self.checked.len()
    }

    pub fn recalled_count(&self) -> usize {
        self.checked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unchecked.is_empty()
    }

    pub fn entries(&self) -> Vec<ChecklistEntry> {
        self.unchecked
            .iter()
            .map(|p| ChecklistEntry { id: p.id.clone(), content: p.content.clone(), context: p.context.clone() })
            .collect()
    }

    pub fn find_unchecked(&self, id: &RecallPointId) -> Option<&RecallPoint> {
        self.unchecked.iter().find(|p| &p.id == id)
    }

    /// Move a point from unchecked to checked. Returns `None` if it was
    /// already checked or never a target — callers treat that as a
    /// hallucinated point id and skip it.
    pub fn mark_recalled(&mut self, id: &RecallPointId) -> Option<RecallPoint> {
        let idx = self.unchecked.iter().position(|p| &p.id == id)?;
        let point = self.unchecked.remove(idx);
        self.checked.push(point.clone());
        Some(point)
    }

    /// Replace an unchecked point's stored state with its post-FSRS-update
    /// copy before `mark_recalled` moves it to `checked`, so the checked
    /// copy doesn't carry a stale `fsrs_state`.
    pub fn replace_unchecked(&mut self, point: RecallPoint) {
        if let Some(slot) = self.unchecked.iter_mut().find(|p| p.id == point.id) {
            *slot = point;
        }
    }

    /// Resume a session: points already credited in a prior run of this
    /// process move straight to `checked` without re-demonstration.
    pub fn restore_checked(&mut self, recalled_point_ids: &[RecallPointId]) {
        for id in recalled_point_ids {
            self.mark_recalled(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recall_core::{RecallSetId};
    use recall_fsrs::{create_initial_state, FsrsParameters};

    fn point(id: &str) -> RecallPoint {
        let fsrs = create_initial_state(Utc::now(), &FsrsParameters::default());
        RecallPoint::new(
            id.into(),
            RecallSetId::from("rs_1"),
            "ATP stores energy in phosphoanhydride bonds.".to_string(),
            "Explains cellular energy currency.".to_string(),
            fsrs,
        )
        .unwrap()
    }

    #[test]
    fn marking_recalled_moves_point_and_updates_counts() {
        let mut list = Checklist::new(vec![point("rp_1"), point("rp_2")]);
        assert_eq!(list.total(), 2);
        let moved = list.mark_recalled(&RecallPointId::from("rp_1")).unwrap();
        assert_eq!(moved.id, RecallPointId::from("rp_1"));
        assert_eq!(list.recalled_count(), 1);
        assert!(!list.is_empty());
    }

    #[test]
    fn marking_unknown_point_is_a_noop() {
        let mut list = Checklist::new(vec![point("rp_1")]);
        assert!(list.mark_recalled(&RecallPointId::from("rp_999")).is_none());
        assert_eq!(list.total(), 1);
    }

    #[test]
    fn restore_checked_moves_every_given_id() {
        let mut list = Checklist::new(vec![point("rp_1"), point("rp_2"), point("rp_3")]);
        list.restore_checked(&[RecallPointId::from("rp_1"), RecallPointId::from("rp_3")]);
        assert_eq!(list.recalled_count(), 2);
        assert_eq!(list.entries().len(), 1);
    }
}
