//! Target selection across strategy results.

use std::cmp::Ordering;

use pancam_models::Detection;

/// Pick one target from candidate groups given in strategy priority order.
///
/// Candidates scoring below `min_score` are dropped first. The first group
/// with anything left wins; inside it the highest score wins, ties go to
/// the larger box, and full ties keep the earliest candidate.
pub fn select_target<'a, G>(groups: G, min_score: f64) -> Option<Detection>
where
    G: IntoIterator<Item = &'a [Detection]>,
{
    groups.into_iter().find_map(|group| best_in_group(group, min_score))
}

fn best_in_group(group: &[Detection], min_score: f64) -> Option<Detection> {
    let mut best: Option<&Detection> = None;
    for candidate in group.iter().filter(|d| d.score >= min_score) {
        best = match best {
            Some(current) if rank(candidate, current) != Ordering::Greater => Some(current),
            _ => Some(candidate),
        };
    }
    best.cloned()
}

fn rank(a: &Detection, b: &Detection) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.bbox_area().total_cmp(&b.bbox_area()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pancam_models::{Label, NormalizedRect};

    fn det(score: f64, side: f64, label: Label) -> Detection {
        Detection::new(
            (0.5, 0.5),
            NormalizedRect::new(0.1, 0.1, side, side),
            score,
            label,
        )
    }

    #[test]
    fn test_empty_input_has_no_target() {
        let groups: Vec<Vec<Detection>> = vec![vec![], vec![]];
        assert!(select_target(groups.iter().map(Vec::as_slice), 0.0).is_none());
    }

    #[test]
    fn test_first_non_empty_group_wins() {
        let faces = vec![det(0.6, 0.1, Label::Face)];
        let cats = vec![det(0.7, 0.5, Label::Cat)];
        let chosen = select_target([faces.as_slice(), cats.as_slice()], 0.5).unwrap();
        assert_eq!(chosen.label, Label::Face);
    }

    #[test]
    fn test_low_scores_fall_through_to_next_group() {
        let faces = vec![det(0.3, 0.2, Label::Face)];
        let cats = vec![det(0.7, 0.1, Label::Cat)];
        let chosen = select_target([faces.as_slice(), cats.as_slice()], 0.5).unwrap();
        assert_eq!(chosen.label, Label::Cat);
    }

    #[test]
    fn test_max_score_then_area() {
        let group = vec![
            det(0.8, 0.1, Label::Face),
            det(0.9, 0.1, Label::Face),
            det(0.9, 0.3, Label::Face),
            det(0.7, 0.6, Label::Face),
        ];
        let chosen = select_target([group.as_slice()], 0.0).unwrap();
        assert_eq!(chosen.score, 0.9);
        assert_eq!(chosen.bbox.width, 0.3);
    }

    #[test]
    fn test_full_tie_keeps_first() {
        let mut first = det(0.9, 0.2, Label::Face);
        first.center = (0.1, 0.1);
        let second = det(0.9, 0.2, Label::Face);
        let group = vec![first, second];
        let chosen = select_target([group.as_slice()], 0.0).unwrap();
        assert_eq!(chosen.center, (0.1, 0.1));
    }
}
