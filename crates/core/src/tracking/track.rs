use std::collections::VecDeque;

use crate::activity::classifier::Activity;
use crate::ppe::high_vis::Clothing;
use crate::shared::bbox::BBox;
use crate::shared::constants::MAX_HISTORY;

/// Displacements considered when recomputing velocity.
const VELOCITY_WINDOW: usize = 5;

/// Persistent per-object state maintained by the tracker.
///
/// Every field is declared explicitly, with `Option` marking the ones that
/// only exist after a later pipeline stage has run (class-name resolution,
/// activity classification, PPE inspection).
#[derive(Clone, Debug)]
pub struct Track {
    /// Monotonically increasing id assigned at creation, never reused.
    pub id: u64,
    /// Last known box: actual on a match, predicted while lost.
    pub bbox: BBox,
    pub class_id: usize,
    pub class_name: Option<String>,
    pub score: f64,
    /// Number of matched frames, >= 1.
    pub hits: u64,
    /// Consecutive unmatched frames, 0 while fresh.
    pub lost_frames: u32,
    /// Recent center points, oldest first, capped at [`MAX_HISTORY`].
    pub history: VecDeque<(f64, f64)>,
    /// Pixels per frame, recency-weighted over the last displacements.
    pub velocity: (f64, f64),
    pub activity: Option<Activity>,
    pub activity_conf: f64,
    /// The activity last written to the activity log for this track,
    /// not necessarily the current one.
    pub previous_activity: Option<Activity>,
    /// Absent for non-person tracks.
    pub clothing: Option<Clothing>,
    /// Wall-clock epoch seconds of the last match.
    pub last_seen: f64,
}

impl Track {
    pub fn new(id: u64, bbox: BBox, class_id: usize, score: f64, now: f64) -> Self {
        let mut history = VecDeque::with_capacity(MAX_HISTORY);
        history.push_back(bbox.center());
        Self {
            id,
            bbox,
            class_id,
            class_name: None,
            score,
            hits: 1,
            lost_frames: 0,
            history,
            velocity: (0.0, 0.0),
            activity: None,
            activity_conf: 0.0,
            previous_activity: None,
            clothing: None,
            last_seen: now,
        }
    }

    /// Box one frame ahead along the current velocity.
    pub fn predicted_bbox(&self) -> BBox {
        self.bbox.shifted(self.velocity.0, self.velocity.1)
    }

    /// Fold a matched detection into the track.
    pub fn apply_match(&mut self, bbox: BBox, class_id: usize, score: f64, now: f64) {
        self.bbox = bbox;
        self.class_id = class_id;
        self.score = score;
        self.last_seen = now;
        self.hits += 1;
        self.lost_frames = 0;
        self.push_center(bbox.center());
        self.update_velocity();
    }

    /// Age the track one unmatched frame.
    ///
    /// With prediction enabled the box coasts along a decaying velocity
    /// and the predicted center extends the history, so a re-appearing
    /// detection can still overlap the track.
    pub fn age(&mut self, use_prediction: bool) {
        self.lost_frames += 1;
        if use_prediction {
            let decay = (1.0 - f64::from(self.lost_frames) * 0.02).max(0.5);
            self.velocity = (self.velocity.0 * decay, self.velocity.1 * decay);
            self.bbox = self.predicted_bbox();
            self.push_center(self.bbox.center());
        }
    }

    pub fn push_center(&mut self, center: (f64, f64)) {
        self.history.push_back(center);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Recompute velocity as the recency-weighted mean of the last
    /// `min(5, |history|)` center displacements (weight = 1-based index,
    /// so newer displacements dominate).
    pub fn update_velocity(&mut self) {
        if self.history.len() < 2 {
            self.velocity = (0.0, 0.0);
            return;
        }

        let n = VELOCITY_WINDOW.min(self.history.len());
        let tail: Vec<(f64, f64)> = self.history.iter().skip(self.history.len() - n).copied().collect();

        let mut total_vx = 0.0;
        let mut total_vy = 0.0;
        let mut total_w = 0.0;
        for i in 1..tail.len() {
            let weight = i as f64;
            total_vx += (tail[i].0 - tail[i - 1].0) * weight;
            total_vy += (tail[i].1 - tail[i - 1].1) * weight;
            total_w += weight;
        }

        self.velocity = if total_w > 0.0 {
            (total_vx / total_w, total_vy / total_w)
        } else {
            (0.0, 0.0)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn track_at(x: f64, y: f64) -> Track {
        Track::new(1, BBox::new(x, y, x + 50.0, y + 50.0), 0, 0.9, 0.0)
    }

    #[test]
    fn test_new_track_invariants() {
        let track = track_at(100.0, 100.0);
        assert_eq!(track.hits, 1);
        assert_eq!(track.lost_frames, 0);
        assert_eq!(track.history.len(), 1);
        assert_eq!(track.velocity, (0.0, 0.0));
        assert!(track.class_name.is_none());
        assert!(track.activity.is_none());
        assert!(track.clothing.is_none());
    }

    #[test]
    fn test_velocity_zero_with_single_point() {
        let mut track = track_at(0.0, 0.0);
        track.update_velocity();
        assert_eq!(track.velocity, (0.0, 0.0));
    }

    #[test]
    fn test_velocity_constant_motion() {
        let mut track = track_at(0.0, 0.0);
        for i in 1..6 {
            let x = i as f64 * 10.0;
            track.apply_match(BBox::new(x, 0.0, x + 50.0, 50.0), 0, 0.9, i as f64);
        }
        // Uniform 10 px/frame motion: every weighted displacement is 10.
        assert_relative_eq!(track.velocity.0, 10.0, epsilon = 1e-9);
        assert_relative_eq!(track.velocity.1, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_velocity_weights_favor_recent() {
        let mut track = track_at(0.0, 0.0);
        // Three still frames, then one 12 px jump: weights 1,2,3 over
        // displacements 0,0,12 → vx = 36/6 = 6.
        track.apply_match(BBox::new(0.0, 0.0, 50.0, 50.0), 0, 0.9, 1.0);
        track.apply_match(BBox::new(0.0, 0.0, 50.0, 50.0), 0, 0.9, 2.0);
        track.apply_match(BBox::new(12.0, 0.0, 62.0, 50.0), 0, 0.9, 3.0);
        assert_relative_eq!(track.velocity.0, 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_apply_match_resets_lost_and_counts_hit() {
        let mut track = track_at(0.0, 0.0);
        track.age(true);
        track.age(true);
        assert_eq!(track.lost_frames, 2);

        track.apply_match(BBox::new(1.0, 0.0, 51.0, 50.0), 0, 0.8, 5.0);
        assert_eq!(track.lost_frames, 0);
        assert_eq!(track.hits, 2);
        assert_relative_eq!(track.score, 0.8);
        assert_relative_eq!(track.last_seen, 5.0);
    }

    #[test]
    fn test_age_with_prediction_coasts_and_decays() {
        let mut track = track_at(0.0, 0.0);
        track.velocity = (10.0, 0.0);
        track.age(true);

        // decay = max(0.5, 1 - 0.02*1) = 0.98 → shift 9.8
        assert_relative_eq!(track.velocity.0, 9.8, epsilon = 1e-9);
        assert_relative_eq!(track.bbox.x1, 9.8, epsilon = 1e-9);
        assert_eq!(track.history.len(), 2);
    }

    #[test]
    fn test_age_decay_floors_at_half() {
        let mut track = track_at(0.0, 0.0);
        track.velocity = (10.0, 0.0);
        track.lost_frames = 40; // decay formula would give 1 - 0.82 < 0.5
        track.age(true);
        assert_relative_eq!(track.velocity.0, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_age_without_prediction_keeps_box() {
        let mut track = track_at(0.0, 0.0);
        track.velocity = (10.0, 0.0);
        track.age(false);
        assert_eq!(track.lost_frames, 1);
        assert_relative_eq!(track.bbox.x1, 0.0);
        assert_eq!(track.history.len(), 1);
    }

    #[test]
    fn test_history_capped_at_fifty() {
        let mut track = track_at(0.0, 0.0);
        for i in 0..100 {
            track.push_center((i as f64, 0.0));
        }
        assert_eq!(track.history.len(), MAX_HISTORY);
        // Oldest dropped first: front should be from the later pushes.
        assert_relative_eq!(track.history.front().unwrap().0, 50.0);
        assert_relative_eq!(track.history.back().unwrap().0, 99.0);
    }
}
