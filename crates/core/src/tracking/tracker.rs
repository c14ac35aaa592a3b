/// Greedy IoU multi-object tracker with motion prediction.
///
/// Maintains persistent track ids across frames by matching detections to
/// tracks on IoU, coasting lost tracks along a decaying velocity, and
/// evicting tracks that stay unmatched past `max_lost` frames.
use std::collections::{BTreeMap, HashSet};

use crate::detection::domain::object_detector::Detection;
use crate::shared::bbox::BBox;
use crate::shared::epoch_seconds;
use crate::tracking::track::Track;

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.2;
pub const DEFAULT_MAX_LOST: u32 = 45;

pub struct Tracker {
    iou_threshold: f64,
    max_lost: u32,
    use_prediction: bool,
    /// Keyed by id; BTreeMap keeps iteration order deterministic.
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(iou_threshold: f64, max_lost: u32, use_prediction: bool) -> Self {
        Self {
            iou_threshold,
            max_lost,
            use_prediction,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Fold one frame of detections into the track set.
    ///
    /// Total over any input: empty detection lists, empty track sets, and
    /// zero-area boxes simply produce no matches.
    pub fn update(&mut self, detections: &[Detection]) {
        let now = epoch_seconds();
        let assignments = self.associate(detections);

        // Tracks matched or spawned this frame are exempt from aging.
        let mut fresh: HashSet<u64> = HashSet::new();

        // Update matched tracks
        let mut matched_dets = vec![false; detections.len()];
        for &(det_idx, track_id) in &assignments {
            matched_dets[det_idx] = true;
            fresh.insert(track_id);
            let det = &detections[det_idx];
            if let Some(track) = self.tracks.get_mut(&track_id) {
                track.apply_match(det.bbox, det.class_id, det.score, now);
            }
        }

        // Spawn tracks for unmatched detections
        for (det_idx, det) in detections.iter().enumerate() {
            if !matched_dets[det_idx] {
                let id = self.next_id;
                self.next_id += 1;
                fresh.insert(id);
                self.tracks
                    .insert(id, Track::new(id, det.bbox, det.class_id, det.score, now));
            }
        }

        // Age unmatched existing tracks, evicting past max_lost
        let use_prediction = self.use_prediction;
        let max_lost = self.max_lost;
        self.tracks.retain(|id, track| {
            if fresh.contains(id) {
                return true;
            }
            track.age(use_prediction);
            track.lost_frames <= max_lost
        });
    }

    /// Greedy association: repeatedly take the highest-IoU pair above the
    /// threshold whose detection and track are both unused. Ties resolve in
    /// row-major (detection-index, track-position) order, so the outcome is
    /// deterministic for identical input.
    fn associate(&self, detections: &[Detection]) -> Vec<(usize, u64)> {
        if detections.is_empty() || self.tracks.is_empty() {
            return Vec::new();
        }

        let track_entries: Vec<(u64, BBox)> = self
            .tracks
            .values()
            .map(|t| {
                let bbox = if t.lost_frames > 0 && self.use_prediction {
                    t.predicted_bbox()
                } else {
                    t.bbox
                };
                (t.id, bbox)
            })
            .collect();

        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        for (di, det) in detections.iter().enumerate() {
            for (ti, (_, bbox)) in track_entries.iter().enumerate() {
                let iou = det.bbox.iou(bbox);
                if iou >= self.iou_threshold {
                    pairs.push((di, ti, iou));
                }
            }
        }

        // Descending IoU; equal scores keep row-major order.
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.0, a.1).cmp(&(b.0, b.1)))
        });

        let mut used_dets = vec![false; detections.len()];
        let mut used_tracks = vec![false; track_entries.len()];
        let mut assignments = Vec::new();

        for (di, ti, _) in pairs {
            if used_dets[di] || used_tracks[ti] {
                continue;
            }
            used_dets[di] = true;
            used_tracks[ti] = true;
            assignments.push((di, track_entries[ti].0));
        }

        assignments
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Mutable access for the downstream classification stages.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    /// A snapshot copy of the current track set, ascending id order.
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }
}
