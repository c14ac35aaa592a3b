//! Class-conditional activity classification over short motion histories.
//!
//! One `classify` entry point dispatches on the track's class family;
//! nothing outside this module branches on class names for activity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ActivityConfig;
use crate::detection::domain::classes::{family_of, ClassFamily};
use crate::tracking::track::Track;

/// Coarse activity label over a short motion window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Standing,
    Moving,
    Stopped,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Standing => "standing",
            Activity::Moving => "moving",
            Activity::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Activity> {
        match s {
            "standing" => Some(Activity::Standing),
            "moving" => Some(Activity::Moving),
            "stopped" => Some(Activity::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies track activity from center history.
///
/// Persons are judged on instantaneous speed (median of consecutive-center
/// distances over the window, scaled by fps; the median resists
/// single-frame jitter). Rail vehicles are judged on endpoint displacement,
/// since they reveal motion only over longer horizons.
pub struct ActivityClassifier {
    fps: f64,
    window: usize,
    person_speed_threshold: f64,
    vehicle_displacement_threshold: f64,
    vehicle_min_history: usize,
}

impl ActivityClassifier {
    pub fn new(fps: f64, config: &ActivityConfig) -> Self {
        Self {
            fps,
            window: config.window,
            person_speed_threshold: config.person_speed_threshold,
            vehicle_displacement_threshold: config.vehicle_displacement_threshold,
            vehicle_min_history: config.vehicle_min_history,
        }
    }

    /// Set `activity` and `activity_conf` on one track.
    ///
    /// Classes outside the person/vehicle families get their activity
    /// cleared with confidence 0.
    pub fn classify(&self, track: &mut Track) {
        let family = track
            .class_name
            .as_deref()
            .map(family_of)
            .unwrap_or(ClassFamily::Other);

        let result = match family {
            ClassFamily::Person => Some(self.classify_person(track)),
            ClassFamily::Vehicle => Some(self.classify_vehicle(track)),
            ClassFamily::Other => None,
        };

        match result {
            Some((activity, conf)) => {
                track.activity = Some(activity);
                track.activity_conf = conf;
            }
            None => {
                track.activity = None;
                track.activity_conf = 0.0;
            }
        }
    }

    fn classify_person(&self, track: &Track) -> (Activity, f64) {
        if self.speed(track) < self.person_speed_threshold {
            (Activity::Standing, 0.90)
        } else {
            (Activity::Moving, 0.90)
        }
    }

    fn classify_vehicle(&self, track: &Track) -> (Activity, f64) {
        let history = &track.history;
        if history.len() < self.vehicle_min_history {
            return (Activity::Stopped, 0.85);
        }

        let start = history.front().copied().unwrap_or((0.0, 0.0));
        let end = history.back().copied().unwrap_or((0.0, 0.0));
        let displacement = (end.0 - start.0).hypot(end.1 - start.1);

        if displacement < self.vehicle_displacement_threshold {
            (Activity::Stopped, 0.95)
        } else {
            (Activity::Moving, 0.90)
        }
    }

    /// Pixel speed per second: median consecutive-center distance over the
    /// last `window` points, scaled by fps. Zero until three points exist.
    fn speed(&self, track: &Track) -> f64 {
        let history = &track.history;
        if history.len() < 3 {
            return 0.0;
        }

        let start = history.len().saturating_sub(self.window);
        let pts: Vec<(f64, f64)> = history.iter().skip(start).copied().collect();

        let mut distances: Vec<f64> = pts
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
            .collect();

        if distances.is_empty() {
            return 0.0;
        }

        distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        distances[distances.len() / 2] * self.fps
    }
}
