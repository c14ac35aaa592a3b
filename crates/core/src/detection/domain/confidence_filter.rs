use crate::detection::domain::classes::{family_of, ClassFamily};
use crate::detection::domain::object_detector::Detection;

/// Class-conditional confidence gate applied after raw detection.
///
/// Persons and vehicles get their own floors; classes outside both
/// families are dropped entirely.
#[derive(Clone, Debug)]
pub struct ConfidenceFilter {
    conf_person: f64,
    conf_vehicle: f64,
}

impl ConfidenceFilter {
    pub fn new(conf_person: f64, conf_vehicle: f64) -> Self {
        Self {
            conf_person,
            conf_vehicle,
        }
    }

    pub fn filter<'a, F>(&self, detections: Vec<Detection>, class_name: F) -> Vec<Detection>
    where
        F: Fn(usize) -> Option<&'a str>,
    {
        detections
            .into_iter()
            .filter(|det| {
                let Some(name) = class_name(det.class_id) else {
                    return false;
                };
                match family_of(name) {
                    ClassFamily::Person => det.score >= self.conf_person,
                    ClassFamily::Vehicle => det.score >= self.conf_vehicle,
                    ClassFamily::Other => false,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::classes::coco_class_name;
    use crate::shared::bbox::BBox;

    fn det(class_id: usize, score: f64) -> Detection {
        Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), class_id, score)
    }

    #[test]
    fn test_person_kept_above_person_floor() {
        let filter = ConfidenceFilter::new(0.35, 0.65);
        let kept = filter.filter(vec![det(0, 0.5)], coco_class_name);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_same_score_dropped_under_vehicle_floor() {
        // 0.5 passes the person floor but not the vehicle floor.
        let filter = ConfidenceFilter::new(0.35, 0.65);
        let kept = filter.filter(vec![det(6, 0.5)], coco_class_name);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_vehicle_kept_above_vehicle_floor() {
        let filter = ConfidenceFilter::new(0.35, 0.65);
        let kept = filter.filter(vec![det(6, 0.7)], coco_class_name);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_unknown_family_dropped_regardless_of_score() {
        let filter = ConfidenceFilter::new(0.35, 0.65);
        // class 16 = dog
        let kept = filter.filter(vec![det(16, 0.99)], coco_class_name);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_unmapped_class_id_dropped() {
        let filter = ConfidenceFilter::new(0.35, 0.65);
        let kept = filter.filter(vec![det(999, 0.99)], coco_class_name);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_mixed_batch() {
        let filter = ConfidenceFilter::new(0.35, 0.65);
        let kept = filter.filter(
            vec![det(0, 0.9), det(0, 0.1), det(6, 0.9), det(2, 0.3)],
            coco_class_name,
        );
        assert_eq!(kept.len(), 2);
    }
}
