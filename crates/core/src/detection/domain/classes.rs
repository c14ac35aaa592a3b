//! Class-name resolution and the class families the pipeline cares about.
//!
//! Downstream code dispatches on [`ClassFamily`]; the raw class-name sets
//! live only here.

/// The 80 COCO class names in YOLO model order.
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Coarse family a detection class belongs to, used for classifier routing
/// and confidence-threshold selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassFamily {
    Person,
    Vehicle,
    Other,
}

const VEHICLE_CLASSES: [&str; 4] = ["train", "truck", "bus", "car"];

/// Classes whose activity transitions are written to the activity log and
/// whose tracks are published to the sync store.
const LOGGABLE_CLASSES: [&str; 2] = ["person", "train"];

pub fn family_of(class_name: &str) -> ClassFamily {
    if class_name == "person" {
        ClassFamily::Person
    } else if VEHICLE_CLASSES.contains(&class_name) {
        ClassFamily::Vehicle
    } else {
        ClassFamily::Other
    }
}

pub fn is_loggable(class_name: &str) -> bool {
    LOGGABLE_CLASSES.contains(&class_name)
}

pub fn coco_class_name(class_id: usize) -> Option<&'static str> {
    COCO_CLASS_NAMES.get(class_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_coco_table_anchors() {
        assert_eq!(coco_class_name(0), Some("person"));
        assert_eq!(coco_class_name(2), Some("car"));
        assert_eq!(coco_class_name(6), Some("train"));
        assert_eq!(coco_class_name(79), Some("toothbrush"));
        assert_eq!(coco_class_name(80), None);
    }

    #[rstest]
    #[case("person", ClassFamily::Person)]
    #[case("train", ClassFamily::Vehicle)]
    #[case("truck", ClassFamily::Vehicle)]
    #[case("bus", ClassFamily::Vehicle)]
    #[case("car", ClassFamily::Vehicle)]
    #[case("dog", ClassFamily::Other)]
    #[case("bicycle", ClassFamily::Other)]
    fn test_family_routing(#[case] name: &str, #[case] family: ClassFamily) {
        assert_eq!(family_of(name), family);
    }

    #[test]
    fn test_loggable_is_person_and_train_only() {
        assert!(is_loggable("person"));
        assert!(is_loggable("train"));
        assert!(!is_loggable("truck"));
        assert!(!is_loggable("car"));
        assert!(!is_loggable("dog"));
    }
}
