pub mod classes;
pub mod confidence_filter;
pub mod object_detector;
