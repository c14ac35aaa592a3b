pub mod track;
pub mod tracker;
