pub mod driver;
pub mod frame_slot;
pub mod overlay;
pub mod publisher;
pub mod worker;
