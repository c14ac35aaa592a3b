pub mod high_vis;
