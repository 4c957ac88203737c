#![forbid(unsafe_code)]

pub mod model;
pub mod progress;
pub mod time;

pub use progress::{recompute_progress, toggle_video_completion};
pub use time::Clock;
