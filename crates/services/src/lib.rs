#![forbid(unsafe_code)]

pub mod app_services;
pub mod course_service;
pub mod error;
pub mod progress_service;
pub mod progress_tracker;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use course_service::{CourseService, NewModule, NewProgram, NewVideo, RecomputeReport};
pub use error::{AppServicesError, CourseServiceError, ProgressServiceError};
pub use progress_service::{ProgressService, WatchThreshold};
pub use progress_tracker::ProgressTracker;
