mod ids;
mod program;
mod progress;

pub use ids::{ModuleId, ProgramId, UserId, VideoId};
pub use program::{Module, Program, ProgramError, Video};
pub use progress::{
    CompletedVideos, ModuleTree, ProgramStatus, ProgramStatusParseError, ProgressSnapshot,
    UserProgressRecord,
};
