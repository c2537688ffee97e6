// Task domain model and change tracking

pub mod diff;
pub mod model;

pub use diff::{diff_tasks, set_diff, FieldChange, SetDiff, TaskField};
pub use model::{
    Assignment, NewTask, Task, TaskId, TaskPatch, TaskPriority, TaskResponse, TaskStatus, TeamId,
    UserId,
};
