/// Router Module Index
///
/// One router per access level. Each router is wrapped in the route guard for its
/// level in `create_router`, so a handler never runs for a user the guard would turn away.

/// Pages anyone may open, signed in or not. Not guarded.
pub mod public;

/// Pages for any signed-in user, whatever their role.
pub mod authenticated;

/// Pages for the `admin` role, nested under `/admin`.
pub mod admin;

/// Pages for the `teacher` role, nested under `/teacher`.
pub mod teacher;

/// Pages for the `student` role, nested under `/student`.
pub mod student;
