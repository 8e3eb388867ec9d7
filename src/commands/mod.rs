// Lifecycle commands (up, down, start, stop, pause, unpause)
pub mod lifecycle;

// Inspection commands
pub mod logs;
pub mod ls;
pub mod ps;

pub mod config;
