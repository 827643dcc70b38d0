// Core commands
pub mod deploy;
pub mod list;
