pub mod cluster;
pub mod command;
pub mod executor;
pub mod file;
pub mod report;
pub mod system;
