pub mod defs;
pub mod pipeline;
pub mod tools;
