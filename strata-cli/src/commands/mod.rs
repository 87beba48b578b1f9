pub mod analyze;
pub mod archive;
mod report;
