//! Upload a single file into an AWS Glacier vault, describing the archive
//! with its base name and UTC modification time in the JSON layout that
//! CloudBerry Explorer and FastGlacier read.

pub mod cli;
pub mod description;
pub mod error;
pub mod glacier;
pub mod treehash;
pub mod upload;
pub mod utf7;
