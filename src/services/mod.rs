pub mod digest;
pub mod manifest;
pub mod report;
pub mod storage;
