pub mod backend;
pub mod file_service;
pub mod memory_backend;
pub mod s3_backend;
