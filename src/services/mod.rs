pub mod candidate_service;
pub mod candidate_store;
pub mod file_storage;
pub mod upload_policy;
pub mod validation;
