pub mod candidate_handlers;
pub mod health_handlers;
