pub mod handler;
pub mod request_id;
pub mod router;
pub mod service;
