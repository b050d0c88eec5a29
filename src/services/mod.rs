pub mod key_router;
pub mod object_store;
pub mod pipeline;
pub mod resize_service;
pub mod storage_service;
