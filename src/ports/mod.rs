pub mod byte_sink;
pub mod object_store;
pub mod record_store;
pub mod usage_port;
