pub mod connection_manager;
pub mod record_store;
pub mod sql_utils;
