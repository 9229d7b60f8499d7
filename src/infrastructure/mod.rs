pub mod local_storage;
pub mod object_storage;
pub mod oracle;
pub mod usage;
