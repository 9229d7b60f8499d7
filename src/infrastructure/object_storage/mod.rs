pub mod local_object_store;
pub mod multipart_sink;
