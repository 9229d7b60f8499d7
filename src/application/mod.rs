pub mod cancellation;
pub mod compression;
pub mod encoder;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod source;
pub mod stage_worker;
