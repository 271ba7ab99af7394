pub mod response;
pub mod tracing_init;
