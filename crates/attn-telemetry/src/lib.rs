pub mod logging;
pub mod tracing_setup;

pub use logging::{init_logging, init_logging_json};
pub use tracing_setup::{create_child_span, create_operation_span, generate_span_id, generate_trace_id, request_id_middleware};
