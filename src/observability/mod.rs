//! 可观测性：日志初始化与 span 追踪

pub mod memory;
pub mod tracer;

pub use memory::{InMemoryTracer, SpanEvent, SpanRecord};
pub use tracer::{attributes, SpanContext, SpanGuard, SpanKind, SpanStatus, TraceScope, Tracer};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 tracing subscriber；RUST_LOG 优先于 filter。已安装过时返回 false
pub fn init_logging(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .try_init()
        .is_ok()
}
