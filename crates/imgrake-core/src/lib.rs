//! imgrake core - shared infrastructure for the harvesting pipeline
//!
//! Coordination primitives (signal flags, task queues, worker pools) and the
//! outbound request layer (transport, session, proxy pool, retry policy).

pub mod error;
pub mod http;
pub mod logging;
pub mod pool;
pub mod progress;
pub mod proxy;
pub mod queue;
pub mod retry;
pub mod session;
pub mod signal;

// Re-exports for convenience
pub use error::{ConfigError, FetchError};
pub use http::{Method, ReqwestTransport, Request, Response, SHARED_RUNTIME, Transport};
pub use logging::{IndicatifLogger, init_logging};
pub use pool::{PoolCounter, Stage, WorkerContext, WorkerPool, isolate};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use proxy::{Proxy, ProxyPool, WeightLaw};
pub use queue::TaskQueue;
pub use retry::RetryPolicy;
pub use session::{Session, SessionOptions};
pub use signal::{Flag, Signal};
