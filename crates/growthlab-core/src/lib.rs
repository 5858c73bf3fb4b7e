//! growthlab-core: governed access to a quota-limited generative backend.
//!
//! ```text
//!  UI call ──┐                                   ┌──────────────────────┐
//!            ├─► RequestGovernor ──► backend ───►│ GeminiClient (REST)  │
//!  timer ────┘    (slots, retry)                 └──────────────────────┘
//!      ▲                │ quota exhausted
//!      │                ▼
//!  BackgroundGeneration  QuotaCircuitBreaker
//!  Scheduler ◄── is_suspended() ──┘
//! ```

mod breaker;
mod config;
mod content;
mod error;
mod gemini;
mod governor;
mod operation;
mod scheduler;

pub use breaker::{QuotaCircuitBreaker, QuotaState};
pub use config::{
    BreakerSettings, GeminiSettings, GovernorSettings, GrowthConfig, LiveSettings,
    SchedulerSettings,
};
pub use content::{Article, MarketingStrategy, Source, Trend};
pub use error::{ServiceError, ServiceResult, QUOTA_MARKERS};
pub use gemini::GeminiClient;
pub use governor::{InferenceRequest, Origin, RequestGovernor};
pub use operation::{OperationBackend, OperationHandle, OperationPoller, OperationStatus};
pub use scheduler::{BackgroundGenerationScheduler, ContentGenerator, SchedulerHandle, TickOutcome};
