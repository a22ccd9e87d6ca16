pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod telemetry;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{load_dotenv, RuntimeConfig};
pub use error::*;
pub use events::{EventBus, SubscriptionId};
pub use telemetry::{
    FrameMetrics, InteractionState, MemoryReading, StaticFeed, TelemetryFeed, TelemetrySample,
};
pub use types::{PerLevel, Priority, PressureLevel, ProcessingMode};
