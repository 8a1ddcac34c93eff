//! Rate limiting logic and state management.

mod clock;
mod counter;
mod limiter;
mod policy;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{ClientWindowState, WindowSnapshot};
pub use limiter::{Code, RateLimitStatus, RateLimiter};
pub use policy::{
    RateLimitConfig, RejectionFormat, DEFAULT_MAX_REQUESTS_PER_WINDOW,
    DEFAULT_REJECTION_MESSAGE, DEFAULT_WINDOW_DURATION_MS,
};
pub use store::{spawn_sweeper, WindowCounterStore};
