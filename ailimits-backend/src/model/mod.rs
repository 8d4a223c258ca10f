pub mod cache;
pub mod clock;
pub mod decode;

pub use cache::TtlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decode::Loose;
