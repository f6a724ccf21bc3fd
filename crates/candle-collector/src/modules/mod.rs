//! 수집 파이프라인 모듈.

pub mod backfill;
pub mod cursor;
pub mod fetcher;
pub mod live;
pub mod pipeline;
pub mod planner;
pub mod reconciler;
pub mod registry;

pub use backfill::{BackfillCoordinator, ChannelState};
pub use cursor::read_cursor;
pub use fetcher::Fetcher;
pub use live::{LiveHandle, LiveListener, LiveStats};
pub use pipeline::{ChannelStatus, Collector};
pub use planner::{FetchWindow, WindowPlanner};
pub use reconciler::Reconciler;
pub use registry::{channels, SeriesRegistry};
