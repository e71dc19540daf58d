//! Client-side live state fed by the push stream: active flows, recent alerts
//! and activity, plus the cached dashboard summary kept fresh by invalidation.

mod board;
mod dashboard;
mod ring;

pub use board::{ActiveFlow, ActivityEntry, BoardSnapshot, FlowBoard, FlowBoardStats};
pub use dashboard::{DashboardService, SummarySource, DASHBOARD_RESOURCE, INVALIDATING_KINDS};
