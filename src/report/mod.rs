//! Detection reporting to the backend.

pub mod client;
pub mod dispatcher;
pub mod event;
pub mod images;
pub mod push;
pub mod system;

pub use client::ApiClient;
pub use dispatcher::{
    BackendDelivery, DeliveryStats, DispatchSummary, EventDelivery, ReportDispatcher, ReportJob,
    DEFAULT_QUEUE_CAPACITY,
};
pub use event::{DetectionEvent, ImageData, SiteIdentity, SystemMetrics};
pub use push::{build_push_transport, ChannelState, PushChannel, PushConnection, PushTransport};
pub use system::SystemProbe;
