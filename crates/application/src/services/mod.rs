mod delivery_router;
mod history_reader;
mod status_tracker;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod delivery_router_tests;

pub use delivery_router::{DeliveryRouter, DeliveryRouterDependencies, SendMessageRequest};
pub use history_reader::{
    HistoryQuery, HistoryReader, HistoryReaderDependencies, HistorySettings,
};
pub use status_tracker::{StatusTracker, StatusTrackerDependencies};
