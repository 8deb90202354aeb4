pub mod didl;
pub mod error;
pub mod model;
pub mod push;
pub mod transport;

// Re-export key types for easier access
pub use error::{DlnaError, Result};
pub use model::{Device, PushReport, StepResult};
pub use push::{play_on, push_and_play, PushOptions, PushSession};
pub use transport::description::DescriptionClient;
pub use transport::discovery::{
  discover, discover_with_options, CancelToken, DescriptionProbe, DiscoveryEvent,
  DiscoveryOptions, DiscoverySession, DiscoverySource, MulticastScan, UnicastScan,
};
pub use transport::soap::{AvTransport, AvTransportClient, SoapClient};
