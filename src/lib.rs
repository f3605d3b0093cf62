//! Streams vSphere events as CloudEvents into pluggable processors.
//!
//! A [`provider::Provider`] pulls batches of [`events::VsphereEvent`]s from a
//! source, converts each into an [`envelope::Envelope`] and hands it to a
//! [`processor::Processor`]. Statistics flow separately to a
//! [`metrics::Receiver`].

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod provider;

pub use envelope::Envelope;
pub use error::{Result, RouterError};
pub use events::{new_cloud_event, VsphereEvent};
pub use metrics::{EventStats, Receiver};
pub use processor::Processor;
pub use provider::{Batch, Provider};
