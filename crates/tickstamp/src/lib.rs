//! tickstamp: Sortable fixed-width millisecond timestamps
//!
//! Encodes the current wall-clock millisecond as 8 URL-safe characters whose
//! lexicographic order matches numeric order. Under sustained high call
//! rates the acquisition controller switches to a cache kept current by a
//! background refresher, and switches back once calls go quiet.

pub mod cell;
pub mod clock;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod rate;
pub mod refresher;
pub mod test_helpers;

pub use clock::{Clock, SystemClock};
pub use config::{Config, Prefer};
pub use controller::{AcquisitionController, ControllerBuilder, StartMode};
pub use diagnostics::{ControllerState, Diagnostics, Transition, TransitionReason};
pub use encoder::{decode, encode, Alphabet, EncodedTimestamp};
pub use error::{Error, Result};
pub use metrics::encode_metrics;
pub use refresher::{Strategy, ThreadLauncher, WorkerLauncher};
