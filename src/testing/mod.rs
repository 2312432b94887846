//! In-memory doubles for the cluster and the ngrok API

mod ngrok;
mod resources;

pub use ngrok::FakeNgrok;
pub use resources::{FakeResources, RecordedEvent, RecordingEvents};
