//! Restricted Zone Notifier
//!
//! Watches a video stream, decides every frame whether a person is inside an
//! operator-defined zone, and publishes that state to an MQTT topic at a
//! fixed cadence.
//!
//! # Architecture
//!
//! One tick loop and one publisher thread:
//!
//! 1. **Capture**: a `FrameSource` yields frames until end of stream.
//! 2. **Inference**: the `InferenceScheduler` drives two request slots on an
//!    `InferenceBackend`, overlapping capture with inference in async mode.
//! 3. **Decision**: `occupancy::evaluate` compares detection boxes with the
//!    `Region`; the last qualifying box decides.
//! 4. **Publishing**: `PublisherHandle` samples the shared `OccupancyCell`
//!    every interval and sends `{"Person": 0|1}` over a `MessageBus`.
//! 5. **Control**: `InteractionController` lets an operator redraw the zone,
//!    toggle sync/async scheduling, or quit, between ticks.
//!
//! # Module Structure
//!
//! - `region`, `occupancy`: geometry and the occupancy decision
//! - `detect`: backend trait, devices, SSD output parsing, backends
//! - `scheduler`: request-slot rotation and mode switching
//! - `frame`, `ingest`: frames and frame sources
//! - `render`: overlay drawing and display sinks
//! - `transport`, `publisher`: MQTT and the timed publisher
//! - `interaction`, `pipeline`: operator input and the tick loop
//! - `config`, `error`: runtime configuration and the error taxonomy

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod interaction;
pub mod occupancy;
pub mod pipeline;
pub mod publisher;
pub mod region;
pub mod render;
pub mod scheduler;
pub mod transport;

pub use config::{ConfigOverrides, NotifierConfig};
pub use detect::{Device, InferenceBackend, InputShape, RawDetection};
pub use error::{NotifierError, Result};
pub use frame::Frame;
pub use ingest::FrameSource;
pub use interaction::{InputEvent, InputSource, InteractionController, RegionSelector};
pub use occupancy::{evaluate, OccupancyCell};
pub use pipeline::{FramePipeline, PipelineContext, RunSummary, StopReason};
pub use publisher::{PublisherConfig, PublisherHandle};
pub use region::{DetectionBox, FrameSize, OverlapClass, Region};
pub use render::{FrameDisplay, LogDisplay, NullDisplay};
pub use scheduler::{InferenceScheduler, SchedulingMode, SlotPair};
pub use transport::{MessageBus, MqttBus, RecordingBus, StatusPayload};
