#![forbid(unsafe_code)]

pub mod capture;
pub mod classifier;
pub mod config;
pub mod decode;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod output;
pub mod packet;
pub mod resolution;
pub mod telemetry;
pub mod tracker;

pub use classifier::{Classifier, ClassifierStats, DedupKey};
pub use config::{load_from_path, Config, InterfaceSelection};
pub use emitter::{ConnectionEvent, Direction, Emitter, Event};
pub use engine::{Engine, EngineSettings, EngineStats};
pub use error::{ConntrailError, Result};
pub use output::{EventSink, OutputFormat, WriterSink};
pub use packet::{Packet, TcpFlags};
pub use resolution::{ResolutionRecord, ResolutionTable, Resolved};
pub use tracker::{FlowKey, HandshakeTracker, Outcome, PendingHandshake};
