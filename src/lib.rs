//! tunpick — first-live proxy selection and tunnel supervision.
//!
//! Walks an untrusted subscription list of proxy URIs, probes each
//! candidate through an isolated instance of an external tunneling engine
//! (sing-box-compatible), and supervises a long-running tunnel through
//! the first candidate that proves reachable.

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod probe;
pub mod profile;
pub mod selector;
pub mod subscription;
pub mod supervisor;

pub use config::{ProbeListener, Settings, TunInterface};
pub use endpoint::{decode, DecodeError, EndpointDescriptor, Transport};
pub use engine::EngineProcess;
pub use probe::{LivenessProbe, ProbeResult, ProbeRunner};
pub use profile::{probe_profile, tunnel_profile, EngineProfile, ProfileError};
pub use selector::{CandidateSelector, CandidateState, ExhaustionError};
pub use subscription::{fetch_candidates, prefer_scheme, split_candidates};
pub use supervisor::TunnelSupervisor;
