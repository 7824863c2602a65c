//! First-live candidate selection.
//!
//! Walks the subscription list strictly in order, probing one candidate at
//! a time, and stops at the first live result. Each candidate moves
//! through an explicit state machine; the run is terminal on the first
//! `Live` or on exhaustion.

use tracing::{info, warn};

use crate::endpoint::{self, EndpointDescriptor};
use crate::probe::LivenessProbe;

/// Lifecycle of one candidate within a selection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// Not yet reached.
    Pending,
    /// Probe in flight.
    Probing,
    /// Probe confirmed reachability; terminal for the whole run.
    Live,
    /// Undecodable URI or failed probe.
    Dead,
}

/// One subscription entry under evaluation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub uri: String,
    pub state: CandidateState,
}

/// Every candidate was dead (or undecodable).
#[derive(Debug, thiserror::Error)]
#[error("no live candidate among {tried} subscription entries")]
pub struct ExhaustionError {
    pub tried: usize,
}

/// Sequential first-match selector over an ordered candidate list.
pub struct CandidateSelector {
    candidates: Vec<Candidate>,
}

impl CandidateSelector {
    pub fn new(uris: Vec<String>) -> Self {
        let candidates = uris
            .into_iter()
            .map(|uri| Candidate {
                uri,
                state: CandidateState::Pending,
            })
            .collect();
        Self { candidates }
    }

    /// Probe candidates in list order and return the first live one.
    ///
    /// A URI that fails to decode is logged and marked dead, never fatal.
    /// Probes run strictly one at a time — they share the fixed probe
    /// listener port, so there is no parallel variant.
    pub async fn select(
        &mut self,
        probe: &dyn LivenessProbe,
    ) -> Result<EndpointDescriptor, ExhaustionError> {
        let total = self.candidates.len();
        for index in 0..total {
            self.candidates[index].state = CandidateState::Probing;

            let descriptor = match endpoint::decode(&self.candidates[index].uri) {
                Ok(d) => d,
                Err(e) => {
                    warn!("candidate {}/{total}: skipping undecodable URI: {e}", index + 1);
                    self.candidates[index].state = CandidateState::Dead;
                    continue;
                }
            };

            info!("candidate {}/{total}: probing {descriptor}", index + 1);
            let result = probe.probe(&descriptor).await;
            if result.live {
                self.candidates[index].state = CandidateState::Live;
                let latency_ms = result.latency.map_or(0, |l| l.as_millis());
                info!("candidate {}/{total}: live ({latency_ms} ms)", index + 1);
                return Ok(result.descriptor);
            }

            self.candidates[index].state = CandidateState::Dead;
            match result.diagnostic {
                Some(diagnostic) => {
                    warn!("candidate {}/{total}: dead: {diagnostic}", index + 1);
                }
                None => warn!("candidate {}/{total}: dead", index + 1),
            }
        }

        Err(ExhaustionError { tried: total })
    }

    /// Candidate states after (or during) a run, in list order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}
