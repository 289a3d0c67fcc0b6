//! Decode + classify in one pass. Shared by the ingestion loop and tails.

use tracing::debug;

use crate::classify::Classifier;
use crate::envelope;
use crate::types::{ClassifiedLine, Encoding};

#[derive(Debug, Clone, Default)]
pub struct LinePipeline {
    encoding: Encoding,
    classifier: Classifier,
}

impl LinePipeline {
    pub fn new(encoding: Encoding, classifier: Classifier) -> Self {
        Self {
            encoding,
            classifier,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Returns `None` for payloads that decode as neither envelope shape.
    /// Those are logged and dropped here; they never reach a caller.
    pub fn process(&self, payload: &[u8]) -> Option<ClassifiedLine> {
        match envelope::decode(payload, self.encoding) {
            Ok(envelope) => Some(self.classifier.classify(&envelope)),
            Err(e) => {
                debug!(
                    encoding = %self.encoding,
                    bytes = payload.len(),
                    error = %e,
                    "discarding undecodable envelope"
                );
                None
            }
        }
    }
}
