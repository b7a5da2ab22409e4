use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::{Frame, FraudVerdict};

/// One fraud verdict handed off for audit.
#[derive(Debug, Clone, Serialize)]
pub struct Evidence {
    pub attempt: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub frame_index: u64,
    pub frame_size: (u32, u32),
    pub verdict: FraudVerdict,
}

impl Evidence {
    pub fn new(attempt: Uuid, frame: &Frame, verdict: FraudVerdict) -> Self {
        Self {
            attempt,
            recorded_at: Utc::now(),
            frame_index: frame.index,
            frame_size: (frame.width(), frame.height()),
            verdict,
        }
    }
}

/// Receives every fraud verdict together with the frame it was taken on.
/// Snapshot storage, audit rows, and alerting live behind this trait.
pub trait EvidenceSink: Send + Sync {
    fn record(&self, evidence: &Evidence, frame: &Frame);
}

/// Emits each verdict as a JSON record at warn level.
pub struct LogEvidenceSink;

impl EvidenceSink for LogEvidenceSink {
    fn record(&self, evidence: &Evidence, _frame: &Frame) {
        match serde_json::to_string(evidence) {
            Ok(record) => tracing::warn!(target: "vigil::evidence", %record, "fraud evidence"),
            Err(e) => tracing::error!(attempt = %evidence.attempt, error = %e, "failed to encode fraud evidence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn evidence_serializes_verdict() {
        let frame = Frame::new(7, RgbImage::new(32, 24));
        let id = Uuid::new_v4();
        let evidence = Evidence::new(id, &frame, FraudVerdict::multiple_faces(3));

        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["attempt"], id.to_string());
        assert_eq!(json["frame_index"], 7);
        assert_eq!(json["frame_size"][0], 32);
        assert_eq!(json["verdict"]["fraud_type"], "multiple_faces");
        assert!(json["recorded_at"].as_str().is_some());

        LogEvidenceSink.record(&evidence, &frame);
    }
}
