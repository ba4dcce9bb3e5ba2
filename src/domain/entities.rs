use gambit_export_types::{JobOutput, RenderManifest};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Versions of every input that went into an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub template_version: i64,
    pub card_version: i64,
    pub art_version: i64,
}

impl From<&JobOutput> for Fingerprint {
    fn from(output: &JobOutput) -> Self {
        Self {
            template_version: output.template_version,
            card_version: output.card_version,
            art_version: output.art_version,
        }
    }
}

/// Latest successful export of a card.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub card_id: String,
    pub fingerprint: Fingerprint,
    pub artifact_ref: String,
    pub checksum_sha256: String,
    pub manifest: RenderManifest,
    pub updated_at: OffsetDateTime,
}

impl ExportRecord {
    pub fn is_fresh(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint == *fingerprint
    }
}

/// Values written by a single ledger upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportUpsert {
    pub card_id: String,
    pub fingerprint: Fingerprint,
    pub artifact_ref: String,
    pub checksum_sha256: String,
    pub manifest: RenderManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRenderJob {
    pub job_id: String,
    pub card_ids: Vec<String>,
    pub created_at: OffsetDateTime,
}

/// Terminal result written by `complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCompletion {
    Succeeded(Vec<JobOutput>),
    Failed(String),
}

impl JobCompletion {
    /// Outputs only survive on success; an error always wins.
    pub fn new(outputs: Vec<JobOutput>, error: Option<String>) -> Self {
        match error {
            Some(message) => Self::Failed(message),
            None => Self::Succeeded(outputs),
        }
    }

    pub fn outputs(&self) -> &[JobOutput] {
        match self {
            Self::Succeeded(outputs) => outputs,
            Self::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(message) => Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> JobOutput {
        JobOutput {
            card_id: "c1".to_string(),
            artifact_ref: "exports/c1.png".to_string(),
            checksum_sha256: "ab".repeat(32),
            template_version: 3,
            card_version: 7,
            art_version: 0,
        }
    }

    #[test]
    fn error_discards_outputs() {
        let completion = JobCompletion::new(vec![output()], Some("boom".to_string()));
        assert!(completion.outputs().is_empty());
        assert_eq!(completion.error(), Some("boom"));
    }

    #[test]
    fn fingerprint_tracks_all_three_versions() {
        let fingerprint = Fingerprint::from(&output());
        let record = ExportRecord {
            card_id: "c1".to_string(),
            fingerprint,
            artifact_ref: "exports/c1.png".to_string(),
            checksum_sha256: "ab".repeat(32),
            manifest: RenderManifest {
                card_id: "c1".to_string(),
                generated_at: OffsetDateTime::UNIX_EPOCH,
                template_id: "unit-default".to_string(),
                variant: "base".to_string(),
                applied_overlay_ids: Vec::new(),
            },
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };

        assert!(record.is_fresh(&fingerprint));
        let bumped_art = Fingerprint {
            art_version: 1,
            ..fingerprint
        };
        assert!(!record.is_fresh(&bumped_art));
    }
}
