//! Embedding-based duplicate detection over recent unresolved grievances.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use grievance_core::{
    assess_duplicates, Coordinates, DuplicateAssessment, DuplicatePolicy, GrievanceId,
};
use grievance_store_sqlite::DuplicateCandidateQuery;
use time::{Duration, OffsetDateTime};

use crate::background::BackgroundQueue;
use crate::embedding::Embedder;
use crate::open_store;

#[derive(Clone)]
pub struct DuplicateDetector {
    db_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    policy: DuplicatePolicy,
    queue: BackgroundQueue,
}

/// Text fed to the embedder for a grievance.
#[must_use]
pub fn embedding_text(title: &str, description: &str) -> String {
    format!("{title}\n{description}")
}

impl DuplicateDetector {
    #[must_use]
    pub fn new(
        db_path: PathBuf,
        embedder: Arc<dyn Embedder>,
        policy: DuplicatePolicy,
        queue: BackgroundQueue,
    ) -> Self {
        Self { db_path, embedder, policy, queue }
    }

    /// Rank recent grievances similar to the given text. Returns the embedding
    /// used, which is empty when the embedder failed or is disabled.
    ///
    /// # Errors
    /// Returns an error only when the local store cannot be read.
    pub async fn find_similar(
        &self,
        title: &str,
        description: &str,
        location: Option<Coordinates>,
        exclude: Option<GrievanceId>,
        now: OffsetDateTime,
    ) -> Result<(Vec<f32>, DuplicateAssessment)> {
        let embedding = match self.embedder.embed(&embedding_text(title, description)).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(error = %err, "embedding failed; skipping duplicate detection");
                Vec::new()
            }
        };
        if embedding.is_empty() {
            return Ok((embedding, DuplicateAssessment::default()));
        }

        let candidates = open_store(&self.db_path)?.list_duplicate_candidates(
            &DuplicateCandidateQuery {
                updated_since: now - Duration::days(self.policy.candidate_window_days),
                exclude,
                limit: self.policy.candidate_limit,
            },
        )?;
        let assessment = assess_duplicates(&embedding, location, &candidates, &self.policy);
        Ok((embedding, assessment))
    }

    /// Embed a stored grievance and record its embedding and `duplicate_of` link.
    ///
    /// # Errors
    /// Returns an error when the grievance is missing or the local store fails.
    pub async fn annotate(&self, grievance_id: GrievanceId, now: OffsetDateTime) -> Result<DuplicateAssessment> {
        let grievance = open_store(&self.db_path)?
            .get_grievance(grievance_id)?
            .ok_or_else(|| anyhow!("grievance {grievance_id} not found"))?;

        let (embedding, assessment) = self
            .find_similar(
                &grievance.title,
                &grievance.description,
                grievance.location,
                Some(grievance_id),
                now,
            )
            .await?;
        if embedding.is_empty() {
            return Ok(assessment);
        }

        open_store(&self.db_path)?.set_duplicate_annotation(
            grievance_id,
            &embedding,
            assessment.duplicate_of,
        )?;
        if let Some(duplicate_of) = assessment.duplicate_of {
            tracing::info!(
                grievance_id = %grievance_id,
                duplicate_of = %duplicate_of,
                "grievance flagged as likely duplicate"
            );
        }
        Ok(assessment)
    }

    pub fn schedule_annotation(&self, grievance_id: GrievanceId) -> bool {
        let detector = self.clone();
        self.queue.submit("duplicate_annotation", async move {
            detector.annotate(grievance_id, OffsetDateTime::now_utc()).await.map(|_| ())
        })
    }
}
