//! Turns driver outcomes into `automation_results` rows.

use async_trait::async_trait;
use geoincra_core::hashing::sha256_hex;
use geoincra_core::storage::StoragePaths;
use geoincra_core::types::DbId;
use geoincra_db::models::document::NewDocument;
use geoincra_db::models::job::Job;
use geoincra_db::models::result::NewAutomationResult;
use geoincra_portals::driver::{Artifact, ItemOutcome, OutcomeSink, SinkError};
use serde_json::{json, Map, Value};

use crate::stores::ResultStore;

/// URL the backend serves a registered document under.
pub fn document_download_url(document_id: DbId) -> String {
    format!("/api/files/documents/{document_id}")
}

/// [`OutcomeSink`] that writes one result row per outcome of `job`.
pub struct ResultRecorder<'a> {
    store: &'a dyn ResultStore,
    storage: &'a StoragePaths,
    job: &'a Job,
    persisted: usize,
}

impl<'a> ResultRecorder<'a> {
    pub fn new(store: &'a dyn ResultStore, storage: &'a StoragePaths, job: &'a Job) -> Self {
        Self {
            store,
            storage,
            job,
            persisted: 0,
        }
    }

    /// Rows inserted so far.
    pub fn persisted(&self) -> usize {
        self.persisted
    }

    async fn attach_artifact(&self, artifact: &Artifact, metadata: &mut Map<String, Value>) -> String {
        match tokio::fs::read(&artifact.path).await {
            Ok(bytes) => {
                metadata.insert("sha256".into(), Value::String(sha256_hex(&bytes)));
            }
            Err(e) => {
                tracing::warn!(
                    job_id = self.job.id,
                    path = %artifact.path.display(),
                    error = %e,
                    "Could not hash artifact",
                );
            }
        }

        let serving_path = self.storage.to_serving_path(&artifact.path);
        let stored_filename = serving_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.document.original_filename.clone());
        let serving_path = serving_path.to_string_lossy().into_owned();

        let document = NewDocument {
            doc_type: artifact.document.doc_type.clone(),
            stored_filename,
            original_filename: artifact.document.original_filename.clone(),
            content_type: artifact.document.content_type.clone(),
            description: artifact.document.description.clone(),
            file_path: serving_path.clone(),
        };

        match self
            .store
            .register_document(self.job.project_id, &document)
            .await
        {
            Ok(Some(document_id)) => {
                metadata.insert("document_id".into(), json!(document_id));
                metadata.insert(
                    "download_url".into(),
                    Value::String(document_download_url(document_id)),
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    job_id = self.job.id,
                    project_id = ?self.job.project_id,
                    error = %e,
                    "Document registration failed, recording result without it",
                );
            }
        }

        serving_path
    }
}

#[async_trait]
impl OutcomeSink for ResultRecorder<'_> {
    async fn accept(&mut self, outcome: ItemOutcome) -> Result<(), SinkError> {
        let ItemOutcome {
            index,
            fields,
            mut metadata,
            artifact,
            failure,
        } = outcome;

        metadata.insert("item_index".into(), json!(index));
        if let Some(failure) = &failure {
            metadata.insert(
                "error".into(),
                json!({ "kind": failure.kind.as_str(), "reason": failure.reason }),
            );
        }

        let file_path = match &artifact {
            Some(artifact) => Some(self.attach_artifact(artifact, &mut metadata).await),
            None => None,
        };

        let row = NewAutomationResult {
            protocolo: fields.protocolo,
            matricula: fields.matricula,
            cnm: fields.cnm,
            cartorio: fields.cartorio,
            data_pedido: fields.data_pedido,
            file_path,
            metadata: Some(Value::Object(metadata)),
        };

        let result_id = self
            .store
            .insert_result(self.job.id, &row)
            .await
            .map_err(SinkError::new)?;
        self.persisted += 1;

        tracing::debug!(
            job_id = self.job.id,
            result_id,
            item_index = index,
            failed = failure.is_some(),
            "Item persisted",
        );
        Ok(())
    }
}
