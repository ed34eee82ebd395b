pub mod client;
pub mod prompt;
pub mod reconcile;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::pipeline::Reporter;
use crate::store::{RecordStore, SourceRecord};
use client::ExtractionClient;
use reconcile::{reconcile, Reconciled};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub excerpt_chars: usize,
    /// Batches in flight at once. 1 keeps requests strictly sequential.
    pub concurrency: usize,
}

/// One extraction call: a contiguous slice of the store plus keyword context.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub index: usize,
    pub records: &'a [SourceRecord],
    pub keyword: &'a str,
}

impl ExtractionRequest<'_> {
    pub fn user_prompt(&self, excerpt_chars: usize) -> String {
        prompt::user_prompt(self.records, self.keyword, excerpt_chars)
    }
}

/// Split the store into consecutive batches of `batch_size`.
pub fn plan<'a>(store: &'a RecordStore, keyword: &'a str, batch_size: usize) -> Vec<ExtractionRequest<'a>> {
    store
        .batches(batch_size)
        .enumerate()
        .map(|(index, records)| ExtractionRequest { index, records, keyword })
        .collect()
}

/// Sends every batch to the extraction service and reconciles the answers.
pub struct ExtractionBatcher<'a> {
    client: &'a dyn ExtractionClient,
    options: BatchOptions,
}

impl<'a> ExtractionBatcher<'a> {
    pub fn new(client: &'a dyn ExtractionClient, options: BatchOptions) -> Self {
        Self { client, options }
    }

    /// Results in batch order, then response order within each batch.
    /// A failed batch contributes nothing and does not stop the others.
    pub async fn run(&self, store: &RecordStore, keyword: &str, reporter: &Reporter) -> Vec<Reconciled> {
        let requests = plan(store, keyword, self.options.batch_size);
        let total = requests.len();
        info!("Extracting {} records in {} batches", store.len(), total);

        let batches: Vec<_> = requests
            .into_iter()
            .map(|request| self.run_batch(request, total, store, reporter))
            .collect();
        let per_batch: Vec<Vec<Reconciled>> = stream::iter(batches)
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        per_batch.into_iter().flatten().collect()
    }

    async fn run_batch(
        &self,
        request: ExtractionRequest<'_>,
        total: usize,
        store: &RecordStore,
        reporter: &Reporter,
    ) -> Vec<Reconciled> {
        reporter.batch_started(request.index, total);
        let user = request.user_prompt(self.options.excerpt_chars);

        match self.client.complete_json(prompt::SYSTEM_PROMPT, &user).await {
            Ok(response) => {
                let result = reconcile(&response, store);
                reporter.batch_finished(request.index, result.records.len(), result.discarded);
                result.records
            }
            Err(e) => {
                warn!("Batch {}/{} failed: {}", request.index + 1, total, e);
                reporter.batch_failed(request.index, &e.to_string());
                Vec::new()
            }
        }
    }
}
