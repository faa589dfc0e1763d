//! The extract/transform/load loop for one tracker.

use std::sync::Arc;

use anyhow::anyhow;
use ferry_types::error::MigrationError;
use ferry_types::failure::{Failure, NewFailure, PipelineStep};
use ferry_types::identity::PlaceholderReference;
use ferry_types::page::{ExtractedData, Record};
use ferry_types::summary::{TrackerCounts, TrackerResult};
use ferry_types::tracker::TrackerStatus;
use serde_json::Value;

use super::{LoadOutcome, Pipeline};
use crate::context::PipelineContext;
use crate::errors::{compute_backoff, store_error, EngineError};
use crate::identity::MappingMode;

/// Accumulates the outcome of one run.
struct RunLog {
    counts: TrackerCounts,
    failures: Vec<Failure>,
}

enum PageOutcome {
    Loaded { seen: u64, imported: u64 },
    Fatal,
}

impl Pipeline {
    /// Drive the tracker in `ctx` to a terminal state.
    ///
    /// A `finished` or `skipped` tracker returns immediately without calling
    /// the extractor. Extraction errors and fatal loader errors fail the
    /// tracker; record-level errors are recorded and the page continues.
    /// The cursor advances only after a page's records have been handled.
    /// The scratch directory is released on every exit path.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error only when the state backend fails.
    pub async fn run(&self, ctx: &mut PipelineContext) -> Result<TrackerResult, EngineError> {
        let result = self.run_tracker(ctx).await;
        ctx.release_scratch();
        result
    }

    async fn run_tracker(&self, ctx: &mut PipelineContext) -> Result<TrackerResult, EngineError> {
        let mut log = RunLog {
            counts: TrackerCounts::default(),
            failures: Vec::new(),
        };

        reload_tracker(ctx)?;
        match ctx.tracker.status {
            status if status.is_done() => {
                tracing::debug!(
                    entity = %ctx.entity.id,
                    pipeline = %self.kind,
                    status = %status,
                    "Tracker already done, nothing to run"
                );
                return Ok(self.result(ctx, log));
            }
            TrackerStatus::Canceled => return Ok(self.result(ctx, log)),
            _ => {}
        }

        let state = Arc::clone(&ctx.run.state);
        if ctx.tracker.pages_exhausted() {
            state.set_tracker_status(ctx.tracker.id, TrackerStatus::Finished)?;
            ctx.tracker.status = TrackerStatus::Finished;
            return Ok(self.result(ctx, log));
        }

        state.set_tracker_status(ctx.tracker.id, TrackerStatus::Started)?;
        ctx.tracker.status = TrackerStatus::Started;
        tracing::info!(
            entity = %ctx.entity.id,
            pipeline = %self.kind,
            cursor = ctx.tracker.cursor(),
            "Pipeline started"
        );

        loop {
            if state
                .get_tracker(ctx.tracker.id)?
                .is_some_and(|t| t.status == TrackerStatus::Canceled)
            {
                ctx.tracker.status = TrackerStatus::Canceled;
                tracing::info!(
                    entity = %ctx.entity.id,
                    pipeline = %self.kind,
                    "Tracker canceled, stopping before next page"
                );
                return Ok(self.result(ctx, log));
            }

            let cursor = ctx.tracker.cursor().map(str::to_owned);
            let page = match self.extract_with_retry(ctx, cursor.as_deref()).await {
                Ok(page) => page,
                Err(EngineError::Migration(err)) => {
                    self.record_failure(ctx, &mut log, self.extractor.step(), &err, None)?;
                    return self.fail(ctx, log);
                }
                Err(err) => return Err(err),
            };

            if page.page_info.has_next_page && page.page_info.next_page.is_none() {
                let err = MigrationError::data(
                    "MISSING_CURSOR",
                    "page reports more data but carries no cursor",
                );
                self.record_failure(ctx, &mut log, self.extractor.step(), &err, None)?;
                return self.fail(ctx, log);
            }

            let has_next_page = page.has_next_page();
            let page_info = page.page_info.clone();
            let (seen, imported) = match self.process_page(ctx, &mut log, page)? {
                PageOutcome::Loaded { seen, imported } => (seen, imported),
                PageOutcome::Fatal => return self.fail(ctx, log),
            };

            ctx.tracker = state.advance_tracker(ctx.tracker.id, &page_info, seen, imported)?;
            tracing::debug!(
                entity = %ctx.entity.id,
                pipeline = %self.kind,
                seen,
                imported,
                has_next_page,
                "Page persisted"
            );

            if !has_next_page {
                break;
            }
        }

        state.set_tracker_status(ctx.tracker.id, TrackerStatus::Finished)?;
        ctx.tracker.status = TrackerStatus::Finished;
        tracing::info!(
            entity = %ctx.entity.id,
            pipeline = %self.kind,
            seen = log.counts.seen,
            imported = log.counts.imported,
            unchanged = log.counts.unchanged,
            failed = log.counts.failed,
            "Pipeline finished"
        );
        Ok(self.result(ctx, log))
    }

    fn process_page(
        &self,
        ctx: &PipelineContext,
        log: &mut RunLog,
        page: ExtractedData,
    ) -> Result<PageOutcome, EngineError> {
        let mut seen = 0_u64;
        let mut imported = 0_u64;

        for record in page.records {
            seen += 1;
            log.counts.seen += 1;
            let key = record_key(&record);

            let transformed = self
                .transformers
                .iter()
                .try_fold(record, |record, transformer| transformer.transform(ctx, record));
            let record = match transformed {
                Ok(record) => record,
                Err(err) => {
                    log.counts.failed += 1;
                    self.record_failure(ctx, log, PipelineStep::Transformer, &err, key)?;
                    continue;
                }
            };

            match self.loader.load(ctx, &record) {
                Ok(outcome) => {
                    if outcome.imported() {
                        imported += 1;
                        log.counts.imported += 1;
                    } else if outcome == LoadOutcome::Unchanged {
                        log.counts.unchanged += 1;
                    }
                    if !record.deferred_users.is_empty() {
                        self.record_placeholders(ctx, log, &record)?;
                    }
                }
                Err(err) if err.aborts_tracker() => {
                    log.counts.failed += 1;
                    self.record_failure(ctx, log, PipelineStep::Loader, &err, key)?;
                    return Ok(PageOutcome::Fatal);
                }
                Err(err) => {
                    log.counts.failed += 1;
                    self.record_failure(ctx, log, PipelineStep::Loader, &err, key)?;
                }
            }
        }

        Ok(PageOutcome::Loaded { seen, imported })
    }

    async fn extract_with_retry(
        &self,
        ctx: &mut PipelineContext,
        cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError> {
        let max_retries = ctx.run.settings.max_retries;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.extractor.extract(ctx, cursor).await {
                Ok(page) => return Ok(page),
                Err(ref err) if err.is_retryable() && attempt <= max_retries => {
                    if let Some(migration_err) = err.as_migration_error() {
                        let delay = compute_backoff(migration_err, attempt);
                        #[allow(clippy::cast_possible_truncation)]
                        let delay_ms = delay.as_millis() as u64;
                        tracing::warn!(
                            pipeline = %self.kind,
                            attempt,
                            max_retries,
                            delay_ms,
                            category = %migration_err.category,
                            code = %migration_err.code,
                            "Retryable error, will retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(
                            pipeline = %self.kind,
                            attempt,
                            max_retries,
                            "Max retries exhausted, failing tracker"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Persist the record's deferred users as placeholder references. The
    /// record is already saved, so problems here are reported as their own
    /// failure and never count the record as failed.
    fn record_placeholders(
        &self,
        ctx: &PipelineContext,
        log: &mut RunLog,
        record: &Record,
    ) -> Result<(), EngineError> {
        let Some((relation, key)) = self.loader.placeholder_slot(record) else {
            let err = MigrationError::data(
                "PLACEHOLDER_SLOT",
                format!(
                    "{} unresolved user reference(s) have no destination record to point at",
                    record.deferred_users.len()
                ),
            );
            return self.record_failure(ctx, log, PipelineStep::Loader, &err, record_key(record));
        };

        let placeholder_user_id = match ctx.run.settings.mapping {
            MappingMode::Placeholders { placeholder_user } => placeholder_user,
            MappingMode::Fallback(_) => None,
        };
        let references: Vec<PlaceholderReference> = record
            .deferred_users
            .iter()
            .map(|deferred| PlaceholderReference {
                entity_id: ctx.entity.id,
                pipeline_kind: self.kind.clone(),
                relation: relation.clone(),
                record_key: key.clone(),
                field: deferred.field.clone(),
                source_user_id: deferred.source_user_id,
                placeholder_user_id,
            })
            .collect();

        match ctx.run.state.insert_placeholder_references(&references) {
            Ok(inserted) => {
                tracing::debug!(
                    pipeline = %self.kind,
                    relation,
                    key,
                    inserted,
                    "Recorded placeholder references"
                );
                Ok(())
            }
            Err(e) => self.record_failure(ctx, log, PipelineStep::Loader, &store_error(&e), Some(key)),
        }
    }

    fn record_failure(
        &self,
        ctx: &PipelineContext,
        log: &mut RunLog,
        step: PipelineStep,
        err: &MigrationError,
        record_key: Option<String>,
    ) -> Result<(), EngineError> {
        let mut failure = NewFailure::from_error(ctx.entity.id, step, err)
            .for_tracker(ctx.tracker.id, self.kind.clone());
        if let Some(key) = record_key {
            failure = failure.with_record_key(key);
        }

        if err.is_security() {
            tracing::error!(
                entity = %ctx.entity.id,
                pipeline = %self.kind,
                step = %step,
                code = %err.code,
                security = true,
                "{}",
                err.summary_message()
            );
        } else {
            tracing::warn!(
                entity = %ctx.entity.id,
                pipeline = %self.kind,
                step = %step,
                record = failure.record_key.as_deref(),
                "{}",
                err.summary_message()
            );
        }

        log.failures.push(ctx.run.state.insert_failure(&failure)?);
        Ok(())
    }

    fn fail(&self, ctx: &mut PipelineContext, log: RunLog) -> Result<TrackerResult, EngineError> {
        ctx.run
            .state
            .set_tracker_status(ctx.tracker.id, TrackerStatus::Failed)?;
        ctx.tracker.status = TrackerStatus::Failed;
        tracing::warn!(
            entity = %ctx.entity.id,
            pipeline = %self.kind,
            cursor = ctx.tracker.cursor(),
            "Pipeline failed"
        );
        Ok(self.result(ctx, log))
    }

    fn result(&self, ctx: &PipelineContext, log: RunLog) -> TrackerResult {
        TrackerResult {
            tracker_id: ctx.tracker.id,
            pipeline_kind: self.kind.clone(),
            status: ctx.tracker.status,
            counts: log.counts,
            failures: log.failures,
        }
    }
}

fn reload_tracker(ctx: &mut PipelineContext) -> Result<(), EngineError> {
    let id = ctx.tracker.id;
    ctx.tracker = ctx
        .run
        .state
        .get_tracker(id)?
        .ok_or_else(|| anyhow!("tracker {id} no longer exists"))?;
    Ok(())
}

/// Identifier of a record for failure attribution.
fn record_key(record: &Record) -> Option<String> {
    if let Some(target) = &record.target {
        return Some(target.key.clone());
    }
    ["iid", "id", "key", "title", "name"]
        .iter()
        .find_map(|field| match record.data.get(*field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_key_prefers_target() {
        let record = Record::new(json!({"iid": 4})).with_target("issues", "9");
        assert_eq!(record_key(&record).as_deref(), Some("9"));
    }

    #[test]
    fn record_key_falls_back_through_fields() {
        assert_eq!(record_key(&Record::new(json!({"iid": 4, "id": 1}))).as_deref(), Some("4"));
        assert_eq!(record_key(&Record::new(json!({"title": "bug"}))).as_deref(), Some("bug"));
        assert_eq!(record_key(&Record::new(json!({"body": "x"}))), None);
    }
}
