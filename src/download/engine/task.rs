use tracing::{debug, info, instrument, warn};

use super::error_mapping::classify_error_class;
use super::escalation::{EscalationRun, Tier};
use super::persistence::persist_bytes;
use super::{BatchContext, Task, TaskSource};
use crate::download::filename::parse_data_uri;
use crate::download::{DownloadOutcome, TaskResult};

/// Runs one task to its terminal outcome.
///
/// Never fails: every error is folded into a failed [`DownloadOutcome`].
#[instrument(skip(ctx, task), fields(index = task.index))]
pub(super) async fn process_task(ctx: &BatchContext, task: &Task) -> DownloadOutcome {
    let outcome = match &task.source {
        TaskSource::Inline => process_inline(ctx, task).await,
        TaskSource::Remote { origin } => process_remote(ctx, task, origin).await,
    };

    match &outcome.result {
        TaskResult::Success { tier, bytes, path } => info!(
            url = %truncate_for_log(&task.url),
            tier = %tier,
            bytes,
            attempts = outcome.attempts,
            path = %path.display(),
            "asset saved"
        ),
        TaskResult::Failed { class, message } => warn!(
            url = %truncate_for_log(&task.url),
            class = %class,
            attempts = outcome.attempts,
            error = %message,
            "asset failed"
        ),
    }
    outcome
}

/// Decodes an inline data URI and writes it without touching the network.
async fn process_inline(ctx: &BatchContext, task: &Task) -> DownloadOutcome {
    let image = match parse_data_uri(&task.url) {
        Ok(image) => image,
        Err(error) => {
            return DownloadOutcome::failed(
                task.index,
                task.url.clone(),
                0,
                classify_error_class(&error),
                error.to_string(),
            );
        }
    };

    debug!(format = %image.format, bytes = image.bytes.len(), "decoded inline image");
    let path = ctx.output_path(task.index, &image.extension());
    match persist_bytes(
        &image.bytes,
        &path,
        &task.url,
        ctx.options.inline_min_file_size,
    )
    .await
    {
        Ok(saved) => DownloadOutcome::success(
            task.index,
            task.url.clone(),
            0,
            Tier::Direct,
            saved.bytes,
            saved.path,
        ),
        Err(error) => DownloadOutcome::failed(
            task.index,
            task.url.clone(),
            0,
            classify_error_class(&error),
            error.to_string(),
        ),
    }
}

async fn process_remote(ctx: &BatchContext, task: &Task, origin: &str) -> DownloadOutcome {
    let mut run = EscalationRun::new(ctx, task.index, &task.url, origin);
    let result = run.run().await;
    let attempts = run.attempts();

    match result {
        Ok((tier, saved)) => DownloadOutcome::success(
            task.index,
            task.url.clone(),
            attempts,
            tier,
            saved.bytes,
            saved.path,
        ),
        Err(error) => DownloadOutcome::failed(
            task.index,
            task.url.clone(),
            attempts,
            classify_error_class(&error),
            error.to_string(),
        ),
    }
}

/// Inline URIs can be megabytes long; keep log lines readable.
fn truncate_for_log(url: &str) -> &str {
    const MAX_LOGGED_URL: usize = 120;
    if url.len() <= MAX_LOGGED_URL {
        return url;
    }
    let mut end = MAX_LOGGED_URL;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    &url[..end]
}
