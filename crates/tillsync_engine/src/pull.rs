//! Pull: fetching remote records after the local watermark.

use crate::apply::RemoteApplier;
use crate::engine::{PassTally, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::retry::with_retry;
use crate::shutdown::CancelSignal;
use crate::transport::RemoteAuthority;
use tillsync_protocol::PullRequest;
use tracing::debug;

impl<R: RemoteAuthority> SyncEngine<R> {
    /// Pulls pages until the remote reports nothing more.
    ///
    /// Each page is applied and the watermark advanced in the same commit,
    /// so an interrupted pull resumes after the last applied page.
    pub(crate) async fn pull_remote(
        &self,
        cancel: &CancelSignal,
        tally: &mut PassTally,
    ) -> SyncResult<()> {
        let applier = RemoteApplier::new(
            self.store(),
            self.resolver().as_ref(),
            &self.config().device_priority,
        );
        let device = self.store().device_id().clone();
        let limit = self.config().pull_batch_size.max(1);

        loop {
            let since = self.store().latest_remote_watermark();
            let request = PullRequest::new(device.clone(), since, limit);

            let remote = self.remote();
            let req = &request;
            let page = with_retry(
                &self.config().retry,
                self.config().timeout,
                cancel,
                "pull",
                &mut tally.retries,
                move || remote.pull(req),
            )
            .await?;

            let summary = applier.apply_page(&page.records, page.watermark)?;
            debug!(
                since,
                watermark = page.watermark,
                records = page.records.len(),
                applied = summary.applied,
                stale = summary.stale,
                conflicted = summary.conflicted,
                "pulled page"
            );
            tally.pulled += page.records.len() as u64;
            tally.conflicted += summary.conflicted;

            if !page.has_more {
                return Ok(());
            }
            if self.store().latest_remote_watermark() <= since {
                return Err(SyncError::Protocol(format!(
                    "remote reported more records but did not advance past {since}"
                )));
            }
        }
    }
}
