use std::future::Future;

use crate::error::AppError;
use crate::models::{AcquisitionOutcome, AcquisitionRequest, CandidateItem};

/// Produces the candidate items for one pass, in feed order.
pub trait FeedSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<CandidateItem>, AppError>> + Send;
}

/// Accepts a matched item and reports which outcome category it fell into.
///
/// Implementations must be safe to call again with the same request: the
/// retrying client may repeat a call whose response was lost.
pub trait AcquisitionSink: Send + Sync {
    fn dispatch(
        &self,
        request: &AcquisitionRequest,
    ) -> impl Future<Output = Result<AcquisitionOutcome, AppError>> + Send;
}

/// Receives items the pipeline classified as `invalid`, for later review.
pub trait InvalidItemRecorder: Send + Sync {
    fn record(&self, title: &str, external_id: Option<&str>) -> Result<(), AppError>;
}
