//! The error sink: the single place pipeline errors are reported.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::PipelineError;

/// Log every error received on `errors` until the channel closes.
///
/// The task resolves to the number of errors reported.
pub fn spawn_error_sink(mut errors: mpsc::Receiver<PipelineError>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut reported = 0;
        while let Some(err) = errors.recv().await {
            error!("{err}");
            reported += 1;
        }
        debug!("Error sink closed after {reported} errors");
        reported
    })
}
