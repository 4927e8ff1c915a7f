//! Thread-based wiring between the task registry and the long-running
//! export/build operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::XdbError;
use crate::export::{self, ExportOptions};
use crate::maker::Maker;
use crate::searcher::Searcher;
use crate::task::{TaskHandle, TaskRegistry};

pub const BUILD_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Spawns the export sweep on a background thread, reporting progress and
/// honoring cancellation through `registry`. Returns immediately with the
/// handle the caller polls.
pub fn spawn_export_task(
    registry: &Arc<TaskRegistry>,
    id: impl Into<String>,
    searcher: Arc<Searcher>,
    opts: ExportOptions,
    dst: PathBuf,
) -> TaskHandle {
    let handle = registry.create(id);
    let worker_handle = handle.clone();

    std::thread::spawn(move || {
        worker_handle.set_processing();
        let progress_handle = worker_handle.clone();
        let cancel_handle = worker_handle.clone();

        let result = export::export_to_file(
            &searcher,
            opts,
            &dst,
            move |done, total| progress_handle.set_progress(done, total),
            move || cancel_handle.is_cancelled(),
        );

        match result {
            Ok(_) => worker_handle.set_completed(),
            Err(XdbError::Cancelled) => worker_handle.set_cancelled(),
            Err(e) => {
                error!(error = %e, "export task failed");
                worker_handle.set_failed(e.to_string());
            }
        }
    });

    handle
}

/// Spawns an XDB build on a background thread. A watchdog thread enforces
/// `BUILD_DEADLINE`: Maker has no cooperative cancellation point mid-build,
/// so a deadline overrun marks the task `Failed` with `DeadlineExceeded`
/// even though the build thread itself keeps running to completion.
pub fn spawn_build_task(
    registry: &Arc<TaskRegistry>,
    id: impl Into<String>,
    src: PathBuf,
    dst: PathBuf,
) -> TaskHandle {
    let handle = registry.create(id);
    let worker_handle = handle.clone();
    let watchdog_handle = handle.clone();

    std::thread::spawn(move || {
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watchdog_done = done.clone();
        std::thread::spawn(move || {
            std::thread::sleep(BUILD_DEADLINE);
            if !watchdog_done.load(std::sync::atomic::Ordering::Acquire) {
                warn!(task = watchdog_handle.id(), "build exceeded its deadline");
                watchdog_handle.set_failed(XdbError::DeadlineExceeded.to_string());
            }
        });

        worker_handle.set_processing();
        let result = (|| -> Result<(), XdbError> {
            let mut maker = Maker::new(&src, &dst);
            maker.init()?;
            worker_handle.set_progress(0, maker.segments_count() as u64);
            maker.start()?;
            worker_handle.set_progress(maker.segments_count() as u64, maker.segments_count() as u64);
            maker.finish()
        })();

        done.store(true, std::sync::atomic::Ordering::Release);
        match result {
            Ok(()) => worker_handle.set_completed(),
            Err(e) => {
                error!(error = %e, "build task failed");
                worker_handle.set_failed(e.to_string());
            }
        }
    });

    handle
}
