use std::sync::{Mutex, OnceLock};

type ProgressFn = Box<dyn Fn(u64, u64) + Send + 'static>;

static DOWNLOAD_PROGRESS_CB: OnceLock<Mutex<Option<ProgressFn>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<ProgressFn>> {
    DOWNLOAD_PROGRESS_CB.get_or_init(|| Mutex::new(None))
}

/// Installs (or replaces) the callback that receives `(downloaded, total)`
/// byte counts while model artifacts are fetched.
pub fn set_download_progress_callback(cb: impl Fn(u64, u64) + Send + 'static) {
    if let Ok(mut g) = slot().lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn emit_download_progress(done: u64, total: u64) {
    if let Ok(g) = slot().lock() {
        if let Some(cb) = &*g {
            cb(done, total);
        }
    }
}
