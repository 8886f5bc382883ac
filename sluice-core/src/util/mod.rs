use std::{
    any::Any,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    path::Path,
};

use tracing::warn;

use crate::AnyResult;

pub const FALLBACK_PARALLELISM: NonZeroUsize = match NonZeroUsize::new(1) {
    Some(n) => n,
    None => unreachable!(),
};

pub fn max_parallel_count() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(FALLBACK_PARALLELISM)
}

/// Resolves a configured thread count.
///
/// Positive values are used as is. Zero means one thread per available
/// processor, a negative value `-n` means `available processors - n`. The
/// result is never below one.
pub fn resolve_thread_count(configured: i32) -> usize {
    resolve_thread_count_with(configured, max_parallel_count())
}

fn resolve_thread_count_with(configured: i32, processors: NonZeroUsize) -> usize {
    if configured > 0 {
        return configured as usize;
    }
    let resolved = processors.get() as i64 + configured as i64;
    resolved.max(1) as usize
}

pub fn file_read_sync(path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs one periodic step, logging (never propagating) an error or a panic.
pub(crate) fn isolate(step: &str, owner: &dyn std::fmt::Display, f: impl FnOnce() -> AnyResult<()>) {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("background processing of {step} failed for {owner}: {e:?}"),
        Err(payload) => warn!(
            "background processing of {step} panicked for {owner}: {}",
            panic_message(payload.as_ref())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpus(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_resolve_thread_count() {
        assert_eq!(resolve_thread_count_with(3, cpus(8)), 3);
        assert_eq!(resolve_thread_count_with(0, cpus(8)), 8);
        assert_eq!(resolve_thread_count_with(-2, cpus(8)), 6);
        assert_eq!(resolve_thread_count_with(-8, cpus(8)), 1);
        assert_eq!(resolve_thread_count_with(-100, cpus(4)), 1);
        assert!(resolve_thread_count(0) >= 1);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }
}
