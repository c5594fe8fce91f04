//! Owned, lockable evaluator handle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use papl_core::{EvalError, PaplResult};

use crate::evaluator::PolicyEvaluator;

/// A cached evaluator bound to one path.
///
/// Calls through [`with`](Self::with) are serialized per handle. The
/// evaluator is released exactly once: on the first [`release`](Self::release)
/// or on drop, whichever comes first.
pub struct EvaluatorHandle<E: PolicyEvaluator> {
    path: String,
    inner: Mutex<Option<E>>,
}

impl<E: PolicyEvaluator> EvaluatorHandle<E> {
    pub fn new(path: impl Into<String>, evaluator: E) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Some(evaluator)),
        }
    }

    /// Path whose policy this evaluator was built from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Released`] if the handle was already released,
    /// otherwise whatever `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&mut E) -> PaplResult<R>) -> PaplResult<R> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(evaluator) => f(evaluator),
            None => Err(EvalError::Released.into()),
        }
    }

    /// Release the evaluator. Waits for an in-flight call to finish.
    ///
    /// Returns false if it was already released.
    pub fn release(&self) -> bool {
        match self.lock().take() {
            Some(mut evaluator) => {
                evaluator.release();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }
}

impl<E: PolicyEvaluator> Drop for EvaluatorHandle<E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<E: PolicyEvaluator> std::fmt::Debug for EvaluatorHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorHandle")
            .field("path", &self.path)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use papl_core::PaplError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        releases: Arc<AtomicUsize>,
    }

    impl PolicyEvaluator for Counting {
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle() -> (EvaluatorHandle<Counting>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let evaluator = Counting {
            releases: Arc::clone(&releases),
        };
        (EvaluatorHandle::new("a/b/", evaluator), releases)
    }

    #[test]
    fn test_release_is_idempotent() {
        let (handle, releases) = handle();
        assert!(handle.release());
        assert!(!handle.release());
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let (handle, releases) = handle();
        assert_eq!(handle.path(), "a/b/");
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_after_release_fails() {
        let (handle, _) = handle();
        assert!(handle.with(|_| Ok(())).is_ok());
        handle.release();
        assert!(handle.is_released());
        assert!(matches!(
            handle.with(|_| Ok(())),
            Err(PaplError::Eval(EvalError::Released))
        ));
    }
}
