use std::sync::Arc;

use starry_core::{CaptureError, WindowTarget};
use tracing::debug;

use crate::CaptureBackend;

/// Read-only view over the windows a backend can capture.
#[derive(Clone)]
pub struct WindowRegistry {
    backend: Arc<dyn CaptureBackend>,
}

impl WindowRegistry {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    /// Snapshot of the capturable windows at call time.
    pub fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError> {
        self.backend.list_windows()
    }

    /// Resolve a display name to a live window.
    ///
    /// Only an exact title match counts; when several windows share the title the
    /// first one in enumeration order wins.
    pub fn resolve(&self, display_name: &str) -> Result<WindowTarget, CaptureError> {
        let found = self
            .list_windows()?
            .into_iter()
            .find(|w| w.display_name == display_name);

        match found {
            Some(target) => {
                debug!("Resolved {:?} to {}", display_name, target.handle);
                Ok(target)
            }
            None => Err(CaptureError::TargetNotFound { name: display_name.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn resolve_requires_exact_title() {
        let backend = MemoryBackend::new();
        backend.add_window("Calculator");
        let registry = WindowRegistry::new(Arc::new(backend));

        let err = registry.resolve("Calc").unwrap_err();
        assert_eq!(err, CaptureError::TargetNotFound { name: "Calc".into() });
        assert_eq!(registry.resolve("Calculator").unwrap().display_name, "Calculator");
    }

    #[test]
    fn resolve_picks_first_duplicate() {
        let backend = MemoryBackend::new();
        let first = backend.add_window("Untitled");
        backend.add_window("Untitled");
        let registry = WindowRegistry::new(Arc::new(backend));

        assert_eq!(registry.resolve("Untitled").unwrap(), first.target());
    }

    #[test]
    fn closed_window_is_not_listed() {
        let backend = MemoryBackend::new();
        let window = backend.add_window("Notepad");
        let registry = WindowRegistry::new(Arc::new(backend));

        window.close();
        assert!(matches!(
            registry.resolve("Notepad"),
            Err(CaptureError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn enumeration_failure_is_not_reported_as_missing_window() {
        let backend = MemoryBackend::new();
        backend.add_window("Calculator");
        backend.fail_listing(Some("access denied".into()));
        let registry = WindowRegistry::new(Arc::new(backend.clone()));

        let err = registry.resolve("Calculator").unwrap_err();
        assert_eq!(err, CaptureError::Enumeration { reason: "access denied".into() });
        assert!(registry.list_windows().is_err());

        backend.fail_listing(None);
        assert!(registry.resolve("Calculator").is_ok());
    }
}
