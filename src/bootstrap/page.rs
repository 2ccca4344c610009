//! In-process page host.
//!
//! Stands in for a browser document: appending the interceptor script
//! installs the [`FetchInterceptor`] into the page's fetch slot.

use parking_lot::Mutex;
use std::collections::HashSet;

use super::{BootstrapError, InjectionTarget, ModuleScript, PageHost};
use crate::interceptor::FetchInterceptor;

pub struct InProcessPage {
    hostname: String,
    targets: HashSet<InjectionTarget>,
    dom_ready: bool,
    interceptor: Option<FetchInterceptor>,
    scripts: Mutex<Vec<(InjectionTarget, ModuleScript)>>,
}

impl InProcessPage {
    /// A page with all three injection targets present.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            targets: InjectionTarget::PREFERENCE.into_iter().collect(),
            dom_ready: false,
            interceptor: None,
            scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_targets(mut self, targets: &[InjectionTarget]) -> Self {
        self.targets = targets.iter().copied().collect();
        self
    }

    pub fn with_dom_ready(mut self, ready: bool) -> Self {
        self.dom_ready = ready;
        self
    }

    pub fn with_interceptor(mut self, interceptor: FetchInterceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn interceptor(&self) -> Option<&FetchInterceptor> {
        self.interceptor.as_ref()
    }

    /// Scripts appended so far, in order.
    pub fn scripts(&self) -> Vec<(InjectionTarget, ModuleScript)> {
        self.scripts.lock().clone()
    }
}

impl PageHost for InProcessPage {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn has_target(&self, target: InjectionTarget) -> bool {
        self.targets.contains(&target)
    }

    fn append_script(
        &self,
        target: InjectionTarget,
        script: &ModuleScript,
    ) -> Result<(), BootstrapError> {
        if !self.has_target(target) {
            return Err(BootstrapError::Injection {
                target,
                reason: "element not present".to_string(),
            });
        }

        self.scripts.lock().push((target, script.clone()));

        if script.is_interceptor() {
            match &self.interceptor {
                Some(interceptor) => {
                    interceptor.install();
                }
                None => tracing::debug!("No interceptor attached to page {}", self.hostname),
            }
        }
        Ok(())
    }

    fn is_dom_ready(&self) -> bool {
        self.dom_ready
    }
}
