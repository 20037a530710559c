use std::sync::Arc;

use crate::hash::HashStrategy;
use crate::observer::TransferObserver;

#[derive(Clone)]
pub struct ExtractOptions {
    pub password: Option<String>,
    /// Record per-item codec failures. When off, failed items are silently
    /// dropped from the report.
    pub report_errors: bool,
    pub preserve_times: bool,
    pub preserve_attributes: bool,
    pub hash_strategy: HashStrategy,
    pub observer: Option<Arc<dyn TransferObserver>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            password: None,
            report_errors: true,
            preserve_times: true,
            preserve_attributes: true,
            hash_strategy: HashStrategy::None,
            observer: None,
        }
    }
}

impl ExtractOptions {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn report_errors(mut self, report: bool) -> Self {
        self.report_errors = report;
        self
    }

    pub fn preserve_times(mut self, preserve: bool) -> Self {
        self.preserve_times = preserve;
        self
    }

    pub fn preserve_attributes(mut self, preserve: bool) -> Self {
        self.preserve_attributes = preserve;
        self
    }

    pub fn hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.hash_strategy = strategy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[derive(Clone, Default)]
pub struct UpdateOptions {
    pub password: Option<String>,
    /// Suppress per-item "started" events.
    pub fast_mode: bool,
    /// Keep source streams open until the update finishes, for formats whose
    /// engine reads them again after reporting the item result.
    pub defer_disposal: bool,
    pub observer: Option<Arc<dyn TransferObserver>>,
}

impl UpdateOptions {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn fast_mode(mut self, fast: bool) -> Self {
        self.fast_mode = fast;
        self
    }

    pub fn defer_disposal(mut self, defer: bool) -> Self {
        self.defer_disposal = defer;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}
