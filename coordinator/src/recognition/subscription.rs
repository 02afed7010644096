//! Owned event-handler registrations
//!
//! A [`Subscription`] keeps a handler registered with a recognizer until it
//! is released or dropped. Releasing happens at most once.

pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the action that unregisters the handler
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.release.is_some())
            .finish()
    }
}

/// The quality-degradation and result registrations of one recognizer
#[derive(Debug)]
pub(crate) struct SubscriptionPair {
    quality: Subscription,
    results: Subscription,
}

impl SubscriptionPair {
    pub(crate) fn new(quality: Subscription, results: Subscription) -> Self {
        Self { quality, results }
    }

    pub(crate) fn release(self) {
        self.quality.release();
        self.results.release();
    }
}
