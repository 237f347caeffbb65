//! Delivery capabilities handed to the broker by subscribers.

use std::fmt;
use std::sync::Arc;

/// Something the broker can hand a message to.
///
/// The broker never looks at what the handler does with the message.
pub trait MessageHandler: Send + Sync {
    fn deliver(&self, message: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn deliver(&self, message: &str) {
        self(message)
    }
}

/// A shared, identity-compared subscriber callback.
///
/// Clones refer to the same subscriber; two callbacks built from separate
/// `Callback::new` calls never compare equal, even if they wrap identical
/// closures.
#[derive(Clone)]
pub struct Callback(Arc<dyn MessageHandler>);

impl Callback {
    pub fn new<H>(handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        Self(Arc::new(handler))
    }

    /// Same as `new`, but lets closure argument types be inferred.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn from_arc(handler: Arc<dyn MessageHandler>) -> Self {
        Self(handler)
    }

    pub fn deliver(&self, message: &str) {
        self.0.deliver(message);
    }

    /// Whether both callbacks refer to the same subscriber.
    pub fn same(&self, other: &Callback) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Optional case-sensitive substring constraint on delivered messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(Option<String>);

impl Filter {
    /// `None` admits everything.
    pub fn new(keyword: Option<&str>) -> Self {
        Self(keyword.map(str::to_string))
    }

    pub fn keyword(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn admits(&self, message: &str) -> bool {
        match &self.0 {
            Some(keyword) => message.contains(keyword.as_str()),
            None => true,
        }
    }
}

/// Case-insensitive containment used by keyword search.
pub(crate) fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
