use std::fmt;
use std::sync::Arc;

use crate::retry::RetryPolicy;

/// Per-call settings for [`Client::get_with`](super::Client::get_with) and
/// [`Client::iter_with`](super::Client::iter_with).
///
/// The default sends to the transport's default endpoint with the
/// session policy and retries enabled.
#[derive(Clone)]
pub struct CallOptions {
    /// Endpoint path, resolved against the API URL by the transport.
    pub endpoint: Option<Arc<str>>,
    /// Policy used instead of the session's.
    pub policy: Option<Arc<dyn RetryPolicy>>,
    /// When false, the first failure of any kind is final.
    pub retries: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            policy: None,
            retries: true,
        }
    }
}

impl CallOptions {
    pub fn endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn policy(self, policy: impl RetryPolicy + 'static) -> Self {
        self.shared_policy(Arc::new(policy))
    }

    pub fn shared_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Send each query once; failures are not retried.
    pub fn no_retries(mut self) -> Self {
        self.retries = false;
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy.as_ref().map(|_| "custom"))
            .field("retries", &self.retries)
            .finish()
    }
}
