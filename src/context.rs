//! Request context: which tenant ("realm") the current task works for.
//!
//! The context is task-local. Code running outside any `scope` sees the
//! default realm.

use std::future::Future;

use crate::config::DEFAULT_REALM;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub realm: String,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_REALM)
    }
}

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` as the current request context.
pub async fn scope<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    tracing::debug!(realm = %ctx.realm, request_id = ?ctx.request_id, "Entering request scope");
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// The current request context, or the default one outside any scope.
pub fn current() -> RequestContext {
    REQUEST_CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

/// The current realm.
pub fn current_realm() -> String {
    REQUEST_CONTEXT
        .try_with(|ctx| ctx.realm.clone())
        .unwrap_or_else(|_| DEFAULT_REALM.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_realm_outside_scope() {
        assert_eq!(current_realm(), "default");
        assert_eq!(current().request_id, None);
    }

    #[tokio::test]
    async fn scope_sets_realm() {
        let realm = scope(RequestContext::new("acme").with_request_id("r-1"), async {
            assert_eq!(current().request_id.as_deref(), Some("r-1"));
            current_realm()
        })
        .await;
        assert_eq!(realm, "acme");
        assert_eq!(current_realm(), "default");
    }
}
