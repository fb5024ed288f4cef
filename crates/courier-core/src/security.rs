// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ambient principal propagation.
//!
//! The principal is a plain string carried on calls and exposed to the
//! invoked method for the duration of its invocation scope. It is never
//! validated here. Tasks spawned inside a scope do not inherit it.

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static CURRENT_PRINCIPAL: RefCell<Option<String>>;
}

/// Run `fut` with `principal` as the ambient principal.
pub async fn scope<F: Future>(principal: Option<String>, fut: F) -> F::Output {
    CURRENT_PRINCIPAL.scope(RefCell::new(principal), fut).await
}

/// The ambient principal, `None` outside a scope.
pub fn current_principal() -> Option<String> {
    CURRENT_PRINCIPAL
        .try_with(|p| p.borrow().clone())
        .ok()
        .flatten()
}

/// Replace the ambient principal. Returns `false` outside a scope.
pub fn set_current_principal(principal: impl Into<String>) -> bool {
    let principal = principal.into();
    CURRENT_PRINCIPAL
        .try_with(|p| *p.borrow_mut() = Some(principal))
        .is_ok()
}

/// Clear the ambient principal for the rest of the scope.
pub fn clear_current_principal() {
    let _ = CURRENT_PRINCIPAL.try_with(|p| *p.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_principal_is_scoped() {
        assert_eq!(current_principal(), None);

        let inside = scope(Some("alice".to_string()), async { current_principal() }).await;
        assert_eq!(inside, Some("alice".to_string()));

        assert_eq!(current_principal(), None);
    }

    #[tokio::test]
    async fn test_set_and_clear_inside_scope() {
        scope(None, async {
            assert!(set_current_principal("bob"));
            assert_eq!(current_principal().as_deref(), Some("bob"));
            clear_current_principal();
            assert_eq!(current_principal(), None);
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_outside_scope_is_ignored() {
        assert!(!set_current_principal("eve"));
        assert_eq!(current_principal(), None);
    }

    #[tokio::test]
    async fn test_scopes_do_not_leak_between_tasks() {
        let a = tokio::spawn(scope(Some("a".to_string()), async {
            tokio::task::yield_now().await;
            current_principal()
        }));
        let b = tokio::spawn(scope(Some("b".to_string()), async {
            tokio::task::yield_now().await;
            current_principal()
        }));
        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }
}
