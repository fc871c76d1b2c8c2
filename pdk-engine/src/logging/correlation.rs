// Correlation Scopes
// Nested save/restore identifiers tagging all log and progress events

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

static STACK: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Generate a fresh correlation identifier: `pdk-YYYYMMDD-16hex`.
pub fn new_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    let hex = Uuid::new_v4().simple().to_string();
    format!("pdk-{}-{}", date, &hex[..16])
}

/// The innermost correlation identifier, if any scope is active.
pub fn current() -> Option<String> {
    STACK.lock().last().cloned()
}

/// RAII guard binding a correlation identifier to the current logical scope.
///
/// Dropping the scope restores the previous identifier; after the outermost
/// scope exits, [`current`] returns `None`. Each scope removes exactly its
/// own identifier, so concurrently open scopes cannot unbalance each other.
pub struct CorrelationScope {
    id: String,
}

impl CorrelationScope {
    /// Enter a scope with a freshly generated identifier.
    pub fn enter() -> Self {
        Self::enter_with(new_id())
    }

    /// Enter a scope with a caller-provided identifier.
    pub fn enter_with(id: impl Into<String>) -> Self {
        let id = id.into();
        STACK.lock().push(id.clone());
        Self { id }
    }

    /// The identifier this scope established.
    pub fn id(&self) -> String {
        self.id.clone()
    }
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        let mut stack = STACK.lock();
        if let Some(position) = stack.iter().rposition(|id| *id == self.id) {
            stack.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_id_format() {
        let re = Regex::new(r"^pdk-\d{8}-[a-f0-9]{16}$").unwrap();
        for _ in 0..16 {
            let id = new_id();
            assert!(re.is_match(&id), "bad correlation id: {}", id);
        }
    }

    fn stack_contains(id: &str) -> bool {
        STACK.lock().iter().any(|entry| entry == id)
    }

    #[test]
    fn test_nested_scopes_restore_outer() {
        let outer = CorrelationScope::enter_with("pdk-20260801-aaaaaaaaaaaaaaaa");
        {
            let inner = CorrelationScope::enter_with("pdk-20260801-bbbbbbbbbbbbbbbb");
            assert!(stack_contains(&inner.id()));
            assert!(stack_contains(&outer.id()));
        }
        // Inner gone, outer restored.
        assert!(!stack_contains("pdk-20260801-bbbbbbbbbbbbbbbb"));
        assert!(stack_contains(&outer.id()));
        drop(outer);
        assert!(!stack_contains("pdk-20260801-aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn test_scope_id_matches_generated_format() {
        let re = Regex::new(r"^pdk-\d{8}-[a-f0-9]{16}$").unwrap();
        let scope = CorrelationScope::enter();
        assert!(re.is_match(&scope.id()));
    }
}
