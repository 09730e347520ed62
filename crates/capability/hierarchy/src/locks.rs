//! 子树锁：同一租户内，作用于重叠子树的变更串行执行，不相交子树可并发。

use crate::snapshot::ClosureSnapshot;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
pub struct SubtreeLocks {
    held: Mutex<Vec<String>>,
    released: Notify,
}

/// 持有期间对应子树根被锁定，析构时释放。
pub struct SubtreeGuard<'a> {
    locks: &'a SubtreeLocks,
    roots: Vec<String>,
}

impl SubtreeLocks {
    /// 等待直到 `roots` 与已持有的子树根互不为祖先/后代，然后锁定。
    ///
    /// 祖先关系由 `snapshot` 在每次尝试时重新读取。
    pub async fn acquire<F>(&self, mut roots: Vec<String>, snapshot: F) -> SubtreeGuard<'_>
    where
        F: Fn() -> std::sync::Arc<ClosureSnapshot>,
    {
        roots.sort();
        roots.dedup();
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let current = snapshot();
                let mut held = match self.held.lock() {
                    Ok(held) => held,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let conflict = roots.iter().any(|root| {
                    held.iter().any(|other| {
                        current.is_ancestor_or_self(other, root)
                            || current.is_ancestor_or_self(root, other)
                    })
                });
                if !conflict {
                    held.extend(roots.iter().cloned());
                    return SubtreeGuard { locks: self, roots };
                }
            }
            notified.await;
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|held| held.len()).unwrap_or(0)
    }
}

impl Drop for SubtreeGuard<'_> {
    fn drop(&mut self) {
        let mut held = match self.locks.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        for root in &self.roots {
            if let Some(position) = held.iter().position(|item| item == root) {
                held.swap_remove(position);
            }
        }
        drop(held);
        self.locks.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot() -> Arc<ClosureSnapshot> {
        let mut snapshot = ClosureSnapshot::default();
        for (node, parent) in [("A", None), ("B", Some("A")), ("C", Some("B")), ("D", Some("A"))] {
            let delta = snapshot.plan_add("t", node, parent).expect("add");
            snapshot.apply(&delta);
        }
        Arc::new(snapshot)
    }

    #[tokio::test]
    async fn disjoint_subtrees_lock_concurrently() {
        let locks = SubtreeLocks::default();
        let snap = snapshot();
        let _c = locks.acquire(vec!["C".to_string()], || snap.clone()).await;
        let _d = locks.acquire(vec!["D".to_string()], || snap.clone()).await;
        assert_eq!(locks.held_count(), 2);
    }

    #[tokio::test]
    async fn overlapping_subtree_waits_for_release() {
        let locks = Arc::new(SubtreeLocks::default());
        let snap = snapshot();
        let guard = locks.acquire(vec!["B".to_string()], || snap.clone()).await;

        let waiter_locks = locks.clone();
        let waiter_snap = snap.clone();
        let waiter = tokio::spawn(async move {
            let _guard = waiter_locks
                .acquire(vec!["C".to_string()], || waiter_snap.clone())
                .await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("join");
        assert_eq!(locks.held_count(), 0);
    }
}
