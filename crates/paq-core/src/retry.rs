//! Requeue policy for transiently failed items.

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the item back at the tail of its queue.
    Requeue,
    /// Give up; the item becomes a terminal failure.
    Fail,
}

/// Bounded retry counting. Only failures the method explicitly marked
/// `Transient: true` are ever requeued; integrity failures and hard errors
/// are terminal by definition.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum requeues per item (0 = never retry).
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// `retries` is the number of requeues the item has already consumed.
    pub fn decide(&self, transient: bool, retries: u32) -> RetryDecision {
        if transient && retries < self.max_retries {
            RetryDecision::Requeue
        } else {
            RetryDecision::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_transient_never_retries() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(false, 0), RetryDecision::Fail);
    }

    #[test]
    fn transient_retries_until_budget_spent() {
        let p = RetryPolicy::new(2);
        assert_eq!(p.decide(true, 0), RetryDecision::Requeue);
        assert_eq!(p.decide(true, 1), RetryDecision::Requeue);
        assert_eq!(p.decide(true, 2), RetryDecision::Fail);
    }

    #[test]
    fn zero_budget_disables_retry() {
        let p = RetryPolicy::new(0);
        assert_eq!(p.decide(true, 0), RetryDecision::Fail);
    }
}
