use anyhow::Result;
use tracing::{debug, error};

type Action<C> = Box<dyn FnOnce(&C) -> Result<()>>;

/// Release actions pushed in acquisition order and run in reverse.
///
/// Unwinding never stops early: a failing action is reported and the ones
/// registered before it still run.
pub struct CleanupStack<C> {
    actions: Vec<(String, Action<C>)>,
}

/// A release action that failed during unwinding.
#[derive(Debug)]
pub struct CleanupError {
    pub label: String,
    pub error: anyhow::Error,
}

impl std::fmt::Display for CleanupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cleanup '{}' failed: {:#}", self.label, self.error)
    }
}

impl<C> Default for CleanupStack<C> {
    fn default() -> Self {
        Self { actions: Vec::new() }
    }
}

impl<C> CleanupStack<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce(&C) -> Result<()> + 'static,
    {
        let label = label.into();
        debug!("Registered cleanup: {}", label);
        self.actions.push((label, Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, last registered first.
    pub fn unwind(self, ctx: &C) -> Vec<CleanupError> {
        let mut failures = Vec::new();

        for (label, action) in self.actions.into_iter().rev() {
            debug!("Running cleanup: {}", label);
            if let Err(e) = action(ctx) {
                let failure = CleanupError { label, error: e };
                error!("{}", failure);
                failures.push(failure);
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_unwind_runs_in_reverse_order() {
        let log = RefCell::new(Vec::new());
        let mut stack: CleanupStack<RefCell<Vec<&'static str>>> = CleanupStack::new();

        stack.push("disk", |log: &RefCell<Vec<&'static str>>| {
            log.borrow_mut().push("disk");
            Ok(())
        });
        stack.push("mappers", |log: &RefCell<Vec<&'static str>>| {
            log.borrow_mut().push("mappers");
            Ok(())
        });
        stack.push("mount", |log: &RefCell<Vec<&'static str>>| {
            log.borrow_mut().push("mount");
            Ok(())
        });
        assert_eq!(stack.len(), 3);

        let failures = stack.unwind(&log);
        assert!(failures.is_empty());
        assert_eq!(*log.borrow(), vec!["mount", "mappers", "disk"]);
    }

    #[test]
    fn test_failed_action_does_not_stop_unwinding() {
        let log = RefCell::new(Vec::new());
        let mut stack: CleanupStack<RefCell<Vec<&'static str>>> = CleanupStack::new();

        stack.push("detach", |log: &RefCell<Vec<&'static str>>| {
            log.borrow_mut().push("detach");
            Ok(())
        });
        stack.push("umount", |_: &RefCell<Vec<&'static str>>| {
            Err(anyhow::anyhow!("target is busy"))
        });

        let failures = stack.unwind(&log);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].label, "umount");
        assert_eq!(
            failures[0].to_string(),
            "cleanup 'umount' failed: target is busy"
        );
        assert_eq!(*log.borrow(), vec!["detach"]);
    }

    #[test]
    fn test_empty_stack() {
        let stack: CleanupStack<()> = CleanupStack::default();
        assert!(stack.is_empty());
        assert!(stack.unwind(&()).is_empty());
    }
}
