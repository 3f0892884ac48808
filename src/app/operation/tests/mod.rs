//! Unit tests for operation lifecycle and the per-frame driver

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::*;

/// Succeeds after a fixed number of updates; never finishes when `steps` is None
struct CountdownOperation {
    core: OperationCore,
    steps: Option<u32>,
    started: u32,
    aborted: Rc<RefCell<Vec<&'static str>>>,
    label: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl CountdownOperation {
    fn new(label: &'static str, steps: Option<u32>) -> Self {
        Self {
            core: OperationCore::new("CountdownOperation"),
            steps,
            started: 0,
            aborted: Rc::new(RefCell::new(Vec::new())),
            label,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn shared(label: &'static str, steps: Option<u32>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(label, steps)))
    }
}

impl Operation for CountdownOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.started += 1;
    }

    fn on_update(&mut self, _ctx: &TickContext) {
        self.log.borrow_mut().push(self.label);
        if let Some(steps) = self.steps.as_mut() {
            *steps = steps.saturating_sub(1);
            if *steps == 0 {
                self.core.succeed();
            }
        }
    }

    fn on_abort(&mut self) {
        self.aborted.borrow_mut().push(self.label);
    }
}

fn quick_wait_context() -> TickContext {
    TickContext::new(Duration::ZERO)
        .with_wait_budget(5)
        .with_wait_poll_interval(Duration::ZERO)
}

#[test]
fn test_start_only_from_none() {
    let mut op = CountdownOperation::new("a", Some(1));
    op.start();
    op.start();
    assert_eq!(op.started, 1);
    assert_eq!(op.status(), OperationStatus::Processing);
}

#[test]
fn test_update_before_start_is_noop() {
    let mut op = CountdownOperation::new("a", Some(1));
    op.update(&TickContext::default());
    assert_eq!(op.status(), OperationStatus::None);
    assert!(op.log.borrow().is_empty());
}

#[test]
fn test_completion_fires_once_with_full_progress() {
    let op = CountdownOperation::shared("a", Some(2));
    let fired = Rc::new(RefCell::new(Vec::new()));
    let sink = fired.clone();
    on_completed(&op, move |outcome| sink.borrow_mut().push(outcome.status));

    let ctx = TickContext::default();
    op.borrow_mut().start();
    for _ in 0..5 {
        op.borrow_mut().update(&ctx);
    }

    assert_eq!(*fired.borrow(), vec![OperationStatus::Succeed]);
    assert_eq!(op.borrow().progress(), 1.0);
    // Polling after completion does not run the step function again
    assert_eq!(op.borrow().log.borrow().len(), 2);
}

#[test]
fn test_callback_added_after_finish_fires_immediately() {
    let op = CountdownOperation::shared("a", Some(1));
    op.borrow_mut().start();
    op.borrow_mut().update(&TickContext::default());

    let fired = Rc::new(RefCell::new(false));
    let sink = fired.clone();
    on_completed(&op, move |_| *sink.borrow_mut() = true);
    assert!(*fired.borrow());
}

#[test]
fn test_terminal_status_is_immutable() {
    let mut core = OperationCore::new("Test");
    core.succeed();
    core.fail("late failure");
    assert_eq!(core.status(), OperationStatus::Succeed);
    assert_eq!(core.error(), "");
}

#[test]
fn test_abort_children_first() {
    let parent = CountdownOperation::shared("parent", None);
    let child = CountdownOperation::shared("child", None);
    let order = Rc::new(RefCell::new(Vec::new()));
    parent.borrow_mut().aborted = order.clone();
    child.borrow_mut().aborted = order.clone();

    child.borrow_mut().start();
    parent.borrow_mut().start();
    let shared_child: SharedOperation = child.clone();
    parent.borrow_mut().core_mut().add_child(shared_child);

    parent.borrow_mut().abort();

    assert_eq!(*order.borrow(), vec!["child", "parent"]);
    assert_eq!(parent.borrow().status(), OperationStatus::Failed);
    assert_eq!(parent.borrow().error(), "user abort");
    assert_eq!(child.borrow().error(), "user abort");
}

#[test]
fn test_abort_after_done_is_noop() {
    let mut op = CountdownOperation::new("a", Some(1));
    op.start();
    op.update(&TickContext::default());
    op.abort();
    assert_eq!(op.status(), OperationStatus::Succeed);
    assert!(op.aborted.borrow().is_empty());
}

#[test]
fn test_wait_for_async_complete_drains() {
    let mut op = CountdownOperation::new("a", Some(3));
    op.wait_for_async_complete(&quick_wait_context());
    assert_eq!(op.status(), OperationStatus::Succeed);
    assert!(op.core().is_wait_for_async_complete());
    assert!(op.core().is_finish());
    assert_eq!(op.started, 1);
}

#[test]
fn test_wait_budget_exhaustion_fails_operation() {
    let mut op = CountdownOperation::new("a", None);
    op.wait_for_async_complete(&quick_wait_context());
    assert_eq!(op.status(), OperationStatus::Failed);
    assert_eq!(
        op.error(),
        "Operation CountdownOperation failed to wait for async complete !"
    );
    assert_eq!(op.log.borrow().len(), 5);
}

#[test]
fn test_reentrant_wait_is_rejected() {
    let op = CountdownOperation::shared("a", None);
    let _guard = op.borrow_mut();
    let result = wait_shared(&op, &quick_wait_context());
    assert!(matches!(
        result,
        Err(crate::errors::OperationError::ReentrantWait { .. })
    ));
}

#[test]
fn test_system_drives_and_drops_finished_operations() {
    let system = OperationSystem::default();
    let op = CountdownOperation::shared("a", Some(2));
    system.start_operation(op.clone());
    assert_eq!(system.operation_count(), 1);

    system.update(Duration::from_millis(16));
    assert!(!op.borrow().is_done());
    system.update(Duration::from_millis(16));
    assert!(op.borrow().is_done());
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn test_system_orders_by_priority() {
    let system = OperationSystem::default();
    let log = Rc::new(RefCell::new(Vec::new()));

    let low = CountdownOperation::shared("low", None);
    let high = CountdownOperation::shared("high", None);
    low.borrow_mut().log = log.clone();
    high.borrow_mut().log = log.clone();
    high.borrow_mut().core_mut().set_priority(10);

    system.start_operation(low);
    system.start_operation(high);
    system.update(Duration::ZERO);

    assert_eq!(*log.borrow(), vec!["high", "low"]);
}

#[test]
fn test_abort_all() {
    let system = OperationSystem::default();
    let op = CountdownOperation::shared("a", None);
    system.start_operation(op.clone());
    system.abort_all();
    assert_eq!(op.borrow().status(), OperationStatus::Failed);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn test_system_callback_may_borrow_its_operation() {
    let system = OperationSystem::default();
    let op = CountdownOperation::shared("a", Some(1));
    let seen = Rc::new(RefCell::new(None));
    let (sink, observed) = (seen.clone(), op.clone());
    on_completed(&op, move |_| {
        let observed = observed.borrow();
        *sink.borrow_mut() = Some((observed.status(), observed.progress()));
    });

    system.start_operation(op.clone());
    system.update(Duration::from_millis(16));
    assert_eq!(*seen.borrow(), Some((OperationStatus::Succeed, 1.0)));
}

#[test]
fn test_shared_wait_callback_may_borrow_its_operation() {
    let op = CountdownOperation::shared("a", Some(2));
    let seen = Rc::new(RefCell::new(None));
    let (sink, observed) = (seen.clone(), op.clone());
    on_completed(&op, move |_| {
        *sink.borrow_mut() = Some(observed.borrow().log.borrow().len());
    });

    wait_shared(&op, &quick_wait_context()).unwrap();
    assert_eq!(*seen.borrow(), Some(2));
}

#[test]
fn test_tick_hands_back_completion() {
    let mut op = CountdownOperation::new("a", Some(1));
    let fired = Rc::new(RefCell::new(false));
    let sink = fired.clone();
    op.core_mut().add_completed(Box::new(move |_| *sink.borrow_mut() = true));
    op.start();

    let completed = op.tick(&TickContext::default()).unwrap();
    assert_eq!(completed.outcome().status, OperationStatus::Succeed);
    assert!(!*fired.borrow());
    completed.deliver();
    assert!(*fired.borrow());
    assert!(op.tick(&TickContext::default()).is_none());
}
