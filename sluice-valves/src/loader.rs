use std::cell::RefCell;

use sluice_core::container::Loader;
use tracing::trace;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Name of the innermost context bound on this thread.
pub fn current_context() -> Option<String> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Marks the current thread as working on behalf of one context.
///
/// Bindings nest; unbinding restores the previously bound context.
#[derive(Debug, Clone)]
pub struct ContextLoader {
    context: String,
}

impl ContextLoader {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

impl Loader for ContextLoader {
    fn bind(&self) {
        trace!("binding context {}", self.context);
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.context.clone()));
    }

    fn unbind(&self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last() {
                Some(top) if *top == self.context => {
                    stack.pop();
                }
                _ => trace!("context {} was not bound", self.context),
            }
        });
    }
}
