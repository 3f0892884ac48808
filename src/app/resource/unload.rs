//! Iterative collection of unused providers and loaders
//!
//! Bundles can depend on each other in long chains: destroying one
//! provider releases loaders that in turn become collectable. Each
//! iteration destroys unreferenced providers first, then loaders left
//! without references. The loop count bounds the work of one request.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error};

use super::manager::ResourceState;
use crate::app::operation::{Operation, OperationCore, TickContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    UnloadUnused,
    Done,
}

/// Run up to `loop_count` collection iterations, spread over frames
pub struct UnloadUnusedAssetsOperation {
    core: OperationCore,
    state: Rc<RefCell<ResourceState>>,
    loop_count: u32,
    loop_counter: u32,
    steps: Steps,
}

impl UnloadUnusedAssetsOperation {
    pub fn new(state: Rc<RefCell<ResourceState>>, loop_count: u32) -> Self {
        Self {
            core: OperationCore::new("UnloadUnusedAssetsOperation"),
            state,
            loop_count,
            loop_counter: 0,
            steps: Steps::None,
        }
    }
}

impl Operation for UnloadUnusedAssetsOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::UnloadUnused;
        self.loop_counter = self.loop_count;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps != Steps::UnloadUnused {
            return;
        }

        let Ok(mut state) = self.state.try_borrow_mut() else {
            error!("Resource state is busy, unload deferred");
            return;
        };
        while self.loop_counter > 0 {
            self.loop_counter -= 1;
            let destroyed = state.collect_unused();
            if destroyed > 0 {
                debug!("Collected {} bundle loaders", destroyed);
            }
            if !self.core.is_wait_for_async_complete() && ctx.is_busy() {
                break;
            }
        }

        if self.loop_counter == 0 {
            self.steps = Steps::Done;
            self.core.succeed();
        }
    }

    fn description(&self) -> String {
        format!("LoopCount : {}", self.loop_count)
    }
}
