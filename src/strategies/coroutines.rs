use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use super::Strategy;
use crate::{
    config::Workload,
    coroutines as scheduler,
    error::{Error, Result},
    timing::{self, Measurement},
};

/// Above this many tasks stacks come without guard pages: each guarded
/// stack is two kernel memory regions and `vm.max_map_count` defaults to
/// 65530.
pub const GUARDED_TASK_LIMIT: usize = 16_384;

/// Stand-in for I/O on a coroutine: parks it for `delay` while the others
/// keep running on the same thread.
pub fn coroutine_task(index: usize, delay: Duration) -> Result<usize> {
    scheduler::sleep(delay)?;
    Ok(index)
}

pub fn run(strategy: Strategy, workload: &Workload) -> Result<Measurement> {
    let ideal = strategy.ideal(workload);
    let delay = workload.delay;
    scheduler::set_stack_size(workload.coroutine_stack);
    scheduler::set_guard_pages(workload.tasks <= GUARDED_TASK_LIMIT);

    timing::measure(strategy.label(), workload.tasks, ideal, || {
        let completed = Rc::new(Cell::new(0usize));
        let failure: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));

        for index in 0..workload.tasks {
            let completed = Rc::clone(&completed);
            let failure = Rc::clone(&failure);
            let spawned = scheduler::spawn(move || match coroutine_task(index, delay) {
                Ok(_) => completed.set(completed.get() + 1),
                Err(err) => {
                    failure.borrow_mut().get_or_insert(err);
                }
            });
            if let Err(err) = spawned {
                // Let what did start finish before reporting.
                if let Err(join_err) = scheduler::join_all() {
                    tracing::warn!(
                        %join_err,
                        "coroutines started before the failed spawn did not finish cleanly"
                    );
                }
                return Err(err);
            }
        }
        tracing::debug!(coroutines = scheduler::alive(), "all coroutines spawned");

        scheduler::join_all()?;
        if let Some(err) = failure.borrow_mut().take() {
            return Err(err);
        }
        Ok(completed.get())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_is_reported() {
        let workload = Workload {
            coroutine_stack: 1 << 50,
            ..Workload::new(3, Duration::from_millis(10))
        };
        let err = run(Strategy::Coroutines, &workload).unwrap_err();
        assert!(matches!(err, Error::Stack(_)), "{err:?}");
        assert_eq!(scheduler::alive(), 0);
    }
}
