//! Stackful coroutines scheduled cooperatively on the current thread.
//!
//! Every thread owns an independent scheduler. Id 0 is the thread's own
//! stack (the "main" context); spawned coroutines get ids from 1 upwards and
//! dead slots are recycled together with their stacks. When nothing is
//! runnable the scheduler blocks in `poll(2)` until the nearest sleep
//! deadline passes or a watched descriptor becomes ready.

use std::{
    cell::UnsafeCell,
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    os::fd::{AsRawFd, BorrowedFd, RawFd},
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};

use crate::{
    context::{self, Context},
    error::{Error, Result},
    stack::{Stack, StackArena, DEFAULT_STACK_SIZE},
};

pub type Id = usize;

pub const MAIN: Id = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Ready,
    Sleeping,
    WaitingIo,
    Joining,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interest {
    Read,
    Write,
}

impl Interest {
    fn flags(self) -> PollFlags {
        match self {
            Interest::Read => PollFlags::POLLIN,
            Interest::Write => PollFlags::POLLOUT,
        }
    }
}

struct Coroutine {
    context: Context,
    stack: Option<Stack>,
    entry: Option<Box<dyn FnOnce()>>,
    state: State,
    deadline: Option<Instant>,
}

impl Coroutine {
    fn new(state: State) -> Self {
        Self {
            context: Context::default(),
            stack: None,
            entry: None,
            state,
            deadline: None,
        }
    }
}

struct IoWaiter {
    id: Id,
    fd: RawFd,
    interest: Interest,
}

struct Scheduler {
    current: Id,
    coroutines: Vec<Coroutine>,
    ready: VecDeque<Id>,
    sleeping: BinaryHeap<Reverse<(Instant, Id)>>,
    io: Vec<IoWaiter>,
    dead: Vec<Id>,
    alive: usize,
    joiner: Option<Id>,
    panicked: usize,
    stack_size: usize,
    guard_pages: bool,
    arena: StackArena,
}

/// Stack-pointer slots handed to [`context::switch`] once the scheduler
/// borrow has ended.
type Switch = (*mut usize, usize);

impl Scheduler {
    fn new() -> Self {
        Self {
            current: MAIN,
            coroutines: vec![Coroutine::new(State::Running)],
            ready: VecDeque::new(),
            sleeping: BinaryHeap::new(),
            io: Vec::new(),
            dead: Vec::new(),
            alive: 0,
            joiner: None,
            panicked: 0,
            stack_size: DEFAULT_STACK_SIZE,
            guard_pages: true,
            arena: StackArena::new(),
        }
    }

    fn spawn(&mut self, entry: Box<dyn FnOnce()>) -> Result<Id> {
        let id = match self.dead.pop() {
            Some(id) => id,
            None => {
                self.coroutines.push(Coroutine::new(State::Dead));
                self.coroutines.len() - 1
            }
        };

        let wanted = Stack::rounded(self.stack_size);
        let co = &mut self.coroutines[id];
        let stack = match co.stack.take() {
            Some(stack) if stack.size() == wanted => stack,
            _ => {
                let fresh = if self.guard_pages {
                    Stack::new(wanted)
                } else {
                    self.arena.allocate(wanted)
                };
                match fresh {
                    Ok(stack) => stack,
                    Err(err) => {
                        self.dead.push(id);
                        return Err(err);
                    }
                }
            }
        };

        unsafe { co.context.prepare(&stack, coroutine_entry, id) };
        co.stack = Some(stack);
        co.entry = Some(entry);
        co.deadline = None;
        co.state = State::Ready;

        self.ready.push_back(id);
        self.alive += 1;
        Ok(id)
    }

    fn make_ready(&mut self, id: Id) {
        let co = &mut self.coroutines[id];
        co.state = State::Ready;
        co.deadline = None;
        self.ready.push_back(id);
    }

    fn wake_up(&mut self, id: Id) -> bool {
        match self.coroutines.get(id).map(|co| co.state) {
            Some(State::Sleeping) => self.sleeping.retain(|Reverse((_, sleeper))| *sleeper != id),
            Some(State::WaitingIo) => self.io.retain(|w| w.id != id),
            _ => return false,
        }
        self.make_ready(id);
        true
    }

    /// Undo whatever the current context registered before a failed park,
    /// so it keeps running in a consistent state.
    fn cancel_park(&mut self) {
        let id = self.current;
        match self.coroutines[id].state {
            State::Ready => self.ready.retain(|&queued| queued != id),
            State::Sleeping => self.sleeping.retain(|Reverse((_, sleeper))| *sleeper != id),
            State::WaitingIo => self.io.retain(|w| w.id != id),
            State::Joining => self.joiner = None,
            State::Running | State::Dead => {}
        }
        let co = &mut self.coroutines[id];
        co.state = State::Running;
        co.deadline = None;
    }

    fn wake_sleepers(&mut self, now: Instant) {
        while let Some(&Reverse((deadline, id))) = self.sleeping.peek() {
            if deadline > now {
                break;
            }
            self.sleeping.pop();
            let co = &self.coroutines[id];
            if co.state == State::Sleeping && co.deadline == Some(deadline) {
                self.make_ready(id);
            }
        }
    }

    fn poll_timeout(&self, block: bool) -> PollTimeout {
        if !block {
            return PollTimeout::ZERO;
        }
        match self.sleeping.peek() {
            None => PollTimeout::NONE,
            Some(Reverse((deadline, _))) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                // Round up so we never wake just before the deadline and spin.
                let ms = wait.as_micros().div_ceil(1000).min(u128::from(u16::MAX));
                PollTimeout::from(ms as u16)
            }
        }
    }

    fn poll_events(&mut self, block: bool) -> Result<()> {
        let timeout = self.poll_timeout(block);
        let mut fds: Vec<PollFd<'_>> = self
            .io
            .iter()
            .map(|w| PollFd::new(unsafe { BorrowedFd::borrow_raw(w.fd) }, w.interest.flags()))
            .collect();

        match poll(&mut fds, timeout) {
            Ok(_) | Err(Errno::EINTR) => {}
            Err(err) => return Err(Error::Poll(err)),
        }

        // Hang-up and error count as ready so the waiter can observe them.
        let mut fired = fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|r| !r.is_empty()))
            .collect::<Vec<_>>()
            .into_iter();
        drop(fds);

        let mut woken = Vec::new();
        self.io.retain(|w| {
            if fired.next().unwrap_or(false) {
                woken.push(w.id);
                false
            } else {
                true
            }
        });
        for id in woken {
            self.make_ready(id);
        }

        self.wake_sleepers(Instant::now());
        Ok(())
    }

    fn next_runnable(&mut self) -> Result<Id> {
        loop {
            self.wake_sleepers(Instant::now());

            let idle = self.ready.is_empty();
            if idle && self.io.is_empty() && self.sleeping.is_empty() {
                return Err(Error::Deadlock);
            }
            if idle || !self.io.is_empty() {
                self.poll_events(idle)?;
            }

            if let Some(id) = self.ready.pop_front() {
                return Ok(id);
            }
        }
    }

    /// `None` when `next` is already running and no switch is needed.
    fn switch_to(&mut self, next: Id) -> Option<Switch> {
        let prev = self.current;
        self.coroutines[next].state = State::Running;
        if next == prev {
            return None;
        }
        self.current = next;
        let save = self.coroutines[prev].context.rsp_slot();
        Some((save, self.coroutines[next].context.rsp()))
    }

    fn finish_current(&mut self) -> Result<Switch> {
        let id = self.current;
        let co = &mut self.coroutines[id];
        co.state = State::Dead;
        co.deadline = None;
        self.dead.push(id);
        self.alive -= 1;

        if self.alive == 0 {
            if let Some(joiner) = self.joiner.take() {
                self.make_ready(joiner);
            }
        }

        let next = self.next_runnable()?;
        // The finished coroutine sits in no queue, so `next` is always
        // another context.
        self.switch_to(next).ok_or(Error::Deadlock)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.alive > 0 {
            tracing::warn!(
                alive = self.alive,
                "dropping scheduler with suspended coroutines"
            );
        }
    }
}

thread_local! {
    static SCHEDULER: UnsafeCell<Scheduler> = UnsafeCell::new(Scheduler::new());
}

/// Exclusive access to this thread's scheduler. `f` must not switch
/// contexts; switches happen after the borrow ends.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|cell| f(unsafe { &mut *cell.get() }))
}

/// Give up the CPU until the scheduler picks the current context again.
/// The caller must already have queued or registered the current context.
fn park() -> Result<()> {
    let switch = with_scheduler(|s| match s.next_runnable() {
        Ok(next) => Ok(s.switch_to(next)),
        Err(err) => {
            s.cancel_park();
            Err(err)
        }
    })?;
    if let Some((save, next)) = switch {
        unsafe { context::switch(save, next) };
    }
    Ok(())
}

extern "C" fn coroutine_entry(id: usize) -> ! {
    let entry = with_scheduler(|s| s.coroutines[id].entry.take());
    if let Some(f) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let err = Error::from_panic(payload);
            tracing::error!(id, %err, "coroutine panicked");
            with_scheduler(|s| s.panicked += 1);
        }
    }

    match with_scheduler(|s| s.finish_current()) {
        Ok((save, next)) => unsafe { context::switch(save, next) },
        Err(err) => tracing::error!(id, %err, "no context to resume after coroutine exit"),
    }
    // Dead contexts are never resumed.
    std::process::abort()
}

/// Start `f` as a new coroutine. It first runs when the current context
/// yields, sleeps, waits or joins.
pub fn spawn<F>(f: F) -> Result<Id>
where
    F: FnOnce() + 'static,
{
    with_scheduler(|s| s.spawn(Box::new(f)))
}

pub fn yield_now() -> Result<()> {
    with_scheduler(|s| {
        let id = s.current;
        s.make_ready(id);
    });
    park()
}

/// Park for `duration`. A duration too large to express as an instant
/// never expires; only [`wake_up`] resumes such a sleeper.
pub fn sleep(duration: Duration) -> Result<()> {
    with_scheduler(|s| {
        let id = s.current;
        let deadline = Instant::now().checked_add(duration);
        let co = &mut s.coroutines[id];
        co.state = State::Sleeping;
        co.deadline = deadline;
        if let Some(deadline) = deadline {
            s.sleeping.push(Reverse((deadline, id)));
        }
    });
    park()
}

fn wait_io(fd: BorrowedFd<'_>, interest: Interest) -> Result<()> {
    with_scheduler(|s| {
        let id = s.current;
        s.coroutines[id].state = State::WaitingIo;
        s.io.push(IoWaiter {
            id,
            fd: fd.as_raw_fd(),
            interest,
        });
    });
    park()
}

/// Park until `fd` is readable, hung up or in error.
pub fn wait_readable(fd: BorrowedFd<'_>) -> Result<()> {
    wait_io(fd, Interest::Read)
}

/// Park until `fd` is writable, hung up or in error.
pub fn wait_writable(fd: BorrowedFd<'_>) -> Result<()> {
    wait_io(fd, Interest::Write)
}

/// Cut a sleep or descriptor wait short. Returns false if `id` was not
/// parked on either.
pub fn wake_up(id: Id) -> bool {
    with_scheduler(|s| s.wake_up(id))
}

pub fn id() -> Id {
    with_scheduler(|s| s.current)
}

/// Spawned coroutines that have not finished yet.
pub fn alive() -> usize {
    with_scheduler(|s| s.alive)
}

pub fn state(id: Id) -> Option<State> {
    with_scheduler(|s| s.coroutines.get(id).map(|co| co.state))
}

/// Stack size for stacks allocated from now on. Recycled stacks of a
/// different size are replaced.
pub fn set_stack_size(bytes: usize) {
    with_scheduler(|s| s.stack_size = bytes);
}

/// Whether stacks allocated from now on get their own mapping with a guard
/// page (the default). Without guards, stacks are carved from shared
/// mappings: each guarded stack costs two kernel memory regions, which caps
/// a process at roughly 32k of them.
pub fn set_guard_pages(enabled: bool) {
    with_scheduler(|s| s.guard_pages = enabled);
}

/// Run every spawned coroutine to completion. Only the main context may
/// join; panics caught since the previous join are reported here.
pub fn join_all() -> Result<()> {
    let must_park = with_scheduler(|s| {
        if s.current != MAIN {
            return Err(Error::NotMainContext);
        }
        if s.alive == 0 {
            return Ok(false);
        }
        s.joiner = Some(MAIN);
        s.coroutines[MAIN].state = State::Joining;
        Ok(true)
    })?;

    if must_park {
        park()?;
    }

    match with_scheduler(|s| std::mem::take(&mut s.panicked)) {
        0 => Ok(()),
        n => Err(Error::CoroutinePanicked(n)),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[test]
    fn join_with_nothing_spawned_returns_immediately() {
        join_all().unwrap();
        assert_eq!(id(), MAIN);
        assert_eq!(alive(), 0);
    }

    #[test]
    fn spawned_coroutine_waits_for_main_to_yield() {
        let ran = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&ran);
        let child = spawn(move || *flag.borrow_mut() = true).unwrap();

        assert!(!*ran.borrow());
        assert_eq!(state(child), Some(State::Ready));
        assert_eq!(alive(), 1);

        join_all().unwrap();
        assert!(*ran.borrow());
        assert_eq!(state(child), Some(State::Dead));
    }

    #[test]
    fn dead_slots_are_recycled() {
        let first = spawn(|| {}).unwrap();
        join_all().unwrap();
        let second = spawn(|| {}).unwrap();
        join_all().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn sleep_on_main_with_nothing_else() {
        let start = Instant::now();
        sleep(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(state(MAIN), Some(State::Running));
    }

    #[test]
    fn failed_park_leaves_the_caller_running() {
        assert!(matches!(sleep(Duration::MAX), Err(Error::Deadlock)));
        assert_eq!(state(MAIN), Some(State::Running));
        with_scheduler(|s| {
            assert!(s.sleeping.is_empty());
            assert!(s.ready.is_empty());
        });

        // Still schedulable afterwards.
        yield_now().unwrap();
        sleep(Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn unguarded_stacks_come_from_the_arena() {
        set_guard_pages(false);
        let child = spawn(|| {}).unwrap();
        let guarded = with_scheduler(|s| {
            s.coroutines[child].stack.as_ref().map(Stack::is_guarded)
        });
        join_all().unwrap();
        set_guard_pages(true);
        assert_eq!(guarded, Some(false));
    }

    #[test]
    fn wake_up_rejects_runnable_ids() {
        assert!(!wake_up(MAIN));
        assert!(!wake_up(4096));
    }
}
