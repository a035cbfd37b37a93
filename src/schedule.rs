use crate::live::{LiveQueries, WatchId};
use core::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace};
use wasm_bindgen::{closure::Closure, JsCast, UnwrapThrowExt};

/// Debounce window between the last document mutation and the re-match
/// pass. A burst of mutations in one event-loop turn collapses into one
/// flush this many milliseconds later.
pub const FLUSH_DELAY_MS: i32 = 20;

struct State {
	/// Watch ids awaiting a flush, FIFO by first enqueue.
	pending: Vec<WatchId>,
	/// Handle of the single scheduled flush timer, if any.
	timer: Option<i32>,
	running: bool,
	/// Retained backing closure for the timer callback.
	timer_closure: Option<Closure<dyn Fn()>>,
}

/// Coalescing scheduler between document mutations and the live binding
/// engine.
///
/// Any mutation source calls [`mark_dirty`]; every call cancels and
/// reschedules the single deferred flush timer (debounce, not throttle).
/// [`pause`] stops draining without clearing the queue, [`play`] resumes and
/// flushes immediately so queued mutations are not lost.
///
/// [`mark_dirty`]: FlushQueue::mark_dirty
/// [`pause`]: FlushQueue::pause
/// [`play`]: FlushQueue::play
pub struct FlushQueue {
	engine: Rc<LiveQueries>,
	state: RefCell<State>,
}

impl FlushQueue {
	/// Creates the queue in the running state and wires its timer callback.
	#[must_use]
	pub fn new(engine: Rc<LiveQueries>) -> Rc<Self> {
		let queue = Rc::new(Self {
			engine,
			state: RefCell::new(State {
				pending: Vec::new(),
				timer: None,
				running: true,
				timer_closure: None,
			}),
		});
		let weak: Weak<Self> = Rc::downgrade(&queue);
		let closure = Closure::wrap(Box::new(move || {
			if let Some(queue) = weak.upgrade() {
				queue.flush();
			}
		}) as Box<dyn Fn()>);
		queue.state.borrow_mut().timer_closure = Some(closure);
		queue
	}

	#[must_use]
	pub fn engine(&self) -> &Rc<LiveQueries> {
		&self.engine
	}

	/// Enqueues one watch (or every registered watch) and (re)schedules the
	/// deferred flush.
	#[instrument(skip(self))]
	pub fn mark_dirty(&self, id: Option<WatchId>) {
		{
			let mut state = self.state.borrow_mut();
			match id {
				Some(id) => {
					if !state.pending.contains(&id) {
						state.pending.push(id);
					}
				}
				None => {
					for id in self.engine.watch_ids() {
						if !state.pending.contains(&id) {
							state.pending.push(id);
						}
					}
				}
			}
		}
		self.reschedule();
	}

	fn reschedule(&self) {
		let window = web_sys::window().expect_throw("no window to schedule on");
		let mut state = self.state.borrow_mut();
		if let Some(handle) = state.timer.take() {
			window.clear_timeout_with_handle(handle);
		}
		let callback = state.timer_closure.as_ref().expect_throw("timer closure wired at construction");
		match window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), FLUSH_DELAY_MS) {
			Ok(handle) => state.timer = Some(handle),
			Err(error) => error!("Failed to schedule flush: {:?}", error),
		}
	}

	/// Drains the pending queue, ticking each queued watch once in
	/// ascending registration order. A no-op while paused: the queue is
	/// kept, not drained.
	#[instrument(skip(self))]
	pub fn flush(&self) {
		let ids = {
			let mut state = self.state.borrow_mut();
			if !state.running {
				trace!("Paused; keeping {} queued watch(es).", state.pending.len());
				return;
			}
			state.timer = None;
			let mut ids = core::mem::take(&mut state.pending);
			ids.sort_unstable();
			ids
		};
		for id in ids {
			self.engine.tick(id);
		}
	}

	/// Stops draining until [`play`](FlushQueue::play). Pending ids survive.
	pub fn pause(&self) {
		self.state.borrow_mut().running = false;
	}

	/// Resumes draining and immediately flushes whatever queued up while
	/// paused.
	pub fn play(&self) {
		self.state.borrow_mut().running = true;
		self.flush();
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.state.borrow().running
	}
}

impl Drop for FlushQueue {
	fn drop(&mut self) {
		if let Some(handle) = self.state.borrow_mut().timer.take() {
			if let Some(window) = web_sys::window() {
				window.clear_timeout_with_handle(handle);
			}
		}
	}
}
