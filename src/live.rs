use crate::rc_fn_map::RcFnMap;
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};
use std::rc::Rc;
use tracing::{error, instrument, trace, trace_span, warn};
use wasm_bindgen::{closure::Closure, JsCast};
use web_sys::Element;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered watch. Monotonically increasing, never reused
/// for the process lifetime; doubles as the flush-queue key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WatchId(pub(crate) u32);

/// Identity of a handler, the equivalence component that lets two
/// registrations of the same callback collapse into one watch.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HandlerId(u64);

fn next_handler_id() -> HandlerId {
	HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
}

/// An event callback with process-unique identity. Clones share the
/// identity, so re-registering a clone reactivates the existing watch
/// instead of creating a duplicate.
#[derive(Clone)]
pub struct EventHandler {
	id: HandlerId,
	f: Rc<dyn Fn(&Element, &web_sys::Event)>,
}

impl EventHandler {
	pub fn new(f: impl Fn(&Element, &web_sys::Event) + 'static) -> Self {
		Self {
			id: next_handler_id(),
			f: Rc::new(f),
		}
	}

	#[must_use]
	pub fn id(&self) -> HandlerId {
		self.id
	}
}

impl Debug for EventHandler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("EventHandler").field(&self.id).finish()
	}
}

/// A membership callback (enter or exit action) with process-unique
/// identity, invoked with the element that entered or left the matched set.
#[derive(Clone)]
pub struct ElementCallback {
	id: HandlerId,
	f: Rc<dyn Fn(&Element)>,
}

impl ElementCallback {
	pub fn new(f: impl Fn(&Element) + 'static) -> Self {
		Self {
			id: next_handler_id(),
			f: Rc::new(f),
		}
	}

	#[must_use]
	pub fn id(&self) -> HandlerId {
		self.id
	}

	pub fn call(&self, element: &Element) {
		(self.f)(element);
	}
}

impl Debug for ElementCallback {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ElementCallback").field(&self.id).finish()
	}
}

/// Where a watch's selector is evaluated: the whole document (default) or a
/// single subtree.
#[derive(Clone, Debug)]
pub enum Scope {
	Document,
	Within(Element),
}

impl Scope {
	fn query(&self, selector: &str) -> Result<web_sys::NodeList, wasm_bindgen::JsValue> {
		match self {
			Scope::Document => {
				let document = web_sys::window().and_then(|window| window.document());
				match document {
					Some(document) => document.query_selector_all(selector),
					None => Err(wasm_bindgen::JsValue::from_str("no document")),
				}
			}
			Scope::Within(root) => root.query_selector_all(selector),
		}
	}

	fn same(&self, other: &Scope) -> bool {
		match (self, other) {
			(Scope::Document, Scope::Document) => true,
			(Scope::Within(a), Scope::Within(b)) => same_element(a, b),
			_ => false,
		}
	}
}

/// What a watch does when elements enter or leave its matched set.
#[derive(Clone, Debug)]
pub enum WatchMode {
	/// Attach the handler as a DOM listener on entering elements, detach
	/// exactly that listener from leaving ones.
	Event { event: String, handler: EventHandler },
	/// Invoke `enter`/`exit` once per membership transition.
	Lifecycle { enter: ElementCallback, exit: Option<ElementCallback> },
}

impl WatchMode {
	fn equivalent(&self, other: &WatchMode) -> bool {
		match (self, other) {
			(WatchMode::Event { event: e_1, handler: h_1 }, WatchMode::Event { event: e_2, handler: h_2 }) => e_1 == e_2 && h_1.id == h_2.id,
			(
				WatchMode::Lifecycle { enter: en_1, exit: ex_1 },
				WatchMode::Lifecycle { enter: en_2, exit: ex_2 },
			) => en_1.id == en_2.id && ex_1.as_ref().map(ElementCallback::id) == ex_2.as_ref().map(ElementCallback::id),
			_ => false,
		}
	}
}

struct Watch {
	selector: String,
	scope: Scope,
	mode: WatchMode,
	matched: Vec<Element>,
	stopped: bool,
}

#[derive(Default)]
struct Registry {
	watches: Vec<Watch>,
	handler_fns: RcFnMap,
}

/// The live binding engine: a registry of watches, each re-matching its
/// selector on demand and diffing the result against the previous matched
/// set by element identity.
///
/// One instance owns all watch state for a runtime context; collaborators
/// hold it behind [`Rc`]. Stopped watches stay registered and reactivatable,
/// so the registry never shrinks.
#[derive(Default)]
pub struct LiveQueries {
	inner: RefCell<Registry>,
}

/// Deferred side effects of a tick, applied after the registry borrow is
/// released so enter/exit actions can re-enter the engine.
enum Actions {
	Event {
		event: String,
		function: Option<js_sys::Function>,
		bind: Vec<Element>,
		unbind: Vec<Element>,
	},
	Lifecycle {
		enter: ElementCallback,
		exit: Option<ElementCallback>,
		entered: Vec<Element>,
		exited: Vec<Element>,
	},
}

impl Actions {
	fn apply(self) {
		match self {
			Actions::Event { event, function, bind, unbind } => {
				let function = match function {
					Some(function) => function,
					None => return error!("No listener function cached for {:?} watch.", event),
				};
				for element in &bind {
					if let Err(error) = element.add_event_listener_with_callback(&event, &function) {
						error!("Failed to add {:?} listener: {:?}", event, error);
					}
				}
				for element in &unbind {
					if let Err(error) = element.remove_event_listener_with_callback(&event, &function) {
						error!("Failed to remove {:?} listener: {:?}", event, error);
					}
				}
			}
			Actions::Lifecycle { enter, exit, entered, exited } => {
				for element in &entered {
					let span = trace_span!("enter action", ?element);
					let _enter = span.enter();
					enter.call(element);
				}
				if let Some(exit) = exit {
					for element in &exited {
						let span = trace_span!("exit action", ?element);
						let _enter = span.enter();
						exit.call(element);
					}
				}
			}
		}
	}
}

impl LiveQueries {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an event-mode watch: `handler` stays attached to every
	/// element matching `selector` as the document changes.
	pub fn bind(&self, selector: &str, scope: Scope, event: &str, handler: EventHandler) -> WatchId {
		self.register(
			selector,
			scope,
			WatchMode::Event {
				event: event.to_owned(),
				handler,
			},
		)
	}

	/// Registers a callback-mode watch: `enter` runs once per element
	/// joining the matched set, `exit` once per element leaving it.
	pub fn watch(&self, selector: &str, scope: Scope, enter: ElementCallback, exit: Option<ElementCallback>) -> WatchId {
		self.register(selector, scope, WatchMode::Lifecycle { enter, exit })
	}

	/// Registers a watch, or reactivates the equivalent existing one.
	/// Either way the watch is matched-and-applied synchronously before this
	/// returns, so already-present elements are bound immediately.
	#[instrument(skip(self))]
	pub fn register(&self, selector: &str, scope: Scope, mode: WatchMode) -> WatchId {
		let id = {
			let mut registry = self.inner.borrow_mut();
			let existing = registry
				.watches
				.iter()
				.position(|watch| watch.selector == selector && watch.scope.same(&scope) && watch.mode.equivalent(&mode));
			match existing {
				Some(index) => {
					let watch = &mut registry.watches[index];
					if watch.stopped {
						trace!("Reactivating watch {}.", index);
						watch.stopped = false;
						if let WatchMode::Event { handler, .. } = &mode {
							let shared = Rc::clone(&handler.f);
							let handler_id = handler.id.0;
							registry.handler_fns.acquire_or_insert_with(handler_id, || listener_closure(shared));
						}
					}
					WatchId(index as u32)
				}
				None => {
					let index = registry.watches.len();
					if let WatchMode::Event { handler, .. } = &mode {
						let shared = Rc::clone(&handler.f);
						registry.handler_fns.acquire_or_insert_with(handler.id.0, || listener_closure(shared));
					}
					registry.watches.push(Watch {
						selector: selector.to_owned(),
						scope,
						mode,
						matched: Vec::new(),
						stopped: false,
					});
					WatchId(index as u32)
				}
			}
		};
		self.tick(id);
		id
	}

	/// Every id ever registered, in registration order.
	#[must_use]
	pub fn watch_ids(&self) -> Vec<WatchId> {
		(0..self.inner.borrow().watches.len()).map(|index| WatchId(index as u32)).collect()
	}

	/// Re-matches one watch and applies enter/exit actions for the
	/// membership difference. Stopped watches are skipped.
	#[instrument(skip(self))]
	pub fn tick(&self, id: WatchId) {
		let actions = {
			let mut registry = self.inner.borrow_mut();
			let registry = &mut *registry;
			let watch = match registry.watches.get_mut(id.0 as usize) {
				Some(watch) => watch,
				None => return warn!("Tick for unknown watch {:?}.", id),
			};
			if watch.stopped {
				return;
			}

			let current = match watch.scope.query(&watch.selector) {
				Ok(list) => collect_elements(&list),
				Err(error) => {
					return error!("Selector {:?} failed to parse: {:?}", watch.selector, error);
				}
			};

			let added: Vec<Element> = current.iter().filter(|element| !contains_identity(&watch.matched, element)).cloned().collect();
			let removed: Vec<Element> = watch.matched.iter().filter(|element| !contains_identity(&current, element)).cloned().collect();
			trace!("Watch {:?}: {} matched, {} added, {} removed.", id, current.len(), added.len(), removed.len());
			watch.matched = current;

			match &watch.mode {
				WatchMode::Event { event, handler } => Actions::Event {
					event: event.clone(),
					function: registry.handler_fns.get(handler.id.0),
					bind: added,
					unbind: removed,
				},
				WatchMode::Lifecycle { enter, exit } => Actions::Lifecycle {
					enter: enter.clone(),
					exit: exit.clone(),
					entered: added,
					exited: removed,
				},
			}
		};
		actions.apply();
	}

	/// Stops one watch, or every watch when `id` is `None`. Exit actions
	/// fire (and event listeners detach) for the current matched set before
	/// this returns; the cleared watch stays registered for reactivation.
	#[instrument(skip(self))]
	pub fn stop(&self, id: Option<WatchId>) {
		match id {
			Some(id) => self.stop_one(id),
			None => {
				for id in self.watch_ids() {
					self.stop_one(id);
				}
			}
		}
	}

	fn stop_one(&self, id: WatchId) {
		let actions = {
			let mut registry = self.inner.borrow_mut();
			let registry = &mut *registry;
			let watch = match registry.watches.get_mut(id.0 as usize) {
				Some(watch) => watch,
				None => return warn!("Stop for unknown watch {:?}.", id),
			};
			if watch.stopped {
				return;
			}
			watch.stopped = true;
			let matched = core::mem::take(&mut watch.matched);

			match &watch.mode {
				WatchMode::Event { event, handler } => {
					let function = registry.handler_fns.get(handler.id.0);
					registry.handler_fns.release(handler.id.0);
					registry.handler_fns.sweep();
					Actions::Event {
						event: event.clone(),
						function,
						bind: Vec::new(),
						unbind: matched,
					}
				}
				WatchMode::Lifecycle { enter, exit } => Actions::Lifecycle {
					enter: enter.clone(),
					exit: exit.clone(),
					entered: Vec::new(),
					exited: matched,
				},
			}
		};
		actions.apply();
	}
}

fn listener_closure(f: Rc<dyn Fn(&Element, &web_sys::Event)>) -> Closure<dyn Fn(web_sys::Event)> {
	Closure::wrap(Box::new(move |event: web_sys::Event| {
		let element = event.current_target().and_then(|target| target.dyn_into::<Element>().ok());
		match element {
			Some(element) => f(&element, &event),
			None => warn!("Event {:?} dispatched without an element target.", event.type_()),
		}
	}) as Box<dyn Fn(web_sys::Event)>)
}

fn collect_elements(list: &web_sys::NodeList) -> Vec<Element> {
	(0..list.length())
		.filter_map(|index| list.item(index))
		.filter_map(|node| node.dyn_into::<Element>().ok())
		.collect()
}

/// Identity comparison: two handles to the same DOM element, never value
/// equality.
fn same_element(a: &Element, b: &Element) -> bool {
	js_sys::Object::is(a.as_ref(), b.as_ref())
}

fn contains_identity(set: &[Element], element: &Element) -> bool {
	set.iter().any(|candidate| same_element(candidate, element))
}
