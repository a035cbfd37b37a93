use hashbrown::HashMap;
use js_sys::Function;
use tracing::{error, trace};
use wasm_bindgen::{closure::Closure, JsCast};

/// Reference-counted cache of materialized JS listener functions, keyed by
/// handler identity.
///
/// Watches sharing one handler share one [`Function`], so detaching a
/// listener removes exactly the function that was attached. Stopping a watch
/// releases its reference; entries only leave the cache through [`sweep`],
/// which runs after the release so a pending reactivation in the same turn
/// still finds the cached function.
///
/// [`sweep`]: RcFnMap::sweep
pub(crate) struct RcFnMap {
	entries: HashMap<u64, (u32, Closure<dyn Fn(web_sys::Event)>)>,
}

impl Default for RcFnMap {
	fn default() -> Self {
		Self::new()
	}
}

impl RcFnMap {
	pub fn new() -> Self {
		Self { entries: HashMap::new() }
	}

	/// Bumps the reference count for `id`, materializing the closure on
	/// first acquisition, and returns the callable function.
	pub fn acquire_or_insert_with<F: FnOnce() -> Closure<dyn Fn(web_sys::Event)>>(&mut self, id: u64, make: F) -> Function {
		let (count, closure) = self.entries.entry(id).or_insert_with(|| (0, make()));
		*count = count.checked_add(1).unwrap_or_else(|| {
			error!("Reference count for handler {:016x} saturated.", id);
			u32::MAX
		});
		closure.as_ref().unchecked_ref::<Function>().clone()
	}

	pub fn get(&self, id: u64) -> Option<Function> {
		self.entries.get(&id).map(|(_, closure)| closure.as_ref().unchecked_ref::<Function>().clone())
	}

	/// Drops one reference. Releasing an id that was never acquired is a
	/// caller bug and logged.
	pub fn release(&mut self, id: u64) {
		match self.entries.get_mut(&id) {
			Some((count, _)) => *count = count.saturating_sub(1),
			None => error!("Released handler {:016x} that was never acquired.", id),
		}
	}

	/// Frees every fully released closure. Returns how many were dropped.
	pub fn sweep(&mut self) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, (count, _)| *count > 0);
		let freed = before - self.entries.len();
		if freed > 0 {
			trace!("Freed {} listener closure(s).", freed);
		}
		freed
	}
}
