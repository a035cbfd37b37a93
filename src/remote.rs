use crate::{
	form::{serialize_form, FormOptions},
	interpret::{Interpreter, Reply},
	live::{EventHandler, LiveQueries, Scope},
};
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;
use tracing::{error, instrument, warn};
use web_sys::Element;

/// One outbound remote call: the handler name and its (possibly nested)
/// arguments, as assembled from static arguments and form serialization.
#[derive(Clone, Debug, Serialize)]
pub struct RemoteRequest {
	pub remote: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub args: Option<Value>,
}

impl RemoteRequest {
	#[must_use]
	pub fn new(remote: impl Into<String>, args: Option<Value>) -> Self {
		Self { remote: remote.into(), args }
	}

	/// The POST body.
	#[must_use]
	pub fn body(&self) -> String {
		serde_json::to_value(self).map_or_else(|_| "{}".to_owned(), |value| value.to_string())
	}
}

/// Attaches the cache-defeating `_=<stamp>` query parameter, replacing the
/// stamp of an existing one.
#[must_use]
pub fn cache_busted(url: &str, stamp: u64) -> String {
	if let Some(position) = url.find("_=") {
		let digits_start = position + 2;
		let digits_end = url[digits_start..].find(|c: char| !c.is_ascii_digit()).map_or(url.len(), |offset| digits_start + offset);
		if digits_end > digits_start {
			return format!("{}{}{}", &url[..digits_start], stamp, &url[digits_end..]);
		}
	}
	let separator = if url.contains('?') { '&' } else { '?' };
	format!("{}{}_={}", url, separator, stamp)
}

/// The HTTP boundary. Implementations POST the request body to `url` with
/// an `X-Requested-With: XMLHttpRequest` header and invoke `on_done` with
/// the raw reply body, or with an error description. `on_done` is a
/// registered continuation; `post` must not block.
pub trait Transport {
	fn post(&self, url: &str, request: &RemoteRequest, on_done: Box<dyn FnOnce(Result<String, String>)>);
}

/// Request lifecycle hooks, all optional. `on_success` runs before
/// interpretation and may veto it by returning `false`.
#[derive(Default)]
pub struct Lifecycle {
	pub before_send: Option<Box<dyn Fn(&RemoteRequest)>>,
	pub on_success: Option<Box<dyn Fn(&Reply) -> bool>>,
	pub on_error: Option<Box<dyn Fn(&str)>>,
	pub on_complete: Option<Box<dyn Fn()>>,
}

/// Orchestrates one remote round trip: serialize, POST, hand the decoded
/// reply to the interpreter.
pub struct RemoteInvoker {
	transport: Rc<dyn Transport>,
	interpreter: Rc<Interpreter>,
	lifecycle: Rc<Lifecycle>,
}

impl RemoteInvoker {
	#[must_use]
	pub fn new(transport: Rc<dyn Transport>, interpreter: Rc<Interpreter>) -> Self {
		Self {
			transport,
			interpreter,
			lifecycle: Rc::new(Lifecycle::default()),
		}
	}

	#[must_use]
	pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
		self.lifecycle = Rc::new(lifecycle);
		self
	}

	/// Calls the named remote handler directly, without a source element.
	#[instrument(skip(self, args))]
	pub fn call(&self, remote: &str, args: Option<Value>, url: &str) {
		let request = RemoteRequest::new(remote, args);
		let url = cache_busted(url, js_sys::Date::now() as u64);
		if let Some(before_send) = &self.lifecycle.before_send {
			before_send(&request);
		}

		let interpreter = Rc::clone(&self.interpreter);
		let lifecycle = Rc::clone(&self.lifecycle);
		self.transport.post(
			&url,
			&request,
			Box::new(move |result| {
				match result {
					Ok(body) => match Reply::from_json(&body) {
						Ok(reply) => {
							let wanted = lifecycle.on_success.as_ref().map_or(true, |on_success| on_success(&reply));
							if wanted {
								interpreter.apply(&reply);
							}
						}
						Err(decode_error) => {
							let message = decode_error.to_string();
							error!("Reply decode failed: {}", message);
							if let Some(on_error) = &lifecycle.on_error {
								on_error(&message);
							}
						}
					},
					Err(message) => {
						error!("Remote call failed: {}", message);
						if let Some(on_error) = &lifecycle.on_error {
							on_error(&message);
						}
					}
				}
				if let Some(on_complete) = &lifecycle.on_complete {
					on_complete();
				}
			}),
		);
	}

	/// Calls the remote handler named by the element's `data-remote`
	/// attribute. Static `data-args` JSON merges with the serialized form
	/// when the element is a form (form fields win); `data-submit` carries
	/// the form inclusion rules. The target URL comes from `action`, then
	/// `href`, then the current location.
	#[instrument(skip(self, element))]
	pub fn call_element(&self, element: &Element) {
		let remote = match element.get_attribute("data-remote") {
			Some(remote) => remote,
			None => return warn!("Element without data-remote cannot call out."),
		};

		let mut args = element.get_attribute("data-args").and_then(|raw| match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(error) => {
				warn!("Ignoring unparseable data-args: {}", error);
				None
			}
		});

		if element.tag_name().eq_ignore_ascii_case("form") {
			let options = element
				.get_attribute("data-submit")
				.and_then(|raw| match serde_json::from_str::<FormOptions>(&raw) {
					Ok(options) => Some(options),
					Err(error) => {
						warn!("Ignoring unparseable data-submit: {}", error);
						None
					}
				})
				.unwrap_or_default();
			let form = serialize_form(element, options);
			args = Some(merge_args(args, form));
		}

		let url = element
			.get_attribute("action")
			.or_else(|| element.get_attribute("href"))
			.or_else(current_location)
			.unwrap_or_default();

		self.call(&remote, args, &url);
	}

	/// Registers the standing document-wide bindings that make
	/// `data-remote` markup work: a confirm guard on `[data-confirm]`
	/// non-form elements, remote submission for `form[data-remote]` and
	/// remote clicks for other `[data-remote]` elements. The guard watch
	/// registers first so its listener runs ahead of the invocation
	/// listener on shared elements.
	pub fn install_default_triggers(this: &Rc<Self>, live: &Rc<LiveQueries>) {
		let confirm_guard = EventHandler::new(|element: &Element, event: &web_sys::Event| {
			if let Some(message) = element.get_attribute("data-confirm") {
				if !confirmed(&message) {
					event.prevent_default();
					event.stop_immediate_propagation();
				}
			}
		});
		live.bind("[data-confirm]:not(form)", Scope::Document, "click", confirm_guard);

		let invoker = Rc::clone(this);
		let submit = EventHandler::new(move |element: &Element, event: &web_sys::Event| {
			event.prevent_default();
			if let Some(message) = element.get_attribute("data-confirm") {
				if !confirmed(&message) {
					return;
				}
			}
			invoker.call_element(element);
		});
		live.bind("form[data-remote]", Scope::Document, "submit", submit);

		let invoker = Rc::clone(this);
		let click = EventHandler::new(move |element: &Element, event: &web_sys::Event| {
			event.prevent_default();
			invoker.call_element(element);
		});
		live.bind("[data-remote]:not(form)", Scope::Document, "click", click);
	}
}

/// Form fields override colliding static arguments; non-mapping static
/// arguments are replaced outright.
fn merge_args(args: Option<Value>, form: serde_json::Map<String, Value>) -> Value {
	match args {
		Some(Value::Object(mut base)) => {
			for (key, value) in form {
				base.insert(key, value);
			}
			Value::Object(base)
		}
		Some(other) => {
			warn!("Replacing non-mapping static args {:?} with form data.", other);
			Value::Object(form)
		}
		None => Value::Object(form),
	}
}

fn confirmed(message: &str) -> bool {
	web_sys::window().map_or(false, |window| window.confirm_with_message(message).unwrap_or(false))
}

fn current_location() -> Option<String> {
	let window = web_sys::window()?;
	window.location().href().ok()
}

#[cfg(test)]
mod tests {
	use super::{cache_busted, merge_args, RemoteRequest};
	use serde_json::json;

	#[test]
	fn cache_buster_appends_with_the_right_separator() {
		assert_eq!(cache_busted("/x", 7), "/x?_=7");
		assert_eq!(cache_busted("/x?a=1", 7), "/x?a=1&_=7");
	}

	#[test]
	fn cache_buster_replaces_an_existing_stamp() {
		assert_eq!(cache_busted("/x?_=123", 7), "/x?_=7");
		assert_eq!(cache_busted("/x?_=123&a=1", 7), "/x?_=7&a=1");
	}

	#[test]
	fn body_includes_args_only_when_present() {
		let bare = RemoteRequest::new("list", None);
		assert_eq!(bare.body(), r#"{"remote":"list"}"#);

		let with_args = RemoteRequest::new("list", Some(json!({"page": 2})));
		assert_eq!(with_args.body(), r#"{"remote":"list","args":{"page":2}}"#);
	}

	#[test]
	fn form_fields_win_over_static_args() {
		let mut form = serde_json::Map::new();
		form.insert("name".to_owned(), json!("from-form"));
		let merged = merge_args(Some(json!({"name": "static", "page": 2})), form);
		assert_eq!(merged, json!({"name": "from-form", "page": 2}));
	}
}
