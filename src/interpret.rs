use crate::{batch::Opcode, schedule::FlushQueue};
use serde::Deserialize;
use serde_json::Value;
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, instrument, trace, trace_span, warn};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::Element;

/// One command record as decoded from the wire: opcode plus positional
/// arguments. Selector-scoped records carry `c = 0xFF` with the operation
/// name in `a[0]`; global records carry one of the fixed opcodes.
#[derive(Clone, Debug, Deserialize)]
pub struct WireCommand {
	pub c: u8,
	#[serde(default)]
	pub a: Vec<Value>,
}

/// A decoded reply: ordered buckets of command records, keyed by selector
/// or by a reserved integer slot.
#[derive(Clone, Debug, Default)]
pub struct Reply {
	buckets: Vec<(String, Vec<WireCommand>)>,
}

impl Reply {
	/// Decodes the wire format. The top level must be a JSON object; a
	/// bucket whose value is not a command sequence is logged and dropped
	/// (malformed buckets are contained, they do not fail the reply).
	pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
		let root: serde_json::Map<String, Value> = serde_json::from_str(text)?;
		let mut buckets = Vec::with_capacity(root.len());
		for (key, value) in root {
			match serde_json::from_value::<Vec<WireCommand>>(value) {
				Ok(commands) => buckets.push((key, commands)),
				Err(error) => warn!("Dropping malformed bucket {:?}: {}", key, error),
			}
		}
		Ok(Self { buckets })
	}

	#[must_use]
	pub fn buckets(&self) -> &[(String, Vec<WireCommand>)] {
		&self.buckets
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.buckets.is_empty()
	}
}

/// Contained per-command failures. None of these abort the surrounding
/// batch; they are logged where detected and tallied in [`ApplyStats`].
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("target {0:?} is not a valid selector")]
	MalformedTarget(String),
	#[error("selector {0:?} matched no elements")]
	UnresolvedSelector(String),
	#[error("unsupported operation {0:?}")]
	UnsupportedOperation(String),
	#[error("no global function {0:?}")]
	MissingGlobalHandler(String),
	#[error("global function {0:?} threw: {1}")]
	HandlerThrew(String, String),
	#[error("expression failed: {0}")]
	ExpressionFailed(String),
	#[error("expression execution is disabled")]
	ExpressionsDisabled,
	#[error("bad arguments for {operation}: expected {expected}")]
	BadArguments { operation: &'static str, expected: &'static str },
	#[error("unknown opcode {0}")]
	UnknownOpcode(u8),
}

/// Per-batch application summary: commands (or buckets) that ran, and
/// contained failures that were logged along the way.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApplyStats {
	pub executed: usize,
	pub failed: usize,
}

/// Interpretation policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterpreterOptions {
	/// Permit script commands to execute their source text. Off by default:
	/// executing remote-supplied source is only appropriate for fully
	/// trusted origins.
	pub run_expressions: bool,
}

/// The closed set of selector-scoped DOM operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DomOp {
	Html,
	Text,
	Attr,
	RemoveAttr,
	AddClass,
	RemoveClass,
	ToggleClass,
	Css,
	Append,
	Prepend,
	Empty,
	Remove,
	Trigger,
}

/// Expected positional arguments, declared per operation at the
/// registration site.
#[derive(Clone, Copy, Debug)]
enum Arity {
	Exact(usize),
	AtLeast(usize),
}

impl Arity {
	fn admits(self, count: usize) -> bool {
		match self {
			Arity::Exact(expected) => count == expected,
			Arity::AtLeast(minimum) => count >= minimum,
		}
	}
}

struct OpEntry {
	name: &'static str,
	op: DomOp,
	arity: Arity,
	expected: &'static str,
}

/// Operation lookup table. Wire names keep the camel case of the protocol.
const OPERATIONS: &[OpEntry] = &[
	OpEntry {
		name: "html",
		op: DomOp::Html,
		arity: Arity::Exact(1),
		expected: "(content)",
	},
	OpEntry {
		name: "text",
		op: DomOp::Text,
		arity: Arity::Exact(1),
		expected: "(content)",
	},
	OpEntry {
		name: "attr",
		op: DomOp::Attr,
		arity: Arity::Exact(2),
		expected: "(name, value)",
	},
	OpEntry {
		name: "removeAttr",
		op: DomOp::RemoveAttr,
		arity: Arity::Exact(1),
		expected: "(name)",
	},
	OpEntry {
		name: "addClass",
		op: DomOp::AddClass,
		arity: Arity::Exact(1),
		expected: "(class)",
	},
	OpEntry {
		name: "removeClass",
		op: DomOp::RemoveClass,
		arity: Arity::Exact(1),
		expected: "(class)",
	},
	OpEntry {
		name: "toggleClass",
		op: DomOp::ToggleClass,
		arity: Arity::Exact(1),
		expected: "(class)",
	},
	OpEntry {
		name: "css",
		op: DomOp::Css,
		arity: Arity::Exact(2),
		expected: "(property, value)",
	},
	OpEntry {
		name: "append",
		op: DomOp::Append,
		arity: Arity::Exact(1),
		expected: "(content)",
	},
	OpEntry {
		name: "prepend",
		op: DomOp::Prepend,
		arity: Arity::Exact(1),
		expected: "(content)",
	},
	OpEntry {
		name: "empty",
		op: DomOp::Empty,
		arity: Arity::Exact(0),
		expected: "()",
	},
	OpEntry {
		name: "remove",
		op: DomOp::Remove,
		arity: Arity::Exact(0),
		expected: "()",
	},
	OpEntry {
		name: "trigger",
		op: DomOp::Trigger,
		arity: Arity::AtLeast(1),
		expected: "(event, extra…)",
	},
];

fn lookup(name: &str) -> Option<&'static OpEntry> {
	OPERATIONS.iter().find(|entry| entry.name == name)
}

/// Replays decoded replies against the live document.
///
/// Selector buckets resolve once and replay their commands in order against
/// every matched element; reserved integer buckets dispatch global commands
/// by opcode. Every failure is contained per command: logged, tallied,
/// never propagated.
pub struct Interpreter {
	document: web_sys::Document,
	queue: Rc<FlushQueue>,
	options: InterpreterOptions,
}

impl Interpreter {
	#[must_use]
	pub fn new(document: web_sys::Document, queue: Rc<FlushQueue>, options: InterpreterOptions) -> Self {
		Self { document, queue, options }
	}

	/// Applies a whole reply. Returns the tally; afterwards the flush queue
	/// is marked dirty when any DOM operation ran, so live bindings catch
	/// up with the mutations.
	#[instrument(skip(self, reply))]
	pub fn apply(&self, reply: &Reply) -> ApplyStats {
		let mut stats = ApplyStats::default();
		let mut mutated = false;
		for (key, commands) in reply.buckets() {
			if is_reserved_slot(key) {
				for command in commands {
					match self.apply_global(command) {
						Ok(()) => stats.executed += 1,
						Err(error) => {
							error!("Global command failed: {}", error);
							stats.failed += 1;
						}
					}
				}
			} else {
				self.apply_selector_bucket(key, commands, &mut stats, &mut mutated);
			}
		}
		if mutated {
			self.queue.mark_dirty(None);
		}
		stats
	}

	fn apply_selector_bucket(&self, selector: &str, commands: &[WireCommand], stats: &mut ApplyStats, mutated: &mut bool) {
		let span = trace_span!("selector bucket", selector);
		let _enter = span.enter();

		let elements = match self.document.query_selector_all(selector) {
			Ok(list) => collect_elements(&list),
			Err(_) => {
				error!("{}", ApplyError::MalformedTarget(selector.to_owned()));
				stats.failed += 1;
				return;
			}
		};
		if elements.is_empty() {
			warn!("{}", ApplyError::UnresolvedSelector(selector.to_owned()));
			stats.failed += 1;
			return;
		}

		for command in commands {
			match self.apply_to_elements(&elements, command) {
				Ok(()) => {
					stats.executed += 1;
					*mutated = true;
				}
				Err(error) => {
					error!("Command on {:?} failed: {}", selector, error);
					stats.failed += 1;
				}
			}
		}
	}

	fn apply_to_elements(&self, elements: &[Element], command: &WireCommand) -> Result<(), ApplyError> {
		if Opcode::from_code(command.c) != Some(Opcode::Generic) {
			return Err(ApplyError::UnknownOpcode(command.c));
		}
		let name = match command.a.first().and_then(Value::as_str) {
			Some(name) => name,
			None => {
				return Err(ApplyError::BadArguments {
					operation: "generic record",
					expected: "operation name in a[0]",
				})
			}
		};
		let entry = lookup(name).ok_or_else(|| ApplyError::UnsupportedOperation(name.to_owned()))?;
		let args = positional_args(&command.a[1..]);
		if !entry.arity.admits(args.len()) {
			return Err(ApplyError::BadArguments {
				operation: entry.name,
				expected: entry.expected,
			});
		}

		let mut first_error = None;
		for element in elements {
			if let Err(error) = apply_op(entry, element, args) {
				error!("{} on {:?}: {}", entry.name, element.tag_name(), error);
				if first_error.is_none() {
					first_error = Some(error);
				}
			}
		}
		trace!("Applied {:?} to {} element(s).", entry.op, elements.len());
		first_error.map_or(Ok(()), Err)
	}

	fn apply_global(&self, command: &WireCommand) -> Result<(), ApplyError> {
		match Opcode::from_code(command.c) {
			Some(Opcode::Alert) => {
				let message = command.a.first().and_then(Value::as_str).ok_or(ApplyError::BadArguments {
					operation: "alert",
					expected: "(message)",
				})?;
				let window = window()?;
				window.alert_with_message(message).map_err(|error| ApplyError::HandlerThrew("alert".to_owned(), describe(&error)))
			}
			Some(Opcode::Call) => {
				let name = command.a.first().and_then(Value::as_str).ok_or(ApplyError::BadArguments {
					operation: "call",
					expected: "(function, args)",
				})?;
				let window = window()?;
				let function = js_sys::Reflect::get(window.as_ref(), &JsValue::from_str(name))
					.ok()
					.and_then(|value| value.dyn_into::<js_sys::Function>().ok())
					.ok_or_else(|| ApplyError::MissingGlobalHandler(name.to_owned()))?;
				let arguments = js_sys::Array::new();
				if let Some(Value::Array(args)) = command.a.get(1) {
					for arg in args {
						arguments.push(&json_to_js(arg));
					}
				}
				function
					.apply(&JsValue::NULL, &arguments)
					.map(|_| ())
					.map_err(|error| ApplyError::HandlerThrew(name.to_owned(), describe(&error)))
			}
			Some(Opcode::Script) => {
				let source = command.a.first().and_then(Value::as_str).ok_or(ApplyError::BadArguments {
					operation: "script",
					expected: "(source)",
				})?;
				if !self.options.run_expressions {
					return Err(ApplyError::ExpressionsDisabled);
				}
				// Isolated scope, as on the producing side's contract.
				let wrapped = format!("(function(){{ {} }})();", source);
				js_sys::eval(&wrapped).map(|_| ()).map_err(|error| ApplyError::ExpressionFailed(describe(&error)))
			}
			Some(Opcode::Generic) | None => Err(ApplyError::UnknownOpcode(command.c)),
		}
	}
}

/// A leading nested sequence is the whole positional argument list;
/// otherwise the arguments pass through as-is. This is the wire
/// compatibility rule for variadic producers.
fn positional_args(args: &[Value]) -> &[Value] {
	match args.first() {
		Some(Value::Array(inner)) => inner.as_slice(),
		_ => args,
	}
}

fn apply_op(entry: &OpEntry, element: &Element, args: &[Value]) -> Result<(), ApplyError> {
	let text = |index: usize| -> Result<&str, ApplyError> {
		args.get(index).and_then(Value::as_str).ok_or(ApplyError::BadArguments {
			operation: entry.name,
			expected: entry.expected,
		})
	};
	let stringy = |index: usize| -> Result<String, ApplyError> {
		match args.get(index) {
			Some(Value::String(s)) => Ok(s.clone()),
			Some(Value::Number(n)) => Ok(n.to_string()),
			Some(Value::Bool(b)) => Ok(b.to_string()),
			_ => Err(ApplyError::BadArguments {
				operation: entry.name,
				expected: entry.expected,
			}),
		}
	};
	let throw = |error: JsValue| ApplyError::HandlerThrew(entry.name.to_owned(), describe(&error));

	match entry.op {
		DomOp::Html => {
			element.set_inner_html(text(0)?);
			Ok(())
		}
		DomOp::Text => {
			element.set_text_content(Some(text(0)?));
			Ok(())
		}
		DomOp::Attr => element.set_attribute(text(0)?, &stringy(1)?).map_err(throw),
		DomOp::RemoveAttr => element.remove_attribute(text(0)?).map_err(throw),
		DomOp::AddClass => element.class_list().add_1(text(0)?).map_err(throw),
		DomOp::RemoveClass => element.class_list().remove_1(text(0)?).map_err(throw),
		DomOp::ToggleClass => element.class_list().toggle(text(0)?).map(|_| ()).map_err(throw),
		DomOp::Css => {
			let html = element.dyn_ref::<web_sys::HtmlElement>().ok_or(ApplyError::BadArguments {
				operation: "css",
				expected: "an HTML element target",
			})?;
			html.style().set_property(text(0)?, &stringy(1)?).map_err(throw)
		}
		DomOp::Append => element.insert_adjacent_html("beforeend", text(0)?).map_err(throw),
		DomOp::Prepend => element.insert_adjacent_html("afterbegin", text(0)?).map_err(throw),
		DomOp::Empty => {
			element.set_inner_html("");
			Ok(())
		}
		DomOp::Remove => {
			element.remove();
			Ok(())
		}
		DomOp::Trigger => {
			let mut init = web_sys::CustomEventInit::new();
			init.bubbles(true);
			if let Some(extra) = args.get(1) {
				if extra.as_array().map_or(true, |items| !items.is_empty()) {
					init.detail(&json_to_js(extra));
				}
			}
			let event = web_sys::CustomEvent::new_with_event_init_dict(text(0)?, &init).map_err(throw)?;
			element.dispatch_event(event.as_ref()).map(|_| ()).map_err(throw)
		}
	}
}

fn window() -> Result<web_sys::Window, ApplyError> {
	web_sys::window().ok_or(ApplyError::BadArguments {
		operation: "global command",
		expected: "a window to dispatch on",
	})
}

fn collect_elements(list: &web_sys::NodeList) -> Vec<Element> {
	(0..list.length())
		.filter_map(|index| list.item(index))
		.filter_map(|node| node.dyn_into::<Element>().ok())
		.collect()
}

fn json_to_js(value: &Value) -> JsValue {
	js_sys::JSON::parse(&value.to_string()).unwrap_or(JsValue::NULL)
}

fn describe(error: &JsValue) -> String {
	error.as_string().unwrap_or_else(|| format!("{:?}", error))
}

fn is_reserved_slot(key: &str) -> bool {
	!key.is_empty() && key.bytes().all(|byte| byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
	use super::{is_reserved_slot, lookup, positional_args, Reply};
	use serde_json::{json, Value};

	#[test]
	fn reserved_slots_are_nonempty_digit_runs() {
		assert!(is_reserved_slot("0"));
		assert!(is_reserved_slot("17"));
		assert!(!is_reserved_slot(""));
		assert!(!is_reserved_slot("div.item"));
		assert!(!is_reserved_slot("4real"));
	}

	#[test]
	fn reply_preserves_bucket_and_command_order() {
		let reply = Reply::from_json(r##"{"#b":[{"c":255,"a":["html","x"]}],"0":[{"c":1,"a":["hi"]}],"#a":[{"c":255,"a":["empty"]},{"c":255,"a":["remove"]}]}"##).unwrap();
		let keys: Vec<_> = reply.buckets().iter().map(|(key, _)| key.clone()).collect();
		assert_eq!(keys, ["#b", "0", "#a"]);
		assert_eq!(reply.buckets()[2].1.len(), 2);
		assert_eq!(reply.buckets()[2].1[0].a[0], "empty");
	}

	#[test]
	fn malformed_buckets_are_dropped_not_fatal() {
		let reply = Reply::from_json(r#"{"good":[{"c":255,"a":["remove"]}],"bad":"nope"}"#).unwrap();
		assert_eq!(reply.buckets().len(), 1);
		assert_eq!(reply.buckets()[0].0, "good");
	}

	#[test]
	fn non_object_top_level_is_a_decode_error() {
		assert!(Reply::from_json("[1,2]").is_err());
	}

	#[test]
	fn leading_sequence_spreads_as_positional_arguments() {
		let nested = [json!(["a", "b"])];
		assert_eq!(positional_args(&nested), &[Value::from("a"), Value::from("b")][..]);

		let plain = [json!("a"), json!(["b"])];
		assert_eq!(positional_args(&plain), &plain[..]);
	}

	#[test]
	fn every_builder_convenience_has_a_table_entry() {
		for name in [
			"html",
			"text",
			"attr",
			"removeAttr",
			"addClass",
			"removeClass",
			"toggleClass",
			"css",
			"append",
			"prepend",
			"empty",
			"remove",
			"trigger",
		] {
			assert!(lookup(name).is_some(), "missing operation {:?}", name);
		}
		assert!(lookup("animate").is_none());
	}
}
