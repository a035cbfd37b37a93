use crate::expr::ExprSnippet;
use core::fmt::{self, Display, Formatter};
use hashbrown::HashMap;
use serde_json::{Map, Value};

/// Command discriminator on the wire.
///
/// Selector-scoped records always carry [`Opcode::Generic`] plus the operation
/// name as their first argument; the remaining opcodes identify fixed global
/// behaviors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Opcode {
	Alert,
	Call,
	Script,
	Generic,
}

impl Opcode {
	#[must_use]
	pub fn code(self) -> u8 {
		match self {
			Opcode::Alert => 1,
			Opcode::Call => 2,
			Opcode::Script => 3,
			Opcode::Generic => 0xFF,
		}
	}

	#[must_use]
	pub fn from_code(code: u8) -> Option<Self> {
		match code {
			1 => Some(Opcode::Alert),
			2 => Some(Opcode::Call),
			3 => Some(Opcode::Script),
			0xFF => Some(Opcode::Generic),
			_ => None,
		}
	}
}

/// One argument value: a primitive, an ordered sequence, an ordered mapping
/// or an executable snippet (see [`ExprSnippet`] for how the latter crosses
/// the serialization boundary).
#[derive(Clone, Debug)]
pub enum Arg {
	Null,
	Bool(bool),
	Num(f64),
	Str(String),
	Seq(Vec<Arg>),
	Map(Vec<(String, Arg)>),
	Expr(ExprSnippet),
}

impl Arg {
	/// Renders into a JSON value, recording expression substitutions along
	/// the way. Expressions become their placeholder tokens; the final
	/// encoding pass swaps the quoted tokens for raw source text.
	fn to_wire(&self, substitutions: &mut Vec<(String, String)>) -> Value {
		match self {
			Arg::Null => Value::Null,
			Arg::Bool(b) => Value::Bool(*b),
			Arg::Num(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
			Arg::Str(s) => Value::String(s.clone()),
			Arg::Seq(items) => Value::Array(items.iter().map(|item| item.to_wire(substitutions)).collect()),
			Arg::Map(entries) => {
				let mut map = Map::new();
				for (key, value) in entries {
					map.insert(key.clone(), value.to_wire(substitutions));
				}
				Value::Object(map)
			}
			Arg::Expr(snippet) => {
				substitutions.push((snippet.quoted_placeholder(), snippet.source().to_owned()));
				Value::String(snippet.placeholder())
			}
		}
	}
}

impl From<&str> for Arg {
	fn from(value: &str) -> Self {
		Arg::Str(value.to_owned())
	}
}
impl From<String> for Arg {
	fn from(value: String) -> Self {
		Arg::Str(value)
	}
}
impl From<bool> for Arg {
	fn from(value: bool) -> Self {
		Arg::Bool(value)
	}
}
impl From<f64> for Arg {
	fn from(value: f64) -> Self {
		Arg::Num(value)
	}
}
impl From<i32> for Arg {
	fn from(value: i32) -> Self {
		Arg::Num(f64::from(value))
	}
}
impl From<u32> for Arg {
	fn from(value: u32) -> Self {
		Arg::Num(f64::from(value))
	}
}
impl From<ExprSnippet> for Arg {
	fn from(value: ExprSnippet) -> Self {
		Arg::Expr(value)
	}
}
impl From<Vec<Arg>> for Arg {
	fn from(value: Vec<Arg>) -> Self {
		Arg::Seq(value)
	}
}

#[derive(Clone, Debug)]
pub struct Command {
	pub opcode: Opcode,
	pub args: Vec<Arg>,
}

#[derive(Clone, Debug)]
enum Entry {
	/// Commands replayed against every element matching the selector.
	Selector { selector: String, commands: Vec<Command> },
	/// A single global command, encoded under a reserved integer slot.
	Global(Command),
}

/// Ordered, selector-grouped accumulator of UI-mutation commands.
///
/// Commands for the same selector group into one bucket in first-touch order;
/// global commands (alert, function call, script) each occupy their own
/// reserved integer slot. The batch keeps a *current selector* so convenience
/// calls chain:
///
/// ```
/// use liana_dom::CommandBatch;
///
/// let mut batch = CommandBatch::for_selector("ul.messages");
/// batch.append("<li>hi</li>").add_class("has-news");
/// batch.select("a#refresh").attr("href", "#");
/// assert!(batch.render().contains("has-news"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CommandBatch {
	entries: Vec<Entry>,
	selector_slots: HashMap<String, usize>,
	current_selector: Option<String>,
}

impl CommandBatch {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// A fresh batch with `selector` as the current selector.
	#[must_use]
	pub fn for_selector(selector: impl Into<String>) -> Self {
		let mut batch = Self::new();
		batch.select(selector);
		batch
	}

	/// Sets the current selector for subsequent selector-scoped commands.
	pub fn select(&mut self, selector: impl Into<String>) -> &mut Self {
		self.current_selector = Some(selector.into());
		self
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Appends one command. `selector` overrides the current selector for
	/// this command only; with neither, the command lands in a global slot.
	pub fn cmd(&mut self, opcode: Opcode, args: Vec<Arg>, selector: Option<&str>) -> &mut Self {
		let command = Command { opcode, args };
		let target = selector.map(str::to_owned).or_else(|| self.current_selector.clone());
		match target {
			None => self.entries.push(Entry::Global(command)),
			Some(selector) => match self.selector_slots.get(&selector) {
				Some(&slot) => {
					if let Entry::Selector { commands, .. } = &mut self.entries[slot] {
						commands.push(command);
					}
				}
				None => {
					self.selector_slots.insert(selector.clone(), self.entries.len());
					self.entries.push(Entry::Selector {
						selector,
						commands: vec![command],
					});
				}
			},
		}
		self
	}

	fn generic(&mut self, operation: &str, mut args: Vec<Arg>, selector: Option<&str>) -> &mut Self {
		let mut full = Vec::with_capacity(args.len() + 1);
		full.push(Arg::from(operation));
		full.append(&mut args);
		self.cmd(Opcode::Generic, full, selector)
	}

	/// Any named operation with explicit arguments, for operations without a
	/// dedicated convenience method.
	pub fn op(&mut self, operation: &str, args: Vec<Arg>) -> &mut Self {
		self.generic(operation, args, None)
	}

	/// Replaces the element content with an HTML fragment.
	pub fn html(&mut self, content: impl Into<String>) -> &mut Self {
		self.generic("html", vec![Arg::Str(content.into())], None)
	}

	/// Replaces the element content with plain text.
	pub fn text(&mut self, content: impl Into<String>) -> &mut Self {
		self.generic("text", vec![Arg::Str(content.into())], None)
	}

	pub fn attr(&mut self, name: &str, value: impl Into<Arg>) -> &mut Self {
		self.generic("attr", vec![Arg::from(name), value.into()], None)
	}

	/// Resets an attribute to the empty string.
	pub fn clear(&mut self, name: &str) -> &mut Self {
		self.attr(name, "")
	}

	pub fn remove_attr(&mut self, name: &str) -> &mut Self {
		self.generic("removeAttr", vec![Arg::from(name)], None)
	}

	pub fn add_class(&mut self, class: &str) -> &mut Self {
		self.generic("addClass", vec![Arg::from(class)], None)
	}

	pub fn remove_class(&mut self, class: &str) -> &mut Self {
		self.generic("removeClass", vec![Arg::from(class)], None)
	}

	pub fn toggle_class(&mut self, class: &str) -> &mut Self {
		self.generic("toggleClass", vec![Arg::from(class)], None)
	}

	pub fn css(&mut self, property: &str, value: impl Into<Arg>) -> &mut Self {
		self.generic("css", vec![Arg::from(property), value.into()], None)
	}

	pub fn append(&mut self, content: impl Into<String>) -> &mut Self {
		self.generic("append", vec![Arg::Str(content.into())], None)
	}

	pub fn prepend(&mut self, content: impl Into<String>) -> &mut Self {
		self.generic("prepend", vec![Arg::Str(content.into())], None)
	}

	pub fn empty(&mut self) -> &mut Self {
		self.generic("empty", vec![], None)
	}

	pub fn remove(&mut self) -> &mut Self {
		self.generic("remove", vec![], None)
	}

	/// Dispatches a synthetic event on the matched elements. Extra arguments
	/// travel as the event detail.
	pub fn trigger(&mut self, event: &str, extra: Vec<Arg>) -> &mut Self {
		self.generic("trigger", vec![Arg::from(event), Arg::Seq(extra)], None)
	}

	/// Shows an alert box. Clears the current selector.
	pub fn alert(&mut self, message: impl Into<String>) -> &mut Self {
		self.current_selector = None;
		self.cmd(Opcode::Alert, vec![Arg::Str(message.into())], None)
	}

	/// Invokes a globally named function on the receiver. Clears the current
	/// selector.
	pub fn call(&mut self, function: &str, args: Vec<Arg>) -> &mut Self {
		self.current_selector = None;
		self.cmd(Opcode::Call, vec![Arg::from(function), Arg::Seq(args)], None)
	}

	/// Executes source text in an isolated scope on the receiver. Clears the
	/// current selector.
	pub fn script(&mut self, source: impl Into<String>) -> &mut Self {
		self.current_selector = None;
		self.cmd(Opcode::Script, vec![Arg::Str(source.into())], None)
	}

	/// Navigates the receiving document to `url`.
	pub fn redirect(&mut self, url: &str) -> &mut Self {
		let quoted = Value::String(url.to_owned()).to_string();
		self.script(format!("window.location.href = {};", quoted))
	}

	/// Concatenates `other` onto this batch: commands of a shared selector
	/// bucket keep this batch's commands first, global slots of `other`
	/// follow this batch's entries in order.
	pub fn merge(&mut self, other: CommandBatch) -> &mut Self {
		for entry in other.entries {
			match entry {
				Entry::Global(command) => self.entries.push(Entry::Global(command)),
				Entry::Selector { selector, commands } => match self.selector_slots.get(&selector) {
					Some(&slot) => {
						if let Entry::Selector { commands: existing, .. } = &mut self.entries[slot] {
							existing.extend(commands);
						}
					}
					None => {
						self.selector_slots.insert(selector.clone(), self.entries.len());
						self.entries.push(Entry::Selector { selector, commands });
					}
				},
			}
		}
		self
	}

	fn encode(&self) -> String {
		let mut substitutions = Vec::new();
		let mut root = Map::new();
		let mut next_slot = 0_usize;
		for entry in &self.entries {
			match entry {
				Entry::Global(command) => {
					root.insert(next_slot.to_string(), Value::Array(vec![encode_command(command, &mut substitutions)]));
					next_slot += 1;
				}
				Entry::Selector { selector, commands } => {
					if commands.is_empty() {
						continue;
					}
					let records = commands.iter().map(|command| encode_command(command, &mut substitutions)).collect();
					root.insert(selector.clone(), Value::Array(records));
				}
			}
		}
		let mut encoded = Value::Object(root).to_string();
		for (quoted_token, source) in substitutions {
			encoded = encoded.replace(&quoted_token, &source);
		}
		encoded
	}

	/// Encodes into the wire format, consuming the batch: a batch is
	/// single-use for sending. Display-only rendering is available through
	/// [`ToString`].
	#[must_use]
	pub fn render(self) -> String {
		self.encode()
	}
}

impl Display for CommandBatch {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.encode())
	}
}

fn encode_command(command: &Command, substitutions: &mut Vec<(String, String)>) -> Value {
	let args = command.args.iter().map(|arg| arg.to_wire(substitutions)).collect();
	let mut record = Map::new();
	record.insert("c".to_owned(), Value::Number(command.opcode.code().into()));
	record.insert("a".to_owned(), Value::Array(args));
	Value::Object(record)
}

#[cfg(test)]
mod tests {
	use super::{Arg, CommandBatch, Opcode};
	use crate::expr::ExprSnippet;
	use serde_json::Value;

	fn decoded(batch: &CommandBatch) -> serde_json::Map<String, Value> {
		serde_json::from_str(&batch.to_string()).expect("well-formed wire output")
	}

	#[test]
	fn selector_buckets_keep_first_touch_and_append_order() {
		let mut batch = CommandBatch::new();
		batch.select("#a").html("one");
		batch.select("#b").text("two");
		batch.select("#a").add_class("x");
		let root = decoded(&batch);
		let keys: Vec<_> = root.keys().cloned().collect();
		assert_eq!(keys, ["#a", "#b"]);
		let a_ops: Vec<_> = root["#a"]
			.as_array()
			.unwrap()
			.iter()
			.map(|record| record["a"][0].as_str().unwrap().to_owned())
			.collect();
		assert_eq!(a_ops, ["html", "addClass"]);
	}

	#[test]
	fn global_commands_take_numbered_slots_in_emission_order() {
		let mut batch = CommandBatch::new();
		batch.alert("hi");
		batch.select(".x").remove();
		batch.call("refresh", vec![Arg::from(3)]);
		let root = decoded(&batch);
		let keys: Vec<_> = root.keys().cloned().collect();
		assert_eq!(keys, ["0", ".x", "1"]);
		assert_eq!(root["0"][0]["c"], 1);
		assert_eq!(root["1"][0]["c"], 2);
		assert_eq!(root["1"][0]["a"][1], serde_json::json!([3.0]));
	}

	#[test]
	fn explicit_selector_overrides_current_without_replacing_it() {
		let mut batch = CommandBatch::for_selector("#main");
		batch.cmd(Opcode::Generic, vec![Arg::from("remove")], Some("#aside"));
		batch.empty();
		let root = decoded(&batch);
		assert!(root.contains_key("#aside"));
		assert_eq!(root["#main"][0]["a"][0], "empty");
	}

	#[test]
	fn merge_keeps_receiver_commands_first_per_target() {
		let mut a = CommandBatch::for_selector("a.links");
		a.remove();
		let mut b = CommandBatch::for_selector("a.links");
		b.add_class("red");
		a.merge(b);
		let root = decoded(&a);
		let ops: Vec<_> = root["a.links"]
			.as_array()
			.unwrap()
			.iter()
			.map(|record| record["a"][0].as_str().unwrap().to_owned())
			.collect();
		assert_eq!(ops, ["remove", "addClass"]);
	}

	#[test]
	fn merge_is_associative_per_target() {
		let make = |op: &str| {
			let mut batch = CommandBatch::for_selector("#t");
			batch.add_class(op);
			batch.alert(op);
			batch
		};
		let (mut left, b1, c1) = (make("a"), make("b"), make("c"));
		let mut bc = b1;
		bc.merge(c1);
		let mut right = make("a");
		right.merge(bc);

		left.merge(make("b"));
		left.merge(make("c"));

		let classes = |batch: &CommandBatch| {
			decoded(batch)["#t"]
				.as_array()
				.unwrap()
				.iter()
				.map(|record| record["a"][1].as_str().unwrap().to_owned())
				.collect::<Vec<_>>()
		};
		assert_eq!(classes(&left), classes(&right));
		assert_eq!(classes(&left), ["a", "b", "c"]);
	}

	#[test]
	fn expressions_substitute_as_raw_source() {
		let mut batch = CommandBatch::for_selector("#anim");
		batch.op(
			"animate",
			vec![Arg::Map(vec![("opacity".to_owned(), Arg::from(0.5))]), Arg::from(ExprSnippet::new("function(){ done(); }"))],
		);
		let wire = batch.render();
		assert!(wire.contains("function(){ done(); }"));
		assert!(!wire.contains("@expr["));
		assert!(!wire.contains("\"function(){ done(); }\""));
	}

	#[test]
	fn empty_batch_renders_empty_object() {
		assert_eq!(CommandBatch::new().render(), "{}");
	}

	#[test]
	fn redirect_renders_as_script() {
		let mut batch = CommandBatch::new();
		batch.redirect("https://example.com/?a=1");
		let root = decoded(&batch);
		assert_eq!(root["0"][0]["c"], 3);
		let source = root["0"][0]["a"][0].as_str().unwrap();
		assert!(source.contains("window.location.href"));
		assert!(source.contains("https://example.com/?a=1"));
	}
}
