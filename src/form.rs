use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{instrument, warn};
use wasm_bindgen::JsCast;
use web_sys::{HtmlInputElement, HtmlOptionElement, HtmlSelectElement, HtmlTextAreaElement};

/// Inclusion rules for form serialization.
///
/// The wire names mirror the `data-submit` attribute payload
/// (`{"all": …, "disabled": …}`), the field names say what they mean.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FormOptions {
	/// Serialize disabled fields too.
	#[serde(rename = "disabled")]
	pub include_disabled: bool,
	/// Coerce absent values (unchecked boxes, …) to `""` instead of
	/// dropping the field.
	#[serde(rename = "all")]
	pub include_empty: bool,
}

/// One named field as scraped from the document, before nested-structure
/// reconstruction. `value` is `None` when the field currently has no value
/// to contribute (an unchecked checkbox or radio button).
#[derive(Clone, Debug, PartialEq)]
pub struct FlatField {
	pub name: String,
	pub value: Option<FieldValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
	One(String),
	Many(Vec<String>),
}

/// Splits a bracket-notation name into its path segments.
///
/// `user[tags][]` becomes `(["user", "tags"], true)`: the trailing empty
/// bracket pair marks append-to-sequence semantics. Empty interior segments
/// are dropped.
fn parse_path(name: &str) -> (Vec<&str>, bool) {
	let mut raw: Vec<&str> = name.split('[').collect();
	for segment in raw.iter_mut().skip(1) {
		*segment = segment.trim_end_matches(']');
	}
	let is_array_field = raw.last().map_or(false, |last| last.is_empty());
	let path = raw.into_iter().filter(|segment| !segment.is_empty()).collect();
	(path, is_array_field)
}

/// Reassembles flat bracket-notation fields into one nested mapping.
///
/// Intermediate mappings are created lazily; append-semantics leaves hold
/// sequences and accumulate duplicates in input order. A path component that
/// collides with an existing non-container value is overwritten
/// (last-write-wins).
#[must_use]
pub fn assemble(fields: Vec<FlatField>, options: FormOptions) -> Map<String, Value> {
	let mut result = Map::new();
	for field in fields {
		let value = match field.value {
			Some(value) => value,
			None if options.include_empty => FieldValue::One(String::new()),
			None => continue,
		};
		let (path, is_array_field) = parse_path(&field.name);
		if path.is_empty() {
			continue;
		}
		let slot = descend(&mut result, &path);
		if is_array_field {
			if !slot.is_array() {
				*slot = Value::Array(Vec::new());
			}
			if let Some(items) = slot.as_array_mut() {
				match value {
					FieldValue::One(one) => items.push(Value::String(one)),
					FieldValue::Many(many) => items.extend(many.into_iter().map(Value::String)),
				}
			}
		} else {
			*slot = match value {
				FieldValue::One(one) => Value::String(one),
				FieldValue::Many(many) => Value::Array(many.into_iter().map(Value::String).collect()),
			};
		}
	}
	result
}

/// Walks `path` through nested mappings, creating them as needed, and
/// returns the leaf slot.
fn descend<'a>(root: &'a mut Map<String, Value>, path: &[&str]) -> &'a mut Value {
	let (&leaf, interior) = path.split_last().expect("non-empty path");
	let mut map = root;
	for &segment in interior {
		let slot = map.entry(segment.to_owned()).or_insert_with(|| Value::Object(Map::new()));
		if !slot.is_object() {
			*slot = Value::Object(Map::new());
		}
		map = slot.as_object_mut().expect("just ensured an object");
	}
	map.entry(leaf.to_owned()).or_insert(Value::Null)
}

/// Flattens every named input-like descendant of `root` into one nested
/// mapping, honoring the inclusion rules of `options`.
#[instrument(skip(root))]
#[must_use]
pub fn serialize_form(root: &web_sys::Element, options: FormOptions) -> Map<String, Value> {
	assemble(scrape_fields(root, options), options)
}

/// Extracts `(name, value)` pairs from the input-like descendants of `root`,
/// by element kind: checkboxes and radio buttons contribute their value only
/// while checked, multi-selects contribute the sequence of selected option
/// values, single selects their selected value (option text as fallback),
/// everything else its raw value.
fn scrape_fields(root: &web_sys::Element, options: FormOptions) -> Vec<FlatField> {
	let list = match root.query_selector_all("input,textarea,select") {
		Ok(list) => list,
		Err(error) => {
			warn!("Form field query failed: {:?}", error);
			return Vec::new();
		}
	};

	let mut fields = Vec::new();
	for index in 0..list.length() {
		let node = match list.item(index) {
			Some(node) => node,
			None => continue,
		};

		if let Some(input) = node.dyn_ref::<HtmlInputElement>() {
			if input.disabled() && !options.include_disabled {
				continue;
			}
			let name = input.name();
			if name.trim().is_empty() {
				continue;
			}
			let kind = input.type_();
			let value = if kind == "checkbox" || kind == "radio" {
				if input.checked() {
					Some(FieldValue::One(input.value()))
				} else {
					None
				}
			} else {
				Some(FieldValue::One(input.value()))
			};
			fields.push(FlatField { name, value });
		} else if let Some(textarea) = node.dyn_ref::<HtmlTextAreaElement>() {
			if textarea.disabled() && !options.include_disabled {
				continue;
			}
			let name = textarea.name();
			if name.trim().is_empty() {
				continue;
			}
			fields.push(FlatField {
				name,
				value: Some(FieldValue::One(textarea.value())),
			});
		} else if let Some(select) = node.dyn_ref::<HtmlSelectElement>() {
			if select.disabled() && !options.include_disabled {
				continue;
			}
			let name = select.name();
			if name.trim().is_empty() {
				continue;
			}
			fields.push(FlatField {
				name,
				value: select_value(select),
			});
		}
	}
	fields
}

fn select_value(select: &HtmlSelectElement) -> Option<FieldValue> {
	let options = match select.query_selector_all("option") {
		Ok(list) => list,
		Err(error) => {
			warn!("Option query failed: {:?}", error);
			return None;
		}
	};

	let mut selected = Vec::new();
	for index in 0..options.length() {
		let option = match options.item(index).and_then(|node| node.dyn_into::<HtmlOptionElement>().ok()) {
			Some(option) => option,
			None => continue,
		};
		if option.selected() {
			let value = option.value();
			selected.push(if value.is_empty() { option.text() } else { value });
		}
	}

	if select.multiple() {
		Some(FieldValue::Many(selected))
	} else {
		selected.into_iter().next().map(FieldValue::One)
	}
}

#[cfg(test)]
mod tests {
	use super::{assemble, parse_path, FieldValue, FlatField, FormOptions};
	use serde_json::json;

	fn one(name: &str, value: &str) -> FlatField {
		FlatField {
			name: name.to_owned(),
			value: Some(FieldValue::One(value.to_owned())),
		}
	}

	#[test]
	fn path_parsing() {
		assert_eq!(parse_path("color"), (vec!["color"], false));
		assert_eq!(parse_path("user[name]"), (vec!["user", "name"], false));
		assert_eq!(parse_path("user[tags][]"), (vec!["user", "tags"], true));
		assert_eq!(parse_path("a[]"), (vec!["a"], true));
		assert_eq!(parse_path("[x]"), (vec!["x"], false));
	}

	#[test]
	fn scalar_field_flattens_to_plain_entry() {
		let result = assemble(vec![one("color", "red")], FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"color": "red"}));
	}

	#[test]
	fn repeated_array_fields_accumulate_in_input_order() {
		let fields = vec![one("user[tags][]", "a"), one("user[tags][]", "b")];
		let result = assemble(fields, FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"user": {"tags": ["a", "b"]}}));
	}

	#[test]
	fn duplicate_scalar_values_do_not_collapse() {
		let fields = vec![one("x[]", "v"), one("x[]", "v")];
		let result = assemble(fields, FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"x": ["v", "v"]}));
	}

	#[test]
	fn sequence_value_appends_element_wise() {
		let fields = vec![FlatField {
			name: "pets[]".to_owned(),
			value: Some(FieldValue::Many(vec!["cat".to_owned(), "dog".to_owned()])),
		}];
		let result = assemble(fields, FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"pets": ["cat", "dog"]}));
	}

	#[test]
	fn absent_value_is_skipped_or_coerced_by_include_empty() {
		let unchecked = || FlatField {
			name: "agree".to_owned(),
			value: None,
		};
		let skipped = assemble(vec![unchecked()], FormOptions::default());
		assert!(skipped.is_empty());

		let included = assemble(
			vec![unchecked()],
			FormOptions {
				include_empty: true,
				..FormOptions::default()
			},
		);
		assert_eq!(serde_json::Value::Object(included), json!({"agree": ""}));
	}

	#[test]
	fn conflicting_path_use_resolves_last_write_wins() {
		let fields = vec![one("a", "scalar"), one("a[b][]", "nested")];
		let result = assemble(fields, FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"a": {"b": ["nested"]}}));
	}

	#[test]
	fn plain_name_with_sequence_value_becomes_sequence() {
		let fields = vec![FlatField {
			name: "picks".to_owned(),
			value: Some(FieldValue::Many(vec!["1".to_owned()])),
		}];
		let result = assemble(fields, FormOptions::default());
		assert_eq!(serde_json::Value::Object(result), json!({"picks": ["1"]}));
	}

	#[test]
	fn options_deserialize_from_wire_names() {
		let options: FormOptions = serde_json::from_str(r#"{"all": true, "disabled": true}"#).unwrap();
		assert!(options.include_empty);
		assert!(options.include_disabled);
	}
}
