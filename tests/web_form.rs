#![cfg(target_arch = "wasm32")]

use liana_dom::{serialize_form, FormOptions};
use serde_json::{json, Value};
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, Element};

wasm_bindgen_test_configure!(run_in_browser);

static mut LOG_INITIALIZED: bool = false;

fn init_log() {
	unsafe {
		if !LOG_INITIALIZED {
			tracing_wasm::set_as_global_default();
			LOG_INITIALIZED = true;
		}
	}
}

fn form(id: &str, fields: &str) -> Element {
	let document = window().unwrap().document().unwrap();
	let element = document.create_element("form").unwrap();
	element.set_id(id);
	element.set_inner_html(fields);
	document.body().unwrap().append_child(element.as_ref()).unwrap();
	element
}

#[wasm_bindgen_test]
fn nested_names_reassemble_into_structure() {
	init_log();
	let root = form(
		"form-nested",
		"<input name=\"color\" value=\"red\">\
		 <input type=\"checkbox\" name=\"user[tags][]\" value=\"a\" checked>\
		 <input type=\"checkbox\" name=\"user[tags][]\" value=\"b\" checked>\
		 <input name=\"user[name]\" value=\"ada\">",
	);

	let result = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(
		result,
		json!({
			"color": "red",
			"user": {"tags": ["a", "b"], "name": "ada"}
		})
	);

	root.remove();
}

#[wasm_bindgen_test]
fn unchecked_boxes_follow_the_include_empty_rule() {
	init_log();
	let fields = "<input type=\"checkbox\" name=\"agree\" value=\"yes\">";
	let root = form("form-unchecked", fields);

	let skipped = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(skipped, json!({}));

	let included = Value::Object(serialize_form(
		&root,
		FormOptions {
			include_empty: true,
			..FormOptions::default()
		},
	));
	assert_eq!(included, json!({"agree": ""}));

	root.remove();
}

#[wasm_bindgen_test]
fn disabled_fields_need_opting_in() {
	init_log();
	let root = form(
		"form-disabled",
		"<input name=\"kept\" value=\"1\"><input name=\"off\" value=\"2\" disabled>",
	);

	let default = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(default, json!({"kept": "1"}));

	let everything = Value::Object(serialize_form(
		&root,
		FormOptions {
			include_disabled: true,
			..FormOptions::default()
		},
	));
	assert_eq!(everything, json!({"kept": "1", "off": "2"}));

	root.remove();
}

#[wasm_bindgen_test]
fn selects_contribute_selection_by_kind() {
	init_log();
	let root = form(
		"form-selects",
		"<select name=\"pets[]\" multiple>\
			<option value=\"cat\" selected>Cat</option>\
			<option value=\"dog\" selected>Dog</option>\
			<option value=\"emu\">Emu</option>\
		 </select>\
		 <select name=\"pick\">\
			<option value=\"\">First</option>\
			<option value=\"two\" selected>Second</option>\
		 </select>",
	);

	let result = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(result, json!({"pets": ["cat", "dog"], "pick": "two"}));

	root.remove();
}

#[wasm_bindgen_test]
fn option_text_backs_up_an_empty_value() {
	init_log();
	let root = form(
		"form-option-text",
		"<select name=\"pick\"><option value=\"\" selected>Fallback</option></select>",
	);

	let result = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(result, json!({"pick": "Fallback"}));

	root.remove();
}

#[wasm_bindgen_test]
fn unnamed_fields_are_ignored() {
	init_log();
	let root = form("form-unnamed", "<input value=\"x\"><textarea name=\"note\">hi</textarea>");

	let result = Value::Object(serialize_form(&root, FormOptions::default()));
	assert_eq!(result, json!({"note": "hi"}));

	root.remove();
}
