use anyhow::Result;

use crate::hcl::ResourceSet;

/// One import block per object the run created, mapping the generated
/// resource address to the destination id so the generated configuration
/// adopts the objects without drift.
pub fn render(set: &ResourceSet) -> Result<String> {
    use serde_json::json;

    let handlebars = crate::export::get_handlebars();
    let imports: Vec<serde_json::Value> = set
        .imports()
        .into_iter()
        .map(|(address, id)| json!({ "address": address, "id": id }))
        .collect();

    let res = handlebars.render_template(&get_template(), &json!({ "imports": imports }))?;
    Ok(res)
}

pub fn get_template() -> String {
    include_str!("to_imports_tf.hbs").to_string()
}
