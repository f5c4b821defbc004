use anyhow::Result;

use crate::hcl::{HclBlock, ResourceSet};

/// Render the primary resource file: provider requirements, then every
/// ensured object in dependency order.
pub fn render(set: &ResourceSet) -> Result<String> {
    use serde_json::json;

    let handlebars = crate::export::get_handlebars();
    let blocks: Vec<String> = set.blocks().map(HclBlock::render).collect();

    let res = handlebars.render_template(&get_template(), &json!({ "blocks": blocks }))?;
    Ok(res)
}

pub fn get_template() -> String {
    include_str!("to_main_tf.hbs").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcl::HclValue;

    #[test]
    fn main_tf_contains_provider_header_and_blocks() {
        let mut set = ResourceSet::new();
        let mut env = HclBlock::resource("scalr_environment", "acme");
        env.set("name", HclValue::String("acme".into()));
        set.add(env);

        let rendered = render(&set).unwrap();
        assert!(rendered.starts_with("# Generated by scalr-migrate"));
        assert!(rendered.contains("source = \"scalr/scalr\""));
        assert!(rendered.contains("resource \"scalr_environment\" \"acme\""));
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut set = ResourceSet::new();
        let mut ws = HclBlock::resource("scalr_workspace", "prod-api");
        ws.set("name", HclValue::String("prod-api".into()));
        set.add(ws);

        assert_eq!(render(&set).unwrap(), render(&set).unwrap());
    }
}
