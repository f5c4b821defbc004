use anyhow::Result;

/// Remote backend configuration pointing the generated code at the
/// management workspace.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub hostname: String,
    pub organization: String,
    pub workspace: String,
}

pub fn render(backend: &BackendConfig) -> Result<String> {
    use serde_json::json;

    let handlebars = crate::export::get_handlebars();
    let res = handlebars.render_template(
        &get_template(),
        &json!({
            "hostname": backend.hostname,
            "organization": backend.organization,
            "workspace": backend.workspace,
        }),
    )?;
    Ok(res)
}

pub fn get_template() -> String {
    include_str!("to_backend_tf.hbs").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_renders_remote_block() {
        let rendered = render(&BackendConfig {
            hostname: "acme.scalr.io".into(),
            organization: "scalr-admin".into(),
            workspace: "acme".into(),
        })
        .unwrap();

        assert!(rendered.contains("backend \"remote\""));
        assert!(rendered.contains("hostname = \"acme.scalr.io\""));
        assert!(rendered.contains("organization = \"scalr-admin\""));
        assert!(rendered.contains("name = \"acme\""));
    }
}
