pub mod to_backend_tf;
pub mod to_imports_tf;
pub mod to_main_tf;

use std::fs;
use std::path::Path;

use anyhow::Result;
use handlebars::Handlebars;
use tracing::info;

use crate::hcl::ResourceSet;

pub use to_backend_tf::BackendConfig;

pub fn get_handlebars() -> Handlebars<'static> {
    Handlebars::new()
}

pub fn write_string_to_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Write the whole artifact set for one run. The directory is named after
/// the destination environment; the files are regenerated from scratch on
/// every invocation, never patched.
pub fn write_artifacts(set: &ResourceSet, backend: &BackendConfig, output_dir: &Path) -> Result<()> {
    write_string_to_file(&output_dir.join("main.tf"), &to_main_tf::render(set)?)?;
    write_string_to_file(
        &output_dir.join("backend.tf"),
        &to_backend_tf::render(backend)?,
    )?;
    write_string_to_file(&output_dir.join("imports.tf"), &to_imports_tf::render(set)?)?;
    info!(
        "Generated Terraform configuration in {}",
        output_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcl::{HclBlock, HclValue};

    #[test]
    fn writes_all_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("acme");

        let mut set = ResourceSet::new();
        let mut env = HclBlock::resource("scalr_environment", "acme");
        env.set("name", HclValue::String("acme".into()));
        set.add(env.with_id("env-1"));

        let backend = BackendConfig {
            hostname: "acme.scalr.io".into(),
            organization: "scalr-admin".into(),
            workspace: "acme".into(),
        };

        write_artifacts(&set, &backend, &target).unwrap();

        let main_tf = std::fs::read_to_string(target.join("main.tf")).unwrap();
        let backend_tf = std::fs::read_to_string(target.join("backend.tf")).unwrap();
        let imports_tf = std::fs::read_to_string(target.join("imports.tf")).unwrap();
        assert!(main_tf.contains("scalr_environment"));
        assert!(backend_tf.contains("backend \"remote\""));
        assert!(imports_tf.contains("id = \"env-1\""));
    }

    #[test]
    fn regeneration_overwrites_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("acme");
        let backend = BackendConfig {
            hostname: "acme.scalr.io".into(),
            organization: "scalr-admin".into(),
            workspace: "acme".into(),
        };

        let mut first = ResourceSet::new();
        first.add(HclBlock::resource("scalr_environment", "old").with_id("env-old"));
        write_artifacts(&first, &backend, &target).unwrap();

        let second = ResourceSet::new();
        write_artifacts(&second, &backend, &target).unwrap();

        let main_tf = std::fs::read_to_string(target.join("main.tf")).unwrap();
        assert!(!main_tf.contains("env-old"));
    }
}
