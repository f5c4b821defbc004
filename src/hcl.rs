use indexmap::IndexMap;

/// Resource names in generated code: lowercase, dashes to underscores.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase().replace('-', "_")
}

fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// An HCL attribute value. Multiline strings render as heredocs with the
/// content untouched, so values like trigger-pattern lists round-trip
/// byte-for-byte through the generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum HclValue {
    String(String),
    Bool(bool),
    Int(u64),
    List(Vec<HclValue>),
    Block(IndexMap<String, HclValue>),
    /// A bare expression, e.g. another resource's attribute address.
    Ref(String),
    /// Pre-rendered HCL emitted verbatim.
    Raw(String),
}

impl HclValue {
    fn render_into(&self, out: &mut String, key: &str, indent: usize) {
        let pad = " ".repeat(indent);
        match self {
            HclValue::String(s) if s.contains('\n') => {
                out.push_str(&format!("{}{} = <<EOT\n", pad, key));
                out.push_str(s);
                out.push_str(&format!("\n{}EOT\n", pad));
            }
            HclValue::String(s) => {
                out.push_str(&format!("{}{} = \"{}\"\n", pad, key, escape_string(s)));
            }
            HclValue::Bool(b) => {
                out.push_str(&format!("{}{} = {}\n", pad, key, b));
            }
            HclValue::Int(n) => {
                out.push_str(&format!("{}{} = {}\n", pad, key, n));
            }
            HclValue::List(items) => {
                if items.is_empty() {
                    out.push_str(&format!("{}{} = []\n", pad, key));
                    return;
                }
                out.push_str(&format!("{}{} = [\n", pad, key));
                let inner = " ".repeat(indent + 2);
                for item in items {
                    match item {
                        HclValue::String(s) => {
                            out.push_str(&format!("{}\"{}\",\n", inner, escape_string(s)))
                        }
                        HclValue::Ref(expr) | HclValue::Raw(expr) => {
                            out.push_str(&format!("{}{},\n", inner, expr))
                        }
                        HclValue::Bool(b) => out.push_str(&format!("{}{},\n", inner, b)),
                        HclValue::Int(n) => out.push_str(&format!("{}{},\n", inner, n)),
                        // Nested containers don't occur in generated resources.
                        other => out.push_str(&format!("{}{:?},\n", inner, other)),
                    }
                }
                out.push_str(&format!("{}]\n", pad));
            }
            HclValue::Block(attrs) => {
                out.push_str(&format!("{}{} {{\n", pad, key));
                for (inner_key, value) in attrs {
                    value.render_into(out, inner_key, indent + 2);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
            HclValue::Ref(expr) | HclValue::Raw(expr) => {
                out.push_str(&format!("{}{} = {}\n", pad, key, expr));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Resource,
    Data,
}

impl BlockKind {
    fn keyword(&self) -> &'static str {
        match self {
            BlockKind::Resource => "resource",
            BlockKind::Data => "data",
        }
    }
}

/// One generated `resource` or `data` block, mirroring an object the
/// target connector ensured this run.
#[derive(Debug, Clone)]
pub struct HclBlock {
    pub kind: BlockKind,
    pub type_name: String,
    pub name: String,
    pub attrs: IndexMap<String, HclValue>,
    /// Destination object id; resources carrying one get an import block.
    pub object_id: Option<String>,
}

impl HclBlock {
    pub fn resource(type_name: &str, name: &str) -> Self {
        HclBlock {
            kind: BlockKind::Resource,
            type_name: type_name.to_string(),
            name: sanitize_name(name),
            attrs: IndexMap::new(),
            object_id: None,
        }
    }

    pub fn data(type_name: &str, name: &str) -> Self {
        HclBlock {
            kind: BlockKind::Data,
            type_name: type_name.to_string(),
            name: sanitize_name(name),
            attrs: IndexMap::new(),
            object_id: None,
        }
    }

    pub fn set(&mut self, key: &str, value: HclValue) -> &mut Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn set_opt(&mut self, key: &str, value: Option<HclValue>) -> &mut Self {
        if let Some(value) = value {
            self.attrs.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.object_id = Some(id.to_string());
        self
    }

    /// The address other blocks use to reference this one.
    pub fn address(&self) -> String {
        match self.kind {
            BlockKind::Resource => format!("{}.{}", self.type_name, self.name),
            BlockKind::Data => format!("data.{}.{}", self.type_name, self.name),
        }
    }

    /// A reference to this block's `id` attribute.
    pub fn id_ref(&self) -> HclValue {
        HclValue::Ref(format!("{}.id", self.address()))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} \"{}\" \"{}\" {{\n",
            self.kind.keyword(),
            self.type_name,
            self.name
        ));
        for (key, value) in &self.attrs {
            value.render_into(&mut out, key, 2);
        }
        out.push('}');
        out
    }
}

/// Insertion-ordered, deduplicated collection of generated blocks. Data
/// sources render before resources; resources keep the dependency order
/// they were added in, so references always point backwards.
#[derive(Debug, Default)]
pub struct ResourceSet {
    data_sources: Vec<HclBlock>,
    resources: Vec<HclBlock>,
}

impl ResourceSet {
    pub fn new() -> Self {
        ResourceSet::default()
    }

    pub fn add(&mut self, block: HclBlock) {
        let bucket = match block.kind {
            BlockKind::Data => &mut self.data_sources,
            BlockKind::Resource => &mut self.resources,
        };
        if bucket
            .iter()
            .any(|b| b.type_name == block.type_name && b.name == block.name)
        {
            return;
        }
        bucket.push(block);
    }

    pub fn extend_blocks(&mut self, blocks: impl IntoIterator<Item = HclBlock>) {
        for block in blocks {
            self.add(block);
        }
    }

    pub fn get(&self, type_name: &str, name: &str) -> Option<&HclBlock> {
        let wanted = sanitize_name(name);
        self.data_sources
            .iter()
            .chain(self.resources.iter())
            .find(|b| b.type_name == type_name && b.name == wanted)
    }

    pub fn get_resource_mut(&mut self, type_name: &str, name: &str) -> Option<&mut HclBlock> {
        let wanted = sanitize_name(name);
        self.resources
            .iter_mut()
            .find(|b| b.type_name == type_name && b.name == wanted)
    }

    pub fn is_empty(&self) -> bool {
        self.data_sources.is_empty() && self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data_sources.len() + self.resources.len()
    }

    /// All blocks in render order: data sources first, then resources.
    pub fn blocks(&self) -> impl Iterator<Item = &HclBlock> {
        self.data_sources.iter().chain(self.resources.iter())
    }

    /// `(address, id)` pairs for every created resource, in render order.
    pub fn imports(&self) -> Vec<(String, String)> {
        self.resources
            .iter()
            .filter_map(|b| b.object_id.as_ref().map(|id| (b.address(), id.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("Prod-API"), "prod_api");
        assert_eq!(sanitize_name("already_fine"), "already_fine");
    }

    #[test]
    fn renders_scalar_attributes() {
        let mut block = HclBlock::resource("scalr_workspace", "prod-api");
        block.set("name", HclValue::String("prod-api".into()));
        block.set("auto_apply", HclValue::Bool(true));
        block.set("serial", HclValue::Int(7));

        let rendered = block.render();
        assert_eq!(
            rendered,
            "resource \"scalr_workspace\" \"prod_api\" {\n  name = \"prod-api\"\n  auto_apply = true\n  serial = 7\n}"
        );
    }

    #[test]
    fn multiline_string_round_trips_through_heredoc() {
        let patterns = "infra/**/*.tf\nmodules/*\n#release only";
        let mut block = HclBlock::resource("scalr_workspace", "ws");
        let mut vcs = IndexMap::new();
        vcs.insert(
            "trigger_patterns".to_string(),
            HclValue::String(patterns.into()),
        );
        block.set("vcs_repo", HclValue::Block(vcs));

        let rendered = block.render();
        // The heredoc body is emitted untouched: every source line appears
        // exactly once, unindented.
        assert!(rendered.contains("trigger_patterns = <<EOT\n"));
        assert!(rendered.contains("infra/**/*.tf\nmodules/*\n#release only\n"));
        assert!(rendered.contains("EOT"));
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let mut block = HclBlock::resource("scalr_variable", "v");
        block.set("value", HclValue::String(r#"say "hi" c:\tmp"#.into()));
        let rendered = block.render();
        assert!(rendered.contains(r#"value = "say \"hi\" c:\\tmp""#));
    }

    #[test]
    fn renders_references_and_lists() {
        let env = HclBlock::resource("scalr_environment", "acme");
        let mut block = HclBlock::resource("scalr_workspace", "ws");
        block.set("environment_id", env.id_ref());
        block.set(
            "remote_state_consumers",
            HclValue::List(vec![HclValue::Ref("scalr_workspace.other.id".into())]),
        );

        let rendered = block.render();
        assert!(rendered.contains("environment_id = scalr_environment.acme.id"));
        assert!(rendered.contains("remote_state_consumers = [\n    scalr_workspace.other.id,\n  ]"));
    }

    #[test]
    fn data_blocks_use_data_addresses() {
        let vcs = HclBlock::data("scalr_vcs_provider", "GitHub");
        assert_eq!(vcs.address(), "data.scalr_vcs_provider.github");
        match vcs.id_ref() {
            HclValue::Ref(expr) => assert_eq!(expr, "data.scalr_vcs_provider.github.id"),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn resource_set_dedups_and_orders() {
        let mut set = ResourceSet::new();
        set.add(HclBlock::resource("scalr_environment", "acme").with_id("env-1"));
        set.add(HclBlock::data("scalr_vcs_provider", "github"));
        set.add(HclBlock::resource("scalr_environment", "acme").with_id("env-dup"));

        assert_eq!(set.len(), 2);
        // Data sources first, then resources in insertion order.
        let order: Vec<String> = set.blocks().map(HclBlock::address).collect();
        assert_eq!(
            order,
            vec!["data.scalr_vcs_provider.github", "scalr_environment.acme"]
        );
        // The duplicate did not replace the original id.
        assert_eq!(set.imports(), vec![("scalr_environment.acme".to_string(), "env-1".to_string())]);
    }

    #[test]
    fn lookup_matches_sanitized_names() {
        let mut set = ResourceSet::new();
        set.add(HclBlock::resource("scalr_workspace", "prod-api"));
        assert!(set.get("scalr_workspace", "prod-api").is_some());
        assert!(set.get("scalr_workspace", "prod_api").is_some());
        assert!(set.get("scalr_workspace", "missing").is_none());
    }
}
