//! Desired-state documents
//!
//! A document is TOML (or JSON, chosen by file extension) with four
//! top-level tables:
//!
//! ```toml
//! [vars]
//! env = "dev"
//!
//! [kinds.subnet]
//! immutable = ["cidr", "network"]
//!
//! [resources.Vpc]
//! kind = "network"
//! properties = { cidr = "10.0.0.0/16", name = "${var.env}-vpc" }
//!
//! [resources.Private]
//! kind = "subnet"
//! properties = { cidr = "10.0.1.0/24", network = { ref = "Vpc" } }
//!
//! [outputs]
//! VpcId = { ref = "Vpc" }
//! ```
//!
//! Resources are declared in the order they appear in the file. `${var.NAME}` is replaced in every
//! string value; overlays may override variables and kind schemas.

use crate::error::{Error, Result};
use crate::model::{Model, Resource};
use crate::schema::Schemas;
use crate::state::Snapshot;
use crate::value::{Properties, Value};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// `${var.NAME}` placeholders
static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\{var\.([A-Za-z0-9_-]+)\}").expect("valid regex")
});

/// Serialization format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    /// `.json` files are JSON, anything else TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// One `[resources.<Id>]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

/// A parsed desired-state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub kinds: Schemas,
    #[serde(default)]
    pub resources: IndexMap<String, Declaration>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Document {
    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let parsed = match format {
            Format::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| Error::Document { message })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::Document {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let doc = Self::parse(&text, Format::from_path(path)).map_err(|e| match e {
            Error::Document { message } => Error::Document {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })?;
        log::debug!(
            "Loaded {} ({} resources, {} vars)",
            path.display(),
            doc.resources.len(),
            doc.vars.len()
        );
        Ok(doc)
    }

    /// Apply an overlay: its variables and kind schemas win
    ///
    /// Overlays cannot declare resources or outputs.
    pub fn overlay(&mut self, overlay: Document) -> Result<()> {
        if !overlay.resources.is_empty() || !overlay.outputs.is_empty() {
            return Err(Error::Document {
                message: "overlays may only set [vars] and [kinds]".into(),
            });
        }
        self.vars.extend(overlay.vars);
        self.kinds.merge(overlay.kinds);
        Ok(())
    }

    pub fn schemas(&self) -> &Schemas {
        &self.kinds
    }

    /// Build the resource model: interpolate, declare, validate
    pub fn to_model(&self) -> Result<Model> {
        let mut model = Model::new();
        for (id, decl) in &self.resources {
            let properties = decl
                .properties
                .iter()
                .map(|(key, value)| -> Result<(String, Value)> {
                    Ok((key.clone(), self.interpolate(value, id)?))
                })
                .collect::<Result<Properties>>()?;
            let mut resource = Resource::new(decl.kind.clone(), id.clone(), properties);
            resource.depends_on = decl.depends_on.clone();
            self.kinds.validate(&resource)?;
            model.insert(resource)?;
        }
        model.check_references()?;
        Ok(model)
    }

    /// Replace `${var.NAME}` in every string inside `value`
    fn interpolate(&self, value: &Value, owner: &str) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.expand(s, owner)?),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.interpolate(v, owner))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| -> Result<(String, Value)> {
                        Ok((k.clone(), self.interpolate(v, owner)?))
                    })
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    fn expand(&self, text: &str, owner: &str) -> Result<String> {
        if let Some(missing) = VAR_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .find(|name| !self.vars.contains_key(name.as_str()))
        {
            return Err(Error::Document {
                message: format!("{owner}: unknown variable '{}'", missing.as_str()),
            });
        }
        Ok(VAR_RE
            .replace_all(text, |caps: &regex::Captures<'_>| {
                self.vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }

    /// Resolve `[outputs]` against a snapshot
    ///
    /// References to resources not yet applied yield `None`.
    pub fn outputs(&self, snapshot: &Snapshot) -> Result<BTreeMap<String, Option<Value>>> {
        let mut resolved = BTreeMap::new();
        for (name, value) in &self.outputs {
            let mut unknown = None;
            value.for_each_ref(&mut |target| {
                if !self.resources.contains_key(target) && unknown.is_none() {
                    unknown = Some(target.to_string());
                }
            });
            if let Some(target) = unknown {
                return Err(Error::UnknownResource {
                    from: Some(format!("output {name}")),
                    target,
                });
            }
            let value = self.interpolate(value, &format!("output {name}"))?;
            let lookup = |target: &str| snapshot.physical_id(target).map(String::from);
            resolved.insert(name.clone(), value.resolve(&lookup).ok());
        }
        Ok(resolved)
    }
}

/// Load a document and apply overlays in order
pub fn load_with_overlays(path: &Path, overlays: &[impl AsRef<Path>]) -> Result<Document> {
    let mut doc = Document::load(path)?;
    for overlay in overlays {
        doc.overlay(Document::load(overlay.as_ref())?)?;
    }
    Ok(doc)
}

/// Render an output value for display; lists are comma-joined
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::List(items) => items.iter().map(render_output).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SnapshotEntry;
    use std::io::Write;

    const NETWORK: &str = r#"
        [vars]
        env = "dev"

        [kinds.subnet]
        immutable = ["cidr", "network"]
        required = ["cidr"]

        [resources.Vpc]
        kind = "network"
        properties = { cidr = "10.0.0.0/16", name = "${var.env}-vpc" }

        [resources.Private]
        kind = "subnet"
        properties = { cidr = "10.0.1.0/24", network = { ref = "Vpc" } }

        [resources.Fn]
        kind = "function"
        depends_on = ["Private"]
        properties = { env = { NODE_ENV = "${var.env}" } }

        [outputs]
        VpcId = { ref = "Vpc" }
        Subnets = [{ ref = "Private" }]
    "#;

    #[test]
    fn test_parse_and_build_model() {
        let doc = Document::parse(NETWORK, Format::Toml).unwrap();
        let model = doc.to_model().unwrap();
        assert_eq!(model.len(), 3);

        let vpc = model.get("Vpc").unwrap();
        assert_eq!(vpc.properties["name"], Value::from("dev-vpc"));

        let private = model.get("Private").unwrap();
        assert_eq!(private.references(), vec!["Vpc"]);

        let function = model.get("Fn").unwrap();
        assert_eq!(function.depends_on, vec!["Private"]);
        assert!(doc.schemas().get("subnet").is_immutable("network"));
    }

    #[test]
    fn test_declaration_order_follows_file() {
        let text = r#"
            [resources.Zeta]
            kind = "network"

            [resources.Alpha]
            kind = "network"

            [resources.Mid]
            kind = "network"
        "#;
        let toml_doc = Document::parse(text, Format::Toml).unwrap();
        let json_doc = Document::parse(
            r#"{"resources": {"Zeta": {"kind": "network"}, "Alpha": {"kind": "network"}, "Mid": {"kind": "network"}}}"#,
            Format::Json,
        )
        .unwrap();

        for doc in [toml_doc, json_doc] {
            let model = doc.to_model().unwrap();
            let declared: Vec<&str> = model.all_resources().map(|r| r.id.as_str()).collect();
            assert_eq!(declared, vec!["Zeta", "Alpha", "Mid"]);

            let graph = crate::graph::Dag::from_model(&model).unwrap();
            assert_eq!(graph.topological_order(), vec!["Zeta", "Alpha", "Mid"]);
        }
    }

    #[test]
    fn test_unknown_variable_names_var_and_resource() {
        let doc = Document::parse(
            r#"
            [resources.Vpc]
            kind = "network"
            properties = { name = "${var.stage}-vpc" }
            "#,
            Format::Toml,
        )
        .unwrap();
        let message = doc.to_model().unwrap_err().to_string();
        assert!(message.contains("stage"));
        assert!(message.contains("Vpc"));
    }

    #[test]
    fn test_reference_to_undeclared_resource() {
        let doc = Document::parse(
            r#"
            [resources.Subnet]
            kind = "subnet"
            properties = { network = { ref = "Missing" } }
            "#,
            Format::Toml,
        )
        .unwrap();
        assert!(matches!(
            doc.to_model(),
            Err(Error::UnknownResource { ref target, .. }) if target == "Missing"
        ));
    }

    #[test]
    fn test_unknown_top_level_table_is_rejected() {
        assert!(Document::parse("[resource.Vpc]\nkind = \"network\"\n", Format::Toml).is_err());
    }

    #[test]
    fn test_overlay_overrides_vars() {
        let mut doc = Document::parse(NETWORK, Format::Toml).unwrap();
        let overlay = Document::parse("[vars]\nenv = \"prod\"\n", Format::Toml).unwrap();
        doc.overlay(overlay).unwrap();
        let model = doc.to_model().unwrap();
        assert_eq!(model.get("Vpc").unwrap().properties["name"], Value::from("prod-vpc"));

        let bad = Document::parse(NETWORK, Format::Toml).unwrap();
        assert!(doc.overlay(bad).is_err());
    }

    #[test]
    fn test_json_document_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"resources": {{"Vpc": {{"kind": "network", "properties": {{"cidr": "10.0.0.0/16"}}}}}}}}"#
        )
        .unwrap();

        let doc = load_with_overlays(&path, &[] as &[&Path]).unwrap();
        assert_eq!(doc.to_model().unwrap().len(), 1);
    }

    #[test]
    fn test_outputs_resolve_against_snapshot() {
        let doc = Document::parse(NETWORK, Format::Toml).unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "Vpc",
            SnapshotEntry {
                kind: "network".into(),
                properties: Properties::new(),
                physical_id: "net-1".into(),
                dependencies: vec![],
            },
        );

        let outputs = doc.outputs(&snapshot).unwrap();
        assert_eq!(outputs["VpcId"], Some(Value::from("net-1")));
        assert_eq!(outputs["Subnets"], None);
        assert_eq!(render_output(&Value::List(vec!["a".into(), "b".into()])), "a,b");
    }
}
