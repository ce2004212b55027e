//! Step-tree documents: load, render with the change sets, and decode.
//!
//! A document is a minijinja template that renders to YAML. The rendered YAML is
//! decoded into a [`CheckNode`] tree by [`crate::core::check_tree`].

use std::fs;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::core::changes::ChangeSet;
use crate::core::check_tree::{CheckNode, decode_document};
use crate::error::ConfigError;

/// Document used when none is given: build, vet and format in parallel, then compile tests.
pub const DEFAULT_DOCUMENT: &str = r#"
- parallel:
{% if packages %}
    - run:
        name: build
        command: go build {{ _packages_ }}
    - run:
        name: vet
        command: go vet {{ _packages_ }}
{% endif %}
{% if files %}
    - run:
        name: fmt
        command: gofmt -l {{ _files_ }}
{% endif %}
{% if packages %}
- run:
    name: test compile
    description: Compiling and initializing tests (but not running them)
    command: |
      go test -run non-existent-test-name-!!! {{ _packages_ }}
{% endif %}
"#;

/// Variables exposed to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateData {
    pub files: Vec<String>,
    #[serde(rename = "_files_")]
    pub files_joined: String,
    pub dirs: Vec<String>,
    #[serde(rename = "_dirs_")]
    pub dirs_joined: String,
    pub trees: Vec<String>,
    #[serde(rename = "_trees_")]
    pub trees_joined: String,
    /// Older name for `trees`.
    #[serde(rename = "topDirs")]
    pub top_dirs: Vec<String>,
    #[serde(rename = "_topDirs_")]
    pub top_dirs_joined: String,
    pub packages: Vec<String>,
    #[serde(rename = "_packages_")]
    pub packages_joined: String,
    #[serde(rename = "gitRoot")]
    pub git_root: String,
    #[serde(rename = "workRoot")]
    pub work_root: String,
    pub root: String,
}

impl TemplateData {
    pub fn new(changes: &ChangeSet, git_root: &Path, work_root: &Path, root: &Path) -> Self {
        Self {
            files: changes.files.clone(),
            files_joined: changes.files.join(" "),
            dirs: changes.dirs.clone(),
            dirs_joined: changes.dirs.join(" "),
            trees: changes.trees.clone(),
            trees_joined: changes.trees.join(" "),
            top_dirs: changes.trees.clone(),
            top_dirs_joined: changes.trees.join(" "),
            packages: changes.packages.clone(),
            packages_joined: changes.packages.join(" "),
            git_root: git_root.display().to_string(),
            work_root: work_root.display().to_string(),
            root: root.display().to_string(),
        }
    }
}

/// Raw document text from `path`, or the built-in default.
pub fn read_document(path: Option<&Path>) -> Result<String, ConfigError> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(DEFAULT_DOCUMENT.to_string()),
    }
}

/// Render the document template. Undefined variables are errors.
pub fn render_document(raw: &str, data: &TemplateData) -> Result<String, ConfigError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(raw, data).map_err(|error| ConfigError::Render {
        template: raw.to_string(),
        error,
    })
}

/// Parse a rendered document into a check tree.
///
/// Parse errors carry the rendered document so it can be inspected.
pub fn parse_document(rendered: &str) -> Result<CheckNode, ConfigError> {
    let value: Value = serde_yaml::from_str(rendered).map_err(|error| ConfigError::Parse {
        document: rendered.to_string(),
        error,
    })?;
    let tree = decode_document(&value)?;
    debug!(steps = tree.steps().len(), "parsed check tree");
    Ok(tree)
}

/// Render and parse in one go.
pub fn load_check_tree(raw: &str, data: &TemplateData) -> Result<CheckNode, ConfigError> {
    let rendered = render_document(raw, data)?;
    debug!(rendered = %rendered, "rendered document");
    parse_document(&rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check_tree::RunStep;

    fn data(files: &[&str], packages: &[&str]) -> TemplateData {
        let changes = ChangeSet {
            files: files.iter().map(|f| f.to_string()).collect(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            ..ChangeSet::default()
        };
        TemplateData::new(
            &changes,
            Path::new("/repo"),
            Path::new("/tmp/work"),
            Path::new("/tmp/work/src/m"),
        )
    }

    fn run(name: &str, description: Option<&str>, command: &str) -> CheckNode {
        CheckNode::Run(RunStep {
            name: name.to_string(),
            description: description.map(str::to_string),
            command: command.to_string(),
        })
    }

    #[test]
    fn default_document_with_changes() {
        let tree = load_check_tree(DEFAULT_DOCUMENT, &data(&["x.go"], &["a", "b"])).expect("load");

        let expected = CheckNode::Serial(vec![
            CheckNode::Parallel(vec![
                run("build", None, "go build a b"),
                run("vet", None, "go vet a b"),
                run("fmt", None, "gofmt -l x.go"),
            ]),
            run(
                "test compile",
                Some("Compiling and initializing tests (but not running them)"),
                "go test -run non-existent-test-name-!!! a b\n",
            ),
        ]);
        assert_eq!(tree, expected);
    }

    #[test]
    fn default_document_without_packages_only_formats() {
        let tree = load_check_tree(DEFAULT_DOCUMENT, &data(&["x.go"], &[])).expect("load");
        assert_eq!(
            tree,
            CheckNode::Serial(vec![CheckNode::Parallel(vec![run(
                "fmt",
                None,
                "gofmt -l x.go"
            )])])
        );
    }

    #[test]
    fn default_document_without_changes_is_empty_parallel() {
        let tree = load_check_tree(DEFAULT_DOCUMENT, &data(&[], &[])).expect("load");
        assert_eq!(tree, CheckNode::Serial(vec![CheckNode::Parallel(Vec::new())]));
        assert!(tree.steps().is_empty());
    }

    #[test]
    fn exposes_roots_and_list_variables() {
        let raw = concat!(
            "- run:\n    name: roots\n    command: echo {{ gitRoot }} {{ workRoot }} {{ root }}",
            " {{ files | length }} {{ _topDirs_ }}\n",
        );
        let mut template = data(&["a.go", "b.go"], &[]);
        template.top_dirs_joined = "p q".to_string();
        let tree = load_check_tree(raw, &template).expect("load");
        assert_eq!(
            tree.steps()[0].command,
            "echo /repo /tmp/work /tmp/work/src/m 2 p q"
        );
    }

    #[test]
    fn undefined_variable_is_a_render_error() {
        let err = render_document("{{ nope }}", &data(&[], &[])).unwrap_err();
        assert!(matches!(err, ConfigError::Render { .. }));
    }

    #[test]
    fn parse_error_shows_rendered_document() {
        let err = parse_document("- run: [unclosed\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unable to parse config file"));
        assert!(msg.contains("- run: [unclosed"));
    }

    #[test]
    fn template_data_serializes_original_names() {
        let json = serde_json::to_value(data(&["x.go"], &["a"])).expect("json");
        assert_eq!(json["_files_"], "x.go");
        assert_eq!(json["_packages_"], "a");
        assert_eq!(json["gitRoot"], "/repo");
        assert!(json["topDirs"].is_array());
    }

    #[test]
    fn missing_document_file_is_a_read_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_document(Some(&temp.path().join("absent.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
