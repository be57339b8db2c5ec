//! Reading the charm metadata that names the project and links its docs.

use std::fs;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{GatekeeperError, Result};

pub const METADATA_FILENAME: &str = "metadata.yaml";
pub const CHARMCRAFT_FILENAME: &str = "charmcraft.yaml";

const METADATA_NAME_KEY: &str = "name";
const METADATA_DOCS_KEY: &str = "docs";

/// Information about the charm the docs belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    /// URL of the index topic, absent until the first reconcile creates one.
    pub docs: Option<String>,
}

/// Load the metadata from `metadata.yaml`, falling back to `charmcraft.yaml`.
pub fn get(base_path: &Path) -> Result<Metadata> {
    let metadata_yaml = base_path.join(METADATA_FILENAME);
    if metadata_yaml.is_file() {
        let document = load_yaml(&metadata_yaml)?;
        return Ok(Metadata {
            name: required_string(&document, METADATA_NAME_KEY, &metadata_yaml)?,
            docs: optional_string(&document, METADATA_DOCS_KEY),
        });
    }

    let charmcraft_yaml = base_path.join(CHARMCRAFT_FILENAME);
    if charmcraft_yaml.is_file() {
        let document = load_yaml(&charmcraft_yaml)?;
        let docs = document
            .get("links")
            .and_then(|links| links.get("documentation"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        return Ok(Metadata {
            name: required_string(&document, METADATA_NAME_KEY, &charmcraft_yaml)?,
            docs,
        });
    }

    Err(GatekeeperError::Input(format!(
        "could not find {METADATA_FILENAME} or {CHARMCRAFT_FILENAME}, looked in folder: {}",
        base_path.display()
    )))
}

fn load_yaml(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|error| {
        GatekeeperError::Input(format!("failed to read {}: {error}", path.display()))
    })?;
    let document: Value = serde_yaml::from_str(&content).map_err(|error| {
        GatekeeperError::Input(format!("malformed metadata file {}: {error}", path.display()))
    })?;
    if !document.is_mapping() {
        return Err(GatekeeperError::Input(format!(
            "metadata file does not contain a mapping at the root: {}",
            path.display()
        )));
    }
    Ok(document)
}

fn required_string(document: &Value, key: &str, path: &Path) -> Result<String> {
    match document.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(GatekeeperError::Input(format!(
            "{key:?} is missing or empty in {}",
            path.display()
        ))),
    }
}

fn optional_string(document: &Value, key: &str) -> Option<String> {
    document
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_name_and_docs_from_metadata_yaml() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join(METADATA_FILENAME),
            "name: my-charm\ndocs: https://discourse.example.com/t/my-charm/1\n",
        )
        .expect("write metadata");

        let metadata = get(temp.path()).unwrap();
        assert_eq!(metadata.name, "my-charm");
        assert_eq!(
            metadata.docs.as_deref(),
            Some("https://discourse.example.com/t/my-charm/1")
        );
    }

    #[test]
    fn docs_key_is_optional() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(METADATA_FILENAME), "name: my-charm\n").expect("write metadata");
        let metadata = get(temp.path()).unwrap();
        assert!(metadata.docs.is_none());
    }

    #[test]
    fn falls_back_to_charmcraft_yaml_links() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join(CHARMCRAFT_FILENAME),
            "name: my-charm\nlinks:\n  documentation: https://discourse.example.com/t/my-charm/1\n",
        )
        .expect("write charmcraft");

        let metadata = get(temp.path()).unwrap();
        assert_eq!(metadata.name, "my-charm");
        assert_eq!(
            metadata.docs.as_deref(),
            Some("https://discourse.example.com/t/my-charm/1")
        );
    }

    #[test]
    fn missing_files_are_an_input_error() {
        let temp = tempdir().expect("tempdir");
        assert!(matches!(
            get(temp.path()),
            Err(GatekeeperError::Input(_))
        ));
    }

    #[test]
    fn missing_name_is_an_input_error() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(METADATA_FILENAME), "docs: something\n")
            .expect("write metadata");
        assert!(get(temp.path()).is_err());
    }

    #[test]
    fn malformed_yaml_is_an_input_error() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(METADATA_FILENAME), "name: [unclosed\n")
            .expect("write metadata");
        assert!(get(temp.path()).is_err());
    }

    #[test]
    fn non_mapping_root_is_an_input_error() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(METADATA_FILENAME), "- just\n- a list\n")
            .expect("write metadata");
        assert!(get(temp.path()).is_err());
    }
}
