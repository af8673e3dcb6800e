//! Workspace rendering: copies a template tree, substitutes placeholders,
//! and filters the container-group spec to the requested service subset.
//!
//! Recursive copy uses `walkdir`, an ecosystem crate for traversal rather
//! than a hand-rolled recursive `read_dir`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

const COMPOSE_TEMPLATE_NAME: &str = "docker-compose.branch.template.yaml";
const COMPOSE_OUTPUT_NAME: &str = "docker-compose.yaml";

/// Keys every render must supply; required to be actually substituted when
/// present in a text artifact (enforced only by the caller populating the
/// map — absence here is a caller bug, not an engine error).
pub const REQUIRED_KEYS: &[&str] = &["BRANCH_NAME", "PORT", "PORT_TTYD", "GEMINI_API_KEY"];

/// Copies `template_root` into `target_dir`, substituting `{{KEY}}`
/// placeholders in text artifacts and filtering the compose spec to
/// `services`.
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Render a template into a fresh workspace directory.
    ///
    /// # Errors
    /// Returns [`Error::Template`] if the template root or the compose
    /// template file is missing, or if `services` is empty or not a subset
    /// of the declared services.
    pub fn render(
        template_root: &Path,
        target_dir: &Path,
        substitutions: &HashMap<String, String>,
        services: &HashSet<String>,
    ) -> Result<()> {
        if !template_root.is_dir() {
            return Err(Error::template(format!(
                "template root does not exist: {}",
                template_root.display()
            )));
        }
        if services.is_empty() {
            return Err(Error::template("requested service set is empty"));
        }

        copy_tree(template_root, target_dir)?;
        substitute_placeholders(target_dir, substitutions)?;
        rename_template_files(target_dir)?;
        filter_compose_services(target_dir, substitutions, services)?;

        Ok(())
    }
}

fn copy_tree(template_root: &Path, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir)?;
    for entry in WalkDir::new(template_root).follow_links(true) {
        let entry = entry.map_err(|err| Error::template(err.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(template_root)
            .expect("walkdir yields paths under template_root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let destination = target_dir.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn is_text_artifact(relative: &Path) -> bool {
    let name = relative.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = relative.extension().and_then(|e| e.to_str()).unwrap_or("");
    name == ".env"
        || name == "Dockerfile"
        || matches!(ext, "yaml" | "yml" | "json" | "js" | "py")
        || relative
            .to_string_lossy()
            .replace('\\', "/")
            .contains(".gemini/")
}

/// Substitute `{{KEY}}` in every text artifact under `target_dir`. Unknown
/// placeholders are left intact and warn-logged, never an error.
fn substitute_placeholders(target_dir: &Path, substitutions: &HashMap<String, String>) -> Result<()> {
    for entry in WalkDir::new(target_dir) {
        let entry = entry.map_err(|err| Error::template(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(target_dir)
            .expect("walkdir yields paths under target_dir");
        if !is_text_artifact(relative) {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let rendered = replace_placeholders(&contents, substitutions, &relative.display().to_string());
        std::fs::write(entry.path(), rendered)?;
    }
    Ok(())
}

fn replace_placeholders(
    contents: &str,
    substitutions: &HashMap<String, String>,
    artifact_path: &str,
) -> String {
    let mut output = String::with_capacity(contents.len());
    let mut rest = contents;
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        if let Some(close) = after_open.find("}}") {
            let key = &after_open[..close];
            match substitutions.get(key) {
                Some(value) => output.push_str(value),
                None => {
                    warn!(key, artifact_path, "placeholder left unsubstituted");
                    output.push_str("{{");
                    output.push_str(key);
                    output.push_str("}}");
                }
            }
            rest = &after_open[close + 2..];
        } else {
            output.push_str("{{");
            rest = after_open;
        }
    }
    output.push_str(rest);
    output
}

/// Rename every `*.template.*` file under `.gemini/` (or anywhere else in
/// the tree) to its non-`.template.` sibling name, matching whichever
/// concrete file names the template ships.
fn rename_template_files(target_dir: &Path) -> Result<()> {
    let mut renames = Vec::new();
    for entry in WalkDir::new(target_dir) {
        let entry = entry.map_err(|err| Error::template(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == COMPOSE_TEMPLATE_NAME {
            continue;
        }
        if name.contains(".template.") {
            let stripped = name.replacen(".template.", ".", 1);
            let new_path = entry.path().with_file_name(stripped);
            renames.push((entry.path().to_path_buf(), new_path));
        }
    }
    for (from, to) in renames {
        std::fs::rename(from, to)?;
    }
    Ok(())
}

fn filter_compose_services(
    target_dir: &Path,
    substitutions: &HashMap<String, String>,
    services: &HashSet<String>,
) -> Result<()> {
    let source_path = target_dir.join(COMPOSE_TEMPLATE_NAME);
    let raw = std::fs::read_to_string(&source_path)
        .map_err(|_| Error::template(format!("missing {COMPOSE_TEMPLATE_NAME}")))?;
    let branch_name = substitutions.get("BRANCH_NAME").map(String::as_str).unwrap_or("");

    let mut doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;

    let top = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::template("compose spec is not a mapping"))?;

    let services_key = serde_yaml::Value::String("services".to_string());
    let declared = top
        .get(&services_key)
        .and_then(|v| v.as_mapping())
        .ok_or_else(|| Error::template("compose spec has no `services` key"))?
        .clone();

    let mut by_stripped_name: BTreeMap<String, serde_yaml::Value> = BTreeMap::new();
    for (key, value) in declared.iter() {
        let raw_name = key.as_str().unwrap_or_default().to_string();
        let stripped = strip_branch_suffix(&raw_name, branch_name);
        by_stripped_name.insert(stripped, value.clone());
    }

    let declared_names: HashSet<String> = by_stripped_name.keys().cloned().collect();
    let unknown: Vec<&String> = services.iter().filter(|s| !declared_names.contains(*s)).collect();
    if let Some(first) = unknown.first() {
        return Err(Error::invalid_request(format!("unknown service: {first}")));
    }

    let mut filtered = serde_yaml::Mapping::new();
    for service in services {
        let spec = by_stripped_name
            .get(service)
            .expect("validated against declared_names above")
            .clone();
        let rendered_name = if branch_name.is_empty() {
            service.clone()
        } else {
            format!("{service}-{branch_name}")
        };
        filtered.insert(serde_yaml::Value::String(rendered_name), spec);
    }

    top.insert(services_key, serde_yaml::Value::Mapping(filtered));

    let rendered = serde_yaml::to_string(&doc)?;
    std::fs::write(target_dir.join(COMPOSE_OUTPUT_NAME), rendered)?;
    std::fs::remove_file(&source_path)?;
    Ok(())
}

fn strip_branch_suffix(name: &str, branch_name: &str) -> String {
    let templated_suffix = "-{{BRANCH_NAME}}";
    if let Some(stripped) = name.strip_suffix(templated_suffix) {
        return stripped.to_string();
    }
    if !branch_name.is_empty() {
        let literal_suffix = format!("-{branch_name}");
        if name.to_lowercase().ends_with(&literal_suffix.to_lowercase()) {
            return name[..name.len() - literal_suffix.len()].to_string();
        }
    }
    name.to_string()
}

/// The set of service names declared by a rendered compose spec's source
/// template, for validation before a full render. `template_root` must
/// contain `docker-compose.branch.template.yaml`.
pub fn declared_services(template_root: &Path) -> Result<HashSet<String>> {
    let path = template_root.join(COMPOSE_TEMPLATE_NAME);
    let raw = std::fs::read_to_string(&path)
        .map_err(|_| Error::template(format!("missing {COMPOSE_TEMPLATE_NAME}")))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;
    let services = doc
        .get("services")
        .and_then(|v| v.as_mapping())
        .ok_or_else(|| Error::template("compose spec has no `services` key"))?;
    Ok(services
        .keys()
        .filter_map(|k| k.as_str())
        .map(|name| strip_branch_suffix(name, ""))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_template(root: &Path) {
        std::fs::create_dir_all(root.join(".gemini")).unwrap();
        std::fs::write(
            root.join("docker-compose.branch.template.yaml"),
            "services:\n  app-{{BRANCH_NAME}}:\n    image: app\n    ports:\n      - \"{{PORT}}:8000\"\n  db-{{BRANCH_NAME}}:\n    image: postgres\nnetworks:\n  default:\n    name: net\n",
        )
        .unwrap();
        std::fs::write(root.join(".env"), "PORT={{PORT}}\nKEY={{GEMINI_API_KEY}}\n").unwrap();
        std::fs::write(
            root.join(".gemini/settings.template.json"),
            "{\"key\": \"{{GEMINI_API_KEY}}\"}",
        )
        .unwrap();
    }

    fn substitutions() -> HashMap<String, String> {
        [
            ("BRANCH_NAME", "alpha"),
            ("PORT", "8001"),
            ("PORT_TTYD", "9001"),
            ("GEMINI_API_KEY", "test-api-key-for-development"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn renders_single_service_and_substitutes_placeholders() {
        let template_dir = tempfile::tempdir().unwrap();
        write_template(template_dir.path());
        let target_dir = tempfile::tempdir().unwrap();

        let services: HashSet<String> = ["app".to_string()].into_iter().collect();
        TemplateRenderer::render(
            template_dir.path(),
            target_dir.path(),
            &substitutions(),
            &services,
        )
        .unwrap();

        let env = std::fs::read_to_string(target_dir.path().join(".env")).unwrap();
        assert_eq!(env, "PORT=8001\nKEY=test-api-key-for-development\n");

        let compose = std::fs::read_to_string(target_dir.path().join("docker-compose.yaml")).unwrap();
        assert!(compose.contains("app-alpha"));
        assert!(!compose.contains("db-alpha"));

        let settings_path = target_dir.path().join(".gemini/settings.json");
        assert!(settings_path.is_file());
        let settings = std::fs::read_to_string(settings_path).unwrap();
        assert!(settings.contains("test-api-key-for-development"));
    }

    #[test]
    fn multi_service_render_keeps_both() {
        let template_dir = tempfile::tempdir().unwrap();
        write_template(template_dir.path());
        let target_dir = tempfile::tempdir().unwrap();

        let services: HashSet<String> = ["app".to_string(), "db".to_string()].into_iter().collect();
        TemplateRenderer::render(
            template_dir.path(),
            target_dir.path(),
            &substitutions(),
            &services,
        )
        .unwrap();

        let compose = std::fs::read_to_string(target_dir.path().join("docker-compose.yaml")).unwrap();
        assert!(compose.contains("app-alpha"));
        assert!(compose.contains("db-alpha"));
        assert!(compose.contains("net"));
    }

    #[test]
    fn unknown_service_is_rejected() {
        let template_dir = tempfile::tempdir().unwrap();
        write_template(template_dir.path());
        let target_dir = tempfile::tempdir().unwrap();

        let services: HashSet<String> = ["nope".to_string()].into_iter().collect();
        let err = TemplateRenderer::render(
            template_dir.path(),
            target_dir.path(),
            &substitutions(),
            &services,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn empty_service_set_is_rejected() {
        let template_dir = tempfile::tempdir().unwrap();
        write_template(template_dir.path());
        let target_dir = tempfile::tempdir().unwrap();

        let services: HashSet<String> = HashSet::new();
        let err = TemplateRenderer::render(
            template_dir.path(),
            target_dir.path(),
            &substitutions(),
            &services,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
    }

    #[test]
    fn unknown_placeholder_is_left_intact() {
        let subs: HashMap<String, String> = [("BRANCH_NAME".to_string(), "alpha".to_string())].into();
        let rendered = replace_placeholders("{{BRANCH_NAME}}-{{MISSING}}", &subs, "x.env");
        assert_eq!(rendered, "alpha-{{MISSING}}");
    }
}
