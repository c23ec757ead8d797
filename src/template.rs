//! Confirmation template rendering.
//!
//! Templates are plain-text files with `{{ key }}` placeholders, one file
//! per template name. Rendering either produces a fully substituted body or
//! an error; partial output is never returned.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` could not be read: {source}")]
    Unreadable {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template `{name}` has unresolved placeholder `{placeholder}`")]
    UnresolvedPlaceholder { name: String, placeholder: String },
}

pub trait TemplateRender: Send + Sync {
    fn render(&self, name: &str, args: &[(&str, &str)]) -> Result<String, TemplateError>;
}

/// Renders templates stored as `<root>/<name>.txt`.
pub struct DirTemplates {
    root: PathBuf,
}

impl DirTemplates {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl TemplateRender for DirTemplates {
    fn render(&self, name: &str, args: &[(&str, &str)]) -> Result<String, TemplateError> {
        let path = self.root.join(format!("{name}.txt"));
        let template = std::fs::read_to_string(&path).map_err(|source| {
            TemplateError::Unreadable {
                name: name.to_string(),
                source,
            }
        })?;

        let mut rendered = template;
        for (key, value) in args {
            rendered = rendered.replace(&format!("{{{{ {key} }}}}"), value);
        }

        // Any placeholder left over means the caller forgot an argument;
        // refuse to emit the half-rendered text.
        if let Some(start) = rendered.find("{{") {
            let rest = &rendered[start..];
            let placeholder = rest
                .find("}}")
                .map(|end| rest[..end + 2].to_string())
                .unwrap_or_else(|| rest.to_string());
            return Err(TemplateError::UnresolvedPlaceholder {
                name: name.to_string(),
                placeholder: placeholder.trim().to_string(),
            });
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_dir(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("greeting.txt"), content).expect("write template");
        dir
    }

    #[test]
    fn substitutes_all_placeholders() {
        let dir = template_dir("Hello {{ name }}, your ticket is {{ number }}.");
        let templates = DirTemplates::new(dir.path().to_path_buf());

        let rendered = templates
            .render("greeting", &[("name", "Ada"), ("number", "SUP-1")])
            .expect("render");

        assert_eq!(rendered, "Hello Ada, your ticket is SUP-1.");
    }

    #[test]
    fn repeated_placeholders_are_all_replaced() {
        let dir = template_dir("{{ number }} and again {{ number }}");
        let templates = DirTemplates::new(dir.path().to_path_buf());

        let rendered = templates
            .render("greeting", &[("number", "SUP-7")])
            .expect("render");

        assert_eq!(rendered, "SUP-7 and again SUP-7");
    }

    #[test]
    fn unresolved_placeholder_is_an_error_not_partial_output() {
        let dir = template_dir("Hello {{ name }}, queue {{ queue }}.");
        let templates = DirTemplates::new(dir.path().to_path_buf());

        let err = templates
            .render("greeting", &[("name", "Ada")])
            .unwrap_err();

        match err {
            TemplateError::UnresolvedPlaceholder { placeholder, .. } => {
                assert_eq!(placeholder, "{{ queue }}");
            }
            other => panic!("expected unresolved placeholder, got {other:?}"),
        }
    }

    #[test]
    fn missing_template_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let templates = DirTemplates::new(dir.path().to_path_buf());

        assert!(matches!(
            templates.render("absent", &[]),
            Err(TemplateError::Unreadable { .. })
        ));
    }
}
