//! Template registry and rendering.
//!
//! Templates are Handlebars HTML files bundled into the binary from
//! `crates/infra/templates/`; a template's name is its file stem. The registry
//! is built once at startup and only read afterwards, so it is shared by
//! `Arc` without any locking.
//!
//! Values are HTML-escaped (`{{name}}`). The URL-bearing fields listed in
//! [`URL_FIELDS`] are parsed and restricted to `http`/`https` before they
//! reach a template, which then emits them unescaped (`{{{resetUrl}}}`).

use std::path::Path;

use handlebars::Handlebars;
use include_dir::{Dir, include_dir};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use mailqueue_core::{TemplateData, TemplateValue};

static BUILTIN_TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

/// Data keys that carry links and must hold a safe absolute URL.
pub const URL_FIELDS: [&str; 4] = ["resetUrl", "verifyUrl", "loginUrl", "signupUrl"];

/// Rendering contract used by the email sender.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, data: &TemplateData) -> Result<String, TemplateError>;
}

impl<R> TemplateRenderer for std::sync::Arc<R>
where
    R: TemplateRenderer + ?Sized,
{
    fn render(&self, name: &str, data: &TemplateData) -> Result<String, TemplateError> {
        (**self).render(name, data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template '{name}' not found. Available templates: {available:?}")]
    NotFound { name: String, available: Vec<String> },

    #[error("invalid {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    #[error("failed to render template '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: handlebars::RenderError,
    },

    #[error("failed to parse template '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("no templates found")]
    Empty,
}

/// Immutable name → compiled template lookup.
pub struct TemplateRegistry {
    engine: Handlebars<'static>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

impl TemplateRegistry {
    /// Registry with the templates bundled into the crate.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_sources(BUILTIN_TEMPLATES.files().filter_map(|file| {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                return None;
            }
            let name = template_name(path)?;
            let source = file.contents_utf8()?;
            Some((name, source.to_string()))
        }))
    }

    /// Registry from `(name, source)` pairs.
    ///
    /// Fails on the first template that does not parse, and when there are
    /// no templates at all.
    pub fn from_sources<I, N, S>(sources: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<str>,
    {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(false);

        for (name, source) in sources {
            let name = name.into();
            engine
                .register_template_string(&name, source)
                .map_err(|e| TemplateError::Parse {
                    name: name.clone(),
                    source: Box::new(e),
                })?;
        }

        if engine.get_templates().is_empty() {
            return Err(TemplateError::Empty);
        }

        Ok(Self { engine })
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engine.get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engine.has_template(name)
    }
}

fn template_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

impl TemplateRenderer for TemplateRegistry {
    fn render(&self, name: &str, data: &TemplateData) -> Result<String, TemplateError> {
        if !self.contains(name) {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
                available: self.names(),
            });
        }

        let context = render_context(data)?;
        self.engine
            .render(name, &context)
            .map_err(|source| TemplateError::Render {
                name: name.to_string(),
                source,
            })
    }
}

/// Build the render context, normalising URL fields on the way.
fn render_context(data: &TemplateData) -> Result<Map<String, JsonValue>, TemplateError> {
    let mut context: Map<String, JsonValue> = data
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();

    for field in URL_FIELDS {
        let Some(raw) = data.get(field).and_then(TemplateValue::as_str) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        let url = safe_url(field, raw)?;
        context.insert(field.to_string(), JsonValue::String(url.into()));
    }

    Ok(context)
}

fn safe_url(field: &str, raw: &str) -> Result<Url, TemplateError> {
    let url = Url::parse(raw).map_err(|e| TemplateError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TemplateError::InvalidUrl {
            field: field.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}
