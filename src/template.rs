//! Pluggable page rendering.
//!
//! The router does not care where templates come from. It only needs
//! something that turns a template name and a data value into bytes; plug
//! one in with [`Router::renderer`](crate::Router::renderer) and call
//! [`Context::render`](crate::Context::render) from a handler.
//!
//! [`MiniJinjaRenderer`] is the bundled implementation.

use std::path::Path;

use minijinja::Environment;
use serde_json::Value;
use thiserror::Error;

/// A rendering failure.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Renders a named template with `data` into bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<Vec<u8>, RenderError>;
}

/// A [`Renderer`] backed by a [`minijinja::Environment`].
///
/// ```rust
/// use sprig::MiniJinjaRenderer;
/// use sprig::template::Renderer;
///
/// let mut r = MiniJinjaRenderer::new();
/// r.add_template("hello.html", "hi {{ name }}").unwrap();
/// let out = r.render("hello.html", &serde_json::json!({ "name": "alice" })).unwrap();
/// assert_eq!(out, b"hi alice");
/// ```
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Self {
        Self { env: Environment::new() }
    }

    /// Loads templates lazily from `dir`; names are paths relative to it.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(dir));
        Self { env }
    }

    /// Registers a template from source. Syntax errors surface here.
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), RenderError> {
        self.env.add_template_owned(name.into(), source.into())?;
        Ok(())
    }
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MiniJinjaRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<Vec<u8>, RenderError> {
        let tmpl = self.env.get_template(template)?;
        Ok(tmpl.render(data)?.into_bytes())
    }
}
