//! Template engine for dynamic responses.
//!
//! Uses Handlebars against a flat variable mapping: `cfg`, `env`, the
//! render timestamps and the `p<i>`/`q<i>`/`b<i>` capture groups.

use crate::error::RenderError;
use chrono::{Local, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::borrow::Cow;

/// Process environment variables with this prefix are exposed as `env.<NAME>`.
pub const ENV_PREFIX: &str = "MOCKDEV_";

/// Variables available to templates and scripts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct TemplateVars {
    values: Map<String, Value>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed variables for a service listening on `bind_addr`, taking
    /// `env` from the process environment.
    pub fn base(bind_addr: &str) -> Self {
        Self::with_environment(bind_addr, std::env::vars())
    }

    pub fn with_environment<I>(bind_addr: &str, environment: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let (address, port) = bind_addr.rsplit_once(':').unwrap_or((bind_addr, ""));
        let env: Map<String, Value> = environment
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(ENV_PREFIX)
                    .map(|stripped| (stripped.to_string(), Value::String(value)))
            })
            .collect();

        let mut vars = Self::new();
        vars.insert("cfg", json!({ "Address": address, "Port": port }));
        vars.insert("env", Value::Object(env));
        vars.insert("currentTime", Local::now().to_rfc3339());
        vars.insert(
            "currentTime_GMT",
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        vars
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Bind `groups` as `<prefix>0`, `<prefix>1`, ...
    pub fn bind_captures(&mut self, prefix: &str, groups: &[String]) {
        for (i, group) in groups.iter().enumerate() {
            self.insert(format!("{prefix}{i}"), group.clone());
        }
    }

    /// String-valued variables, for script environments.
    pub fn script_env(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

/// Template engine for rendering response headers and bodies.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Responses are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against `vars`.
    pub fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
        let template = normalize_dot_paths(template);
        Ok(self.handlebars.render_template(&template, vars)?)
    }

    /// Render a `Name: value` header template and split it.
    pub fn render_header(
        &self,
        template: &str,
        vars: &TemplateVars,
    ) -> Result<(String, String), RenderError> {
        let rendered = self.render(template, vars)?;
        match rendered.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(RenderError::InvalidHeader(rendered)),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept `{{.name}}` and `{{- .name -}}` by rewriting them to the
/// Handlebars forms `{{name}}` and `{{~name~}}`.
fn normalize_dot_paths(template: &str) -> Cow<'_, str> {
    if !template.contains("{{") {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start + 2);
        out.push_str(head);

        let (trim, after) = if let Some(t) = tail.strip_prefix('~') {
            (true, t)
        } else if let Some(t) = tail.strip_prefix("- ") {
            (true, t)
        } else {
            (false, tail)
        };
        let dotted = after
            .trim_start()
            .strip_prefix('.')
            .filter(|s| s.starts_with(|c: char| c.is_alphabetic() || c == '_'));

        match dotted {
            Some(path) => {
                if trim {
                    out.push('~');
                }
                rest = path;
            }
            None => rest = tail,
        }
    }
    out.push_str(rest);

    if out.contains(" -}}") {
        out = out.replace(" -}}", "~}}");
    }
    Cow::Owned(out)
}

// Custom Handlebars helpers

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    out.write(&Utc::now().format(format).to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(Value::Null) | Some(Value::String(_)) | None => out.write(fallback)?,
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}
