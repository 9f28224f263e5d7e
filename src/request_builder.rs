//! Request Builder: turns a compiled [`crate::domain::RequestTemplate`] plus
//! the current variable/global-context state into a concrete
//! `reqwest::Request`.
//!
//! Grounded on the teacher's `scenario.rs::RequestConfig`-to-request
//! assembly, extended with gzip body compression (spec.md §4.3).

use std::io::Write;
use std::str::FromStr;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};

use crate::domain::{BasicAuth, RequestTemplate};
use crate::errors::BuildError;
use crate::template::Template;

/// A pre-compiled request template: the URL/header/body templates compiled
/// once at config-load time, rendered fresh on every call to
/// [`CompiledRequest::build`].
pub struct CompiledRequest {
    method: Method,
    url: Template,
    default_url: String,
    headers: Vec<(HeaderName, Template)>,
    body_lines: Vec<Template>,
    body_repeat_times: usize,
    basic_auth: Option<(String, String)>,
    compress: bool,
    disable_header_normalizing: bool,
    runtime_variables: Vec<(String, String)>,
    runtime_body_line_variables: Vec<(String, String)>,
    execute_repeat_times: usize,
}

/// Scratch buffers reused across builds by one worker, avoiding a fresh
/// allocation per request.
#[derive(Default)]
pub struct RequestScratch {
    url: String,
    body: Vec<u8>,
}

impl RequestScratch {
    pub fn clear(&mut self) {
        self.url.clear();
        self.body.clear();
    }
}

impl CompiledRequest {
    pub fn compile(template: &RequestTemplate, default_url: &str) -> Result<Self, BuildError> {
        Self::compile_with_defaults(template, default_url, None, false, false)
    }

    /// Like [`Self::compile`], but falling back to `default_basic_auth` when
    /// the template doesn't set its own, to `default_disable_header_names_normalizing`
    /// when the template leaves its own flag at the default `false`, and
    /// gzipping the body when `default_compress` is set globally even if
    /// this particular template didn't ask for it (spec.md §4.3 step 7).
    pub fn compile_with_defaults(
        template: &RequestTemplate,
        default_url: &str,
        default_basic_auth: Option<&BasicAuth>,
        default_disable_header_names_normalizing: bool,
        default_compress: bool,
    ) -> Result<Self, BuildError> {
        let method = Method::from_str(template.method.as_deref().unwrap_or("GET"))
            .map_err(|_| {
                BuildError::InvalidUrl(
                    template.url.clone(),
                    format!("unsupported method '{}'", template.method.clone().unwrap_or_default()),
                )
            })?;

        let mut headers = Vec::with_capacity(template.headers.len());
        for (name, value) in &template.headers {
            let header_name = HeaderName::from_str(name).map_err(|e| BuildError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.push((header_name, Template::compile(value)));
        }

        let body_lines = template.body.iter().map(|l| Template::compile(l)).collect();

        Ok(Self {
            method,
            url: Template::compile(&template.url),
            default_url: default_url.to_string(),
            headers,
            body_lines,
            body_repeat_times: template.body_repeat_times.unwrap_or(1).max(1),
            basic_auth: template
                .basic_auth
                .as_ref()
                .or(default_basic_auth)
                .map(|a| (a.username.clone(), a.password.clone())),
            compress: template.compress || default_compress,
            disable_header_normalizing: template.disable_header_names_normalizing
                || default_disable_header_names_normalizing,
            runtime_variables: template
                .runtime_variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            runtime_body_line_variables: template
                .runtime_body_line_variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            execute_repeat_times: template.execute_repeat_times.unwrap_or(1).max(1),
        })
    }

    /// How many times the worker should invoke this request per occurrence
    /// in the item sequence (spec.md §4.7 step 4). Always ≥ 1.
    pub fn execute_repeat_times(&self) -> usize {
        self.execute_repeat_times
    }

    /// Build a `reqwest::Request` by rendering every template against
    /// `resolve`, re-evaluating variables on every body-repeat iteration so
    /// e.g. a `sequence32` placeholder advances once per repeated line.
    ///
    /// Per spec.md §4.3 step 1, `runtime_variables` bindings are evaluated
    /// once up front and shadow same-named declared variables for the rest
    /// of this build; `runtime_body_line_variables` layer on top of that,
    /// re-evaluated fresh on every body-repeat iteration (step 6).
    pub fn build(
        &self,
        client: &reqwest::Client,
        scratch: &mut RequestScratch,
        mut resolve: impl FnMut(&str) -> Option<String>,
    ) -> Result<Request, BuildError> {
        scratch.clear();

        let mut runtime_ctx: std::collections::HashMap<String, String> =
            std::collections::HashMap::with_capacity(self.runtime_variables.len());
        for (k, v) in &self.runtime_variables {
            if let Some(value) = resolve(v) {
                runtime_ctx.insert(k.clone(), value);
            }
        }
        let mut resolve_runtime = |name: &str| {
            runtime_ctx
                .get(name)
                .cloned()
                .or_else(|| resolve(name))
        };

        self.url
            .render_into(&mut scratch.url, |name| resolve_runtime(name));
        // A rendered URL missing scheme/host (an empty template, or a
        // relative path like "/ping") is joined against the default
        // endpoint rather than only substituted in when the template was
        // wholly empty (spec.md §4.3 step 3).
        let url = match Url::parse(&scratch.url) {
            Ok(u) => u,
            Err(e) => {
                if self.default_url.is_empty() {
                    return Err(BuildError::InvalidUrl(scratch.url.clone(), e.to_string()));
                }
                let base = Url::parse(&self.default_url).map_err(|e| {
                    BuildError::InvalidUrl(self.default_url.clone(), e.to_string())
                })?;
                base.join(&scratch.url)
                    .map_err(|e| BuildError::InvalidUrl(scratch.url.clone(), e.to_string()))?
            }
        };

        let mut builder = client.request(self.method.clone(), url);

        if let Some((user, pass)) = &self.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let mut header_map = HeaderMap::new();
        for (name, tmpl) in &self.headers {
            let rendered = tmpl.render(|n| resolve_runtime(n));
            let value = HeaderValue::from_str(&rendered).map_err(|e| BuildError::InvalidHeader {
                name: name.as_str().to_string(),
                reason: e.to_string(),
            })?;
            if self.disable_header_normalizing {
                // `http::HeaderName` always lowercases, so original casing
                // can't literally survive; the nearest honest equivalent is
                // to stop collapsing same-name declarations to last-wins and
                // keep every declared value (see DESIGN.md).
                header_map.append(name.clone(), value);
            } else {
                // Later declarations override earlier ones for the same
                // name, per spec.md §4.3's header override-by-declaration-
                // order rule.
                header_map.insert(name.clone(), value);
            }
        }

        if !self.body_lines.is_empty() {
            let mut plain = String::new();
            for _ in 0..self.body_repeat_times {
                let mut line_ctx: std::collections::HashMap<String, String> =
                    std::collections::HashMap::with_capacity(self.runtime_body_line_variables.len());
                for (k, v) in &self.runtime_body_line_variables {
                    if let Some(value) = resolve_runtime(v) {
                        line_ctx.insert(k.clone(), value);
                    }
                }
                for line in &self.body_lines {
                    line.render_into(&mut plain, |n| {
                        line_ctx.get(n).cloned().or_else(|| resolve_runtime(n))
                    });
                    plain.push('\n');
                }
            }

            // X-PayLoad-Size always reflects the uncompressed length, whether
            // or not this request ends up gzipped.
            header_map.insert(
                HeaderName::from_static("x-payload-size"),
                HeaderValue::from_str(&plain.len().to_string()).unwrap(),
            );

            if self.compress {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(plain.as_bytes())?;
                let compressed = encoder.finish()?;
                header_map.insert(
                    HeaderName::from_static("x-payload-compressed"),
                    HeaderValue::from_static("true"),
                );
                header_map.insert(
                    reqwest::header::CONTENT_ENCODING,
                    HeaderValue::from_static("gzip"),
                );
                header_map.insert(
                    reqwest::header::ACCEPT_ENCODING,
                    HeaderValue::from_static("gzip"),
                );
                scratch.body = compressed;
            } else {
                scratch.body = plain.into_bytes();
            }
            builder = builder.body(std::mem::take(&mut scratch.body));
        }

        let mut request = builder.build()?;
        let existing = request.headers_mut();
        // `HeaderMap`'s IntoIterator yields `None` for every value after the
        // first in a multi-value group. The first value in a group replaces
        // whatever the request builder already set for that name (e.g. a
        // default `User-Agent`); subsequent values in the same group — only
        // possible when `disable_header_names_normalizing` kept duplicates —
        // are appended alongside it rather than overwriting it.
        let mut last_name: Option<HeaderName> = None;
        for (name, value) in header_map {
            match name {
                Some(n) => {
                    existing.insert(n.clone(), value);
                    last_name = Some(n);
                }
                None => {
                    let n = last_name.clone().expect("HeaderMap always names its first entry");
                    existing.append(n, value);
                }
            }
        }

        Ok(request)
    }
}
