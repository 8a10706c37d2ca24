use std::{
    convert::{TryFrom, TryInto},
    fs::read_dir,
    path::Path,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_yaml::{Deserializer, Value as YamlValue};
use thiserror::Error;

use crate::{
    common::{data::Method, util::read_file},
    stubs::{
        persistence::Error::{DeserializationError, FileReadError, InvalidDefinition},
        registry::{RegistryError, StubRegistry},
        response::{SimulatedError, StubResponse},
        rule::{QueryMatchPolicy, StubRule},
    },
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read from stub file: {0}")]
    FileReadError(String),
    #[error("cannot deserialize YAML: {0}")]
    DeserializationError(String),
    #[error("invalid stub definition: {0}")]
    InvalidDefinition(String),
    #[error("cannot register stub: {0}")]
    RegistryError(#[from] RegistryError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StaticRequestRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// A URL pattern. Absent means "any route".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub query_match: QueryMatchPolicy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NameValueStringPair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StaticStubResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<Vec<NameValueStringPair>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_headers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SimulatedError>,
}

/// A stub as written in a YAML document.
///
/// ```yaml
/// when:
///   method: GET
///   url: https://api.example.com/users?page=1
///   query_match: allow_missing_query_parameters
/// then:
///   status: 200
///   content_type: application/json
///   body: '[]'
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct StaticStubDefinition {
    pub when: StaticRequestRule,
    pub then: StaticStubResponse,
}

impl TryFrom<StaticStubDefinition> for (StubRule, StubResponse) {
    type Error = Error;

    fn try_from(value: StaticStubDefinition) -> Result<Self, Self::Error> {
        let rule = match value.when.url {
            Some(url) => StubRule::new(value.when.method, url),
            None => StubRule::any_route(value.when.method),
        }
        .query_match_policy(value.when.query_match);

        let then = value.then;
        if then.body.is_some() && then.body_base64.is_some() {
            return Err(InvalidDefinition(
                "'body' and 'body_base64' cannot both be set".to_string(),
            ));
        }

        let mut response = StubResponse::new();
        if let Some(status) = then.status {
            response = response.status(status);
        }
        if let Some(header) = then.header {
            response = response.headers(header.into_iter().map(|p| (p.name, p.value)));
        }
        if let Some(body) = then.body {
            response = response.body(body);
        }
        if let Some(body) = then.body_base64 {
            let decoded = BASE64
                .decode(body)
                .map_err(|err| InvalidDefinition(err.to_string()))?;
            response = response.body(decoded);
        }
        if let Some(content_type) = then.content_type {
            response = response.content_type(content_type);
        }
        if let Some(replace) = then.replace_headers {
            response = response.replace_headers(replace);
        }
        if let Some(error) = then.error {
            response = response.error(error);
        }

        Ok((rule, response))
    }
}

pub fn deserialize_stub_defs_from_yaml(
    yaml_content: &str,
) -> Result<Vec<StaticStubDefinition>, Error> {
    let mut definitions = Vec::new();

    for document in Deserializer::from_str(yaml_content) {
        let value = YamlValue::deserialize(document)
            .map_err(|err| DeserializationError(err.to_string()))?;

        if value.is_null() {
            continue;
        }

        let definition: StaticStubDefinition =
            serde_yaml::from_value(value).map_err(|err| DeserializationError(err.to_string()))?;

        definitions.push(definition);
    }

    Ok(definitions)
}

/// Registers every stub of a (possibly multi-document) YAML string. Returns the
/// number of registered stubs. Nothing is registered if any document is invalid.
pub fn load_stubs_from_yaml(yaml_content: &str, registry: &StubRegistry) -> Result<usize, Error> {
    let stubs = deserialize_stub_defs_from_yaml(yaml_content)?
        .into_iter()
        .map(|def| def.try_into())
        .collect::<Result<Vec<(StubRule, StubResponse)>, Error>>()?;

    for (rule, _) in &stubs {
        rule.validate().map_err(RegistryError::from)?;
    }

    let count = stubs.len();
    for (rule, response) in stubs {
        registry.register(rule, response)?;
    }

    Ok(count)
}

/// Registers the stubs of every `*.yaml` and `*.yml` file in a directory.
pub fn read_static_stub_definitions<P: AsRef<Path>>(
    dir: P,
    registry: &StubRegistry,
) -> Result<usize, Error> {
    let mut paths = Vec::new();
    for entry in read_dir(dir.as_ref()).map_err(|err| FileReadError(err.to_string()))? {
        let path = entry.map_err(|err| FileReadError(err.to_string()))?.path();
        let is_yaml = path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    let mut count = 0;
    for path in paths {
        tracing::info!("Loading static stub file from '{}'", path.to_string_lossy());

        let content = read_file(&path).map_err(|err| FileReadError(err.to_string()))?;
        let content = String::from_utf8(content).map_err(|err| FileReadError(err.to_string()))?;

        count += load_stubs_from_yaml(&content, registry)?;
    }

    Ok(count)
}
