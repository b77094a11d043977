//! Version multiplexing
//!
//! A mux accepts bytes holding data at any version of a lineage and hands
//! back an instance of one chosen schema. The chosen schema is tried first,
//! then every other schema newest to oldest; the first match is translated
//! to the chosen version along the lineage's cheapest route.

use serde_json::Value;
use tracing::debug;

use crate::config::{DataFormat, MuxConfig};
use crate::error::{CodecError, MuxError};
use crate::instance::Instance;
use crate::lacuna::Lacuna;
use crate::lineage::Schema;

/// Decodes bytes of one format into data values.
pub trait Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Name given to decoded documents in diagnostics
    fn document(&self) -> &str;
}

/// Encodes data values into bytes of one format.
pub trait Encoder {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// A decoder and encoder pair; the formats usually match.
pub trait Endec: Decoder + Encoder {}

impl<T: Decoder + Encoder> Endec for T {}

/// JSON in, JSON out
#[derive(Debug, Clone)]
pub struct JsonEndec {
    document: String,
}

impl JsonEndec {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }
}

impl Decoder for JsonEndec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|source| CodecError::Json {
            document: self.document.clone(),
            source,
        })
    }

    fn document(&self) -> &str {
        &self.document
    }
}

impl Encoder for JsonEndec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|source| CodecError::Json {
            document: self.document.clone(),
            source,
        })
    }
}

/// YAML in, YAML out
#[derive(Debug, Clone)]
pub struct YamlEndec {
    document: String,
}

impl YamlEndec {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }
}

impl Decoder for YamlEndec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_yaml::from_slice(bytes).map_err(|source| CodecError::Yaml {
            document: self.document.clone(),
            source,
        })
    }

    fn document(&self) -> &str {
        &self.document
    }
}

impl Encoder for YamlEndec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|source| CodecError::Yaml {
                document: self.document.clone(),
                source,
            })
    }
}

/// Endec chosen by configuration
#[derive(Debug, Clone)]
pub enum FormatEndec {
    Json(JsonEndec),
    Yaml(YamlEndec),
}

impl FormatEndec {
    pub fn from_config(config: &MuxConfig) -> Self {
        match config.format {
            DataFormat::Json => Self::Json(JsonEndec::new(config.document.clone())),
            DataFormat::Yaml => Self::Yaml(YamlEndec::new(config.document.clone())),
        }
    }
}

impl Decoder for FormatEndec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match self {
            Self::Json(e) => e.decode(bytes),
            Self::Yaml(e) => e.decode(bytes),
        }
    }

    fn document(&self) -> &str {
        match self {
            Self::Json(e) => e.document(),
            Self::Yaml(e) => e.document(),
        }
    }
}

impl Encoder for FormatEndec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json(e) => e.encode(value),
            Self::Yaml(e) => e.encode(value),
        }
    }
}

/// Maps bytes at any version to an [`Instance`] of one schema
pub struct UntypedMux<'a, D> {
    schema: Schema<'a>,
    decoder: D,
    /// All versions, for the no-match error
    versions: String,
}

impl<'a, D: Decoder> UntypedMux<'a, D> {
    pub fn new(schema: Schema<'a>, decoder: D) -> Self {
        let versions = schema
            .lineage()
            .versions()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            schema,
            decoder,
            versions,
        }
    }

    pub fn schema(&self) -> Schema<'a> {
        self.schema
    }

    pub fn apply(&self, bytes: &[u8]) -> Result<(Instance<'a>, Vec<Lacuna>), MuxError> {
        let data = self.decoder.decode(bytes)?;
        let name = self.decoder.document();
        let target = self.schema.version();

        let failure = match self.schema.validate_named(&data, name) {
            Ok(inst) => return Ok((inst, Vec::new())),
            Err(failure) => failure,
        };

        for candidate in self.schema.lineage().schemas().rev() {
            if candidate.version() == target {
                continue;
            }
            if let Ok(inst) = candidate.validate_named(&data, name) {
                debug!(from = %candidate.version(), to = %target, document = name, "muxing instance");
                return Ok(inst.translate_route(target)?);
            }
        }

        Err(MuxError::NoMatchingVersion {
            versions: self.versions.clone(),
            target,
            source: failure,
        })
    }
}

/// Maps bytes at any version to bytes at one version
pub struct ByteMux<'a, E> {
    inner: UntypedMux<'a, E>,
}

impl<'a, E: Endec> ByteMux<'a, E> {
    pub fn new(schema: Schema<'a>, endec: E) -> Self {
        Self {
            inner: UntypedMux::new(schema, endec),
        }
    }

    pub fn apply(&self, bytes: &[u8]) -> Result<(Vec<u8>, Vec<Lacuna>), MuxError> {
        let (inst, lacunas) = self.inner.apply(bytes)?;
        let out = self.inner.decoder.encode(inst.underlying())?;
        Ok((out, lacunas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::{bind_lineage, BindOptions};
    use crate::runtime::Runtime;
    use crate::version::sv;
    use crate::Lineage;
    use serde_json::json;

    fn lineage() -> Lineage {
        let raw = json!({
            "name": "event",
            "schemas": [
                {"version": [0, 0], "schema": {"id": "string"}},
                {"version": [0, 1], "schema": {"id": "string", "tags": {"$type": {"$list": "string"}, "$default": []}}},
                {"version": [1, 0], "schema": {"key": "string", "tags": {"$list": "string"}}}
            ],
            "lenses": [{
                "from": [0, 1], "to": [1, 0],
                "result": {"key": {"$ref": "input.id"}, "tags": {"$ref": "input.tags"}}
            }]
        });
        bind_lineage(&raw, &Runtime::structural(), BindOptions::new()).unwrap()
    }

    #[test]
    fn test_untyped_mux_translates_older_data() {
        let lin = lineage();
        let mux = UntypedMux::new(lin.latest(), JsonEndec::new("body"));

        let (inst, lacunas) = mux.apply(br#"{"id": "a"}"#).unwrap();
        assert_eq!(inst.schema().version(), sv(1, 0));
        assert_eq!(inst.underlying(), &json!({"key": "a", "tags": []}));
        assert!(lacunas.is_empty());

        let (inst, _) = mux.apply(br#"{"key": "b", "tags": ["x"]}"#).unwrap();
        assert_eq!(inst.underlying()["key"], json!("b"));
    }

    #[test]
    fn test_untyped_mux_reports_target_failure() {
        let lin = lineage();
        let mux = UntypedMux::new(lin.latest(), JsonEndec::new("body"));
        match mux.apply(br#"{"nope": 1}"#).unwrap_err() {
            MuxError::NoMatchingVersion { versions, target, source } => {
                assert_eq!(versions, "0.0, 0.1, 1.0");
                assert_eq!(target, sv(1, 0));
                assert_eq!(source.first().coords.version, sv(1, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(mux.apply(b"{"), Err(MuxError::Codec(_))));
    }

    #[test]
    fn test_byte_mux_yaml() {
        let lin = lineage();
        let config = MuxConfig {
            format: DataFormat::Yaml,
            document: "doc.yaml".into(),
        };
        let mux = ByteMux::new(lin.latest(), FormatEndec::from_config(&config));
        let (out, _) = mux.apply(b"id: a\ntags: [t]\n").unwrap();
        let back: Value = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(back, json!({"key": "a", "tags": ["t"]}));
    }
}
