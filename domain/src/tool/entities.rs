//! Tool capability entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::provider::ProviderId;

/// Coarse category of a capability.
///
/// Drives the retry budget of the execution coordinator and the oracle
/// fallback (which only ever proposes reconnaissance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    Reconnaissance,
    Enumeration,
    CredentialAttack,
    Exploitation,
    General,
}

const CREDENTIAL_HINTS: &[&str] = &[
    "brute", "hydra", "crack", "password", "credential", "spray", "hashcat", "john", "medusa",
];
const EXPLOIT_HINTS: &[&str] = &["exploit", "metasploit", "msf", "payload", "sqlmap", "shell"];
const ENUMERATION_HINTS: &[&str] = &[
    "enum", "gobuster", "dirb", "ffuf", "nikto", "smb", "ldap", "snmp", "wpscan", "fuzz",
];
const RECON_HINTS: &[&str] = &[
    "scan", "nmap", "masscan", "recon", "ping", "whois", "dns", "discover", "subdomain", "amass",
    "traceroute",
];

impl CapabilityClass {
    /// Classifies by keywords in the capability name, then its description.
    pub fn classify(name: &str, description: &str) -> Self {
        Self::from_text(&name.to_lowercase())
            .or_else(|| Self::from_text(&description.to_lowercase()))
            .unwrap_or(CapabilityClass::General)
    }

    fn from_text(text: &str) -> Option<Self> {
        let has = |hints: &[&str]| hints.iter().any(|h| text.contains(h));
        if has(CREDENTIAL_HINTS) {
            Some(CapabilityClass::CredentialAttack)
        } else if has(EXPLOIT_HINTS) {
            Some(CapabilityClass::Exploitation)
        } else if has(ENUMERATION_HINTS) {
            Some(CapabilityClass::Enumeration)
        } else if has(RECON_HINTS) {
            Some(CapabilityClass::Reconnaissance)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityClass::Reconnaissance => "reconnaissance",
            CapabilityClass::Enumeration => "enumeration",
            CapabilityClass::CredentialAttack => "credential_attack",
            CapabilityClass::Exploitation => "exploitation",
            CapabilityClass::General => "general",
        }
    }
}

impl std::fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type expected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParameterKind {
    fn from_schema_type(ty: Option<&str>) -> Self {
        match ty {
            Some("string") => ParameterKind::String,
            Some("integer") => ParameterKind::Integer,
            Some("number") => ParameterKind::Number,
            Some("boolean") => ParameterKind::Boolean,
            Some("array") => ParameterKind::Array,
            Some("object") => ParameterKind::Object,
            _ => ParameterKind::Any,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Array => value.is_array(),
            ParameterKind::Object => value.is_object(),
            ParameterKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Integer => "integer",
            ParameterKind::Number => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Array => "array",
            ParameterKind::Object => "object",
            ParameterKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind, required: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            required,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Parameter schema of a capability, reduced from the provider's JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub parameters: Vec<ParameterSpec>,
    /// Whether parameters outside `parameters` are accepted
    pub allow_additional: bool,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            parameters: Vec::new(),
            allow_additional: true,
        }
    }
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn strict(mut self) -> Self {
        self.allow_additional = false;
        self
    }

    /// Reads an object schema of the form
    /// `{"properties": {...}, "required": [...], "additionalProperties": false}`.
    ///
    /// Missing pieces fall back to permissive defaults.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut parameters: Vec<ParameterSpec> = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| {
                        let kind = ParameterKind::from_schema_type(
                            prop.get("type").and_then(Value::as_str),
                        );
                        let description = prop
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        ParameterSpec::new(name, kind, required.contains(&name.as_str()))
                            .with_description(description)
                    })
                    .collect()
            })
            .unwrap_or_default();
        parameters.sort_by(|a, b| b.required.cmp(&a.required).then(a.name.cmp(&b.name)));

        let allow_additional = schema
            .get("additionalProperties")
            .map(|v| !matches!(v, Value::Bool(false)))
            .unwrap_or(true);

        Self {
            parameters,
            allow_additional,
        }
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut prop = Map::new();
                if p.kind != ParameterKind::Any {
                    prop.insert("type".into(), json!(p.kind.as_str()));
                }
                if !p.description.is_empty() {
                    prop.insert("description".into(), json!(p.description));
                }
                (p.name.clone(), Value::Object(prop))
            })
            .collect();
        let required: Vec<&str> = self.required().map(|p| p.name.as_str()).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_additional,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.required)
    }

    pub fn required_count(&self) -> usize {
        self.required().count()
    }
}

/// One operation exposed by a tool provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    pub provider: ProviderId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schema: ParameterSchema,
    pub class: CapabilityClass,
    /// When this entry was discovered (cache age)
    pub cached_at: DateTime<Utc>,
}

impl ToolCapability {
    pub fn new(
        provider: impl Into<ProviderId>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        Self {
            provider: provider.into(),
            class: CapabilityClass::classify(&name, &description),
            name,
            description,
            schema: ParameterSchema::default(),
            cached_at: Utc::now(),
        }
    }

    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_class(mut self, class: CapabilityClass) -> Self {
        self.class = class;
        self
    }

    /// `provider/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    /// One line for prompts, e.g.
    /// `nmap/port_scan [reconnaissance] (target: string*, ports: string) - TCP port scan`.
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .schema
            .parameters
            .iter()
            .map(|p| {
                format!(
                    "{}: {}{}",
                    p.name,
                    p.kind.as_str(),
                    if p.required { "*" } else { "" }
                )
            })
            .collect();
        let mut line = format!(
            "{} [{}] ({})",
            self.qualified_name(),
            self.class,
            params.join(", ")
        );
        if !self.description.is_empty() {
            line.push_str(" - ");
            line.push_str(&self.description);
        }
        line
    }
}
