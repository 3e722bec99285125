//! Journal record construction.
//!
//! Container metadata is rendered into a base field map once, at pipeline
//! construction; every emitted message starts from that map and adds its
//! per-message fields (extracted fields, JSON extras, the syslog
//! timestamp).

pub mod sink;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::Config;
use crate::logs::merger::MergedMessage;

pub use sink::{JournalSink, SinkError, SystemdJournalSink};

const DEFAULT_TAG_TEMPLATE: &str = "{{.Name}}";

/// Container metadata delivered with `StartLogging`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInfo {
    /// The log-opt key/value map.
    #[serde(rename = "Config", default)]
    pub config: HashMap<String, String>,
    #[serde(rename = "ContainerID", default)]
    pub container_id: String,
    #[serde(rename = "ContainerName", default)]
    pub container_name: String,
    #[serde(rename = "ContainerImageID", default)]
    pub container_image_id: String,
    #[serde(rename = "ContainerImageName", default)]
    pub container_image_name: String,
    /// `KEY=VAL` strings.
    #[serde(rename = "ContainerEnv", default)]
    pub container_env: Vec<String>,
    #[serde(rename = "ContainerLabels", default)]
    pub container_labels: HashMap<String, String>,
    #[serde(rename = "DaemonName", default)]
    pub daemon_name: String,
    #[serde(rename = "ContainerEntrypoint", default)]
    pub container_entrypoint: String,
    #[serde(rename = "ContainerArgs", default)]
    pub container_args: Vec<String>,
}

/// Errors raised while constructing an emitter. These surface as
/// `StartLogging` failures before any log is consumed.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    #[error("invalid tag template {template:?}: {reason}")]
    TagTemplate { template: String, reason: String },
}

/// Variables available to the tag template, mirroring the runtime's own
/// log-tag template variables.
#[derive(Debug, Clone, Default)]
struct TagData {
    id: String,
    full_id: String,
    name: String,
    image_name: String,
    image_id: String,
    image_full_id: String,
    command: String,
    daemon_name: String,
}

impl TagData {
    fn new(info: &ContainerInfo) -> Self {
        let mut data = TagData {
            full_id: info.container_id.clone(),
            name: info
                .container_name
                .strip_prefix('/')
                .unwrap_or(&info.container_name)
                .to_string(),
            image_name: info.container_image_name.clone(),
            image_full_id: info.container_image_id.clone(),
            daemon_name: info.daemon_name.clone(),
            ..TagData::default()
        };
        data.id = short_id(&info.container_id);

        let image_id = info
            .container_image_id
            .strip_prefix("sha256:")
            .unwrap_or(&info.container_image_id);
        data.image_id = short_id(image_id);

        let mut command = info.container_entrypoint.clone();
        if !info.container_args.is_empty() {
            command.push(' ');
            command.push_str(&info.container_args.join(" "));
        }
        data.command = command;

        data
    }

    fn lookup(&self, variable: &str) -> Option<&str> {
        match variable {
            "ID" => Some(&self.id),
            "FullID" => Some(&self.full_id),
            "Name" => Some(&self.name),
            "ImageName" => Some(&self.image_name),
            "ImageID" => Some(&self.image_id),
            "ImageFullID" => Some(&self.image_full_id),
            "Command" => Some(&self.command),
            "DaemonName" => Some(&self.daemon_name),
            _ => None,
        }
    }
}

/// First 12 characters of an id; an id shorter than that yields the empty
/// string.
fn short_id(id: &str) -> String {
    id.get(..12).unwrap_or("").to_string()
}

/// Renders the tag option against container metadata.
///
/// An empty tag falls back to `{{.Name}}`; a tag without template
/// delimiters is used literally; otherwise every `{{.Var}}` reference is
/// substituted and an unknown variable or unterminated reference is an
/// error.
fn render_tag(template: &str, data: &TagData) -> Result<String, EmitterError> {
    let template = if template.is_empty() {
        DEFAULT_TAG_TEMPLATE
    } else {
        template
    };
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let invalid = |reason: &str| EmitterError::TagTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let inner_start = open + 2;
        let Some(close) = rest[inner_start..].find("}}") else {
            return Err(invalid("unterminated {{"));
        };
        let reference = rest[inner_start..inner_start + close].trim();
        let Some(variable) = reference.strip_prefix('.') else {
            return Err(invalid("expected a {{.Variable}} reference"));
        };
        match data.lookup(variable) {
            Some(value) => out.push_str(value),
            None => return Err(invalid(&format!("unknown variable {variable:?}"))),
        }
        rest = &rest[inner_start + close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Converts a string to a valid journal field name: lowercase letters are
/// uppercased, uppercase letters and digits pass through, everything else
/// becomes `_`, and a leading digit gets a `_` prefix.
pub fn sanitize_field_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'a'..='z' => out.push(c.to_ascii_uppercase()),
            'A'..='Z' | '0'..='9' => out.push(c),
            _ => out.push('_'),
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Builds journal records for one container and hands them to the sink.
pub struct JournalEmitter {
    cfg: Arc<Config>,
    base_fields: HashMap<String, String>,
    sink: Arc<dyn JournalSink>,
}

impl std::fmt::Debug for JournalEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalEmitter")
            .field("cfg", &self.cfg)
            .field("base_fields", &self.base_fields)
            .finish()
    }
}

impl JournalEmitter {
    /// Renders the base field map. Fails on an invalid tag template.
    pub fn new(
        cfg: Arc<Config>,
        info: &ContainerInfo,
        sink: Arc<dyn JournalSink>,
    ) -> Result<Self, EmitterError> {
        let data = TagData::new(info);

        let mut base_fields = HashMap::new();
        base_fields.insert("CONTAINER_ID".to_string(), data.id.clone());
        base_fields.insert("CONTAINER_ID_FULL".to_string(), data.full_id.clone());
        base_fields.insert("CONTAINER_NAME".to_string(), data.name.clone());
        base_fields.insert("IMAGE_NAME".to_string(), data.image_name.clone());

        let tag = render_tag(&cfg.tag, &data)?;
        base_fields.insert("CONTAINER_TAG".to_string(), tag.clone());
        base_fields.insert("SYSLOG_IDENTIFIER".to_string(), tag);

        add_selected_fields(
            &mut base_fields,
            &info.container_labels,
            &cfg.labels,
            cfg.labels_regex.as_ref(),
        );

        let env_map: HashMap<String, String> = info
            .container_env
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        add_selected_fields(&mut base_fields, &env_map, &cfg.env, cfg.env_regex.as_ref());

        Ok(JournalEmitter {
            cfg,
            base_fields,
            sink,
        })
    }

    /// Sends one merged message to the journal.
    ///
    /// `body` is the processed message body (after JSON extraction, prefix
    /// and timestamp stripping); `msg` carries the original source and
    /// time.
    pub fn emit(
        &self,
        msg: &MergedMessage,
        priority: crate::config::Priority,
        body: &[u8],
        json_fields: Option<&HashMap<String, String>>,
    ) -> Result<(), SinkError> {
        let mut fields = self.base_fields.clone();

        for extractor in &self.cfg.field_extractors {
            if let Some(captures) = extractor.regex.captures(body) {
                if let Some(capture) = captures.get(1) {
                    fields.insert(
                        extractor.name.clone(),
                        String::from_utf8_lossy(capture.as_bytes()).into_owned(),
                    );
                }
            }
        }

        if let Some(json_fields) = json_fields {
            for (key, value) in json_fields {
                fields.insert(format!("JSON_{}", sanitize_field_name(key)), value.clone());
            }
        }

        if msg.time_nano != 0 {
            if let Some(stamp) = format_rfc3339_nanos(msg.time_nano) {
                fields.insert("SYSLOG_TIMESTAMP".to_string(), stamp);
            }
        }

        self.sink
            .send(&String::from_utf8_lossy(body), priority, &fields)
    }

    pub fn base_fields(&self) -> &HashMap<String, String> {
        &self.base_fields
    }
}

fn add_selected_fields(
    fields: &mut HashMap<String, String>,
    source: &HashMap<String, String>,
    keys: &[String],
    key_regex: Option<&regex::Regex>,
) {
    if keys.is_empty() && key_regex.is_none() {
        return;
    }
    for (key, value) in source {
        let selected =
            keys.iter().any(|k| k == key) || key_regex.is_some_and(|re| re.is_match(key));
        if selected {
            fields.insert(sanitize_field_name(key), value.clone());
        }
    }
}

fn format_rfc3339_nanos(time_nano: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(time_nano))
        .ok()?
        .format(&Rfc3339)
        .ok()
}
