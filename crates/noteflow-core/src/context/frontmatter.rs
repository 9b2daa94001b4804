//! Frontmatter YAML (`---` ... `---`) al inicio de un documento.
//!
//! `split` conserva el bloque original byte a byte (`head`) para que la
//! inversión de un `frontmatter_update` pueda reponerlo exacto sobre el body
//! actual.
use serde_json::{Map, Value};

/// Documento partido en cabecera cruda, YAML interno y body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// Cabecera completa incluyendo delimitadores y salto final.
    pub head: Option<&'a str>,
    pub yaml: &'a str,
    pub body: &'a str,
}

pub fn split(content: &str) -> Split<'_> {
    let none = Split { head: None,
                       yaml: "",
                       body: content };
    let Some(rest) = content.strip_prefix("---\n")
                            .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return none;
    };
    let open_len = content.len() - rest.len();
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(|c| c == '\n' || c == '\r') == "---" {
            let head_end = open_len + offset + line.len();
            return Split { head: Some(&content[..head_end]),
                           yaml: &rest[..offset],
                           body: &content[head_end..] };
        }
        offset += line.len();
    }
    none
}

/// Parsea el YAML interno a un mapa JSON. Vacío => mapa vacío.
pub fn parse(yaml: &str) -> Result<Map<String, Value>, String> {
    if yaml.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_yaml::from_str::<Value>(yaml).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(format!("frontmatter must be a mapping, got {other}")),
    }
}

/// Serializa `fields` como cabecera completa con delimitadores.
pub fn render_head(fields: &Map<String, Value>) -> Result<String, String> {
    let yaml = serde_yaml::to_string(&Value::Object(fields.clone())).map_err(|e| e.to_string())?;
    Ok(format!("---\n{yaml}---\n"))
}

/// Aplica `updates` sobre el frontmatter de `content`. Devuelve
/// (campos previos, campos nuevos, documento nuevo).
pub fn apply_updates(content: &str, updates: &Map<String, Value>) -> Result<(Map<String, Value>, Map<String, Value>, String), String> {
    let parts = split(content);
    let before = parse(parts.yaml)?;
    let mut after = before.clone();
    for (k, v) in updates {
        after.insert(k.clone(), v.clone());
    }
    let doc = format!("{}{}", render_head(&after)?, parts.body);
    Ok((before, after, doc))
}
