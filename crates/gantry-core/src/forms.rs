//! XML form definitions for `Blobform` types.
//!
//! A form describes the fields a blob-backed type accepts. Definitions are
//! resolved in two stages: a record pointing at a stored form (`fid`) uses
//! that form's XML, cached in the request context; everything else falls
//! back to `<type>.xml` looked up in the application's form directory,
//! then the default directory.
//!
//! Uses a hand-written `quick-xml` event parser. The format:
//!
//! ```xml
//! <form name="notes">
//!   <field name="title" label="Title" type="string" required="true"/>
//!   <field name="color" type="selection">
//!     <option value="red">Red</option>
//!   </field>
//! </form>
//! ```

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{Arc, Mutex},
};

use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

use crate::{
  context::RequestContext,
  error::{Error, Result},
  record::Record,
  schema::Registry,
  store::EntityStore,
};

// ─── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  String,
  Textarea,
  Integer,
  Date,
  Boolean,
  Selection,
  Other(String),
}

impl FieldType {
  fn parse(s: &str) -> FieldType {
    match s {
      "" | "string" => FieldType::String,
      "textarea" => FieldType::Textarea,
      "integer" => FieldType::Integer,
      "date" => FieldType::Date,
      "boolean" => FieldType::Boolean,
      "selection" => FieldType::Selection,
      other => FieldType::Other(other.to_owned()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FormField {
  pub name:       String,
  pub label:      String,
  pub field_type: FieldType,
  pub required:   bool,
  /// `(value, label)` pairs for selection fields.
  pub options:    Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FormConfig {
  pub name:   String,
  pub fields: Vec<FormField>,
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

impl FormConfig {
  /// Parse a form definition. `fallback_name` is used when the root
  /// element carries no `name` attribute.
  pub fn parse(fallback_name: &str, xml: &str) -> Result<FormConfig> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut name = fallback_name.to_owned();
    let mut fields: Vec<FormField> = Vec::new();
    let mut open_field: Option<FormField> = None;
    let mut open_option: Option<String> = None;
    let mut buf = Vec::new();

    loop {
      match reader.read_event_into(&mut buf) {
        Ok(Event::Start(ref e)) => match e.name().as_ref() {
          b"form" => {
            if let Some(n) = attr(e, b"name")? {
              name = n;
            }
          }
          b"field" => open_field = Some(parse_field(e)?),
          b"option" => {
            open_option = Some(attr(e, b"value")?.unwrap_or_default());
          }
          _ => {}
        },
        Ok(Event::Empty(ref e)) => match e.name().as_ref() {
          b"form" => {
            if let Some(n) = attr(e, b"name")? {
              name = n;
            }
          }
          b"field" => fields.push(parse_field(e)?),
          b"option" => {
            // No text content: the label falls back to the value.
            if let Some(field) = open_field.as_mut() {
              let value = attr(e, b"value")?.unwrap_or_default();
              field.options.push((value.clone(), value));
            }
          }
          _ => {}
        },
        Ok(Event::Text(ref t)) => {
          if let Some(value) = open_option.take() {
            let label = t
              .unescape()
              .map_err(|e| Error::FormDefinition(e.to_string()))?
              .into_owned();
            if let Some(field) = open_field.as_mut() {
              field.options.push((value, label));
            }
          }
        }
        Ok(Event::End(ref e)) => match e.name().as_ref() {
          b"field" => fields.extend(open_field.take()),
          b"option" => {
            // <option value="x"></option>: no text event fired.
            if let (Some(value), Some(field)) =
              (open_option.take(), open_field.as_mut())
            {
              field.options.push((value.clone(), value));
            }
          }
          _ => {}
        },
        Ok(Event::Eof) => break,
        Err(e) => return Err(Error::FormDefinition(e.to_string())),
        _ => {}
      }
      buf.clear();
    }

    Ok(FormConfig { name, fields })
  }

  pub fn field(&self, name: &str) -> Option<&FormField> {
    self.fields.iter().find(|f| f.name == name)
  }
}

fn parse_field(e: &BytesStart<'_>) -> Result<FormField> {
  Ok(FormField {
    name:       attr(e, b"name")?.ok_or_else(|| {
      Error::FormDefinition("field element without name attribute".to_owned())
    })?,
    label:      attr(e, b"label")?.unwrap_or_default(),
    field_type: FieldType::parse(&attr(e, b"type")?.unwrap_or_default()),
    required:   attr(e, b"required")?.as_deref() == Some("true"),
    options:    Vec::new(),
  })
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
  for a in e.attributes() {
    let a = a.map_err(|e| Error::FormDefinition(e.to_string()))?;
    if a.key.as_ref() == key {
      let value = a
        .unescape_value()
        .map_err(|e| Error::FormDefinition(e.to_string()))?;
      return Ok(Some(value.into_owned()));
    }
  }
  Ok(None)
}

// ─── File-based lookup ───────────────────────────────────────────────────────

/// Directory-backed form definitions: `<type>.xml` in the application
/// directory wins over the default directory. Parsed configs are cached
/// for the process lifetime; definitions are startup data.
#[derive(Default)]
pub struct FormLibrary {
  app_dir:     Option<PathBuf>,
  default_dir: Option<PathBuf>,
  cache:       Mutex<HashMap<String, Arc<FormConfig>>>,
}

impl FormLibrary {
  pub fn new() -> Self { Self::default() }

  pub fn with_app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.app_dir = Some(dir.into());
    self
  }

  pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.default_dir = Some(dir.into());
    self
  }

  pub fn load(&self, type_name: &str) -> Result<Arc<FormConfig>> {
    if let Some(form) = self.cache.lock().unwrap().get(type_name) {
      return Ok(form.clone());
    }
    for dir in [&self.app_dir, &self.default_dir].into_iter().flatten() {
      let path = dir.join(format!("{type_name}.xml"));
      let Ok(xml) = std::fs::read_to_string(&path) else { continue };
      let form = Arc::new(FormConfig::parse(type_name, &xml)?);
      self
        .cache
        .lock()
        .unwrap()
        .insert(type_name.to_owned(), form.clone());
      return Ok(form);
    }
    Err(Error::Configuration(format!(
      "no form definition found for type {type_name}"
    )))
  }
}

// ─── Blobform resolution ─────────────────────────────────────────────────────

/// Resolve the form config governing a blob-backed record: the stored form
/// referenced by `fid` when set (cached per request), else the library
/// lookup by type name.
pub async fn resolve_form<S: EntityStore + ?Sized>(
  ctx: &RequestContext,
  store: &S,
  registry: &Registry,
  library: &FormLibrary,
  record: &Record,
) -> Result<Arc<FormConfig>> {
  let Some(fid) = record.lookup_i64("fid") else {
    return library.load(&record.type_name);
  };
  if let Some(form) = ctx.cached_form(fid) {
    return Ok(form);
  }

  let forms_def = registry.get("forms")?;
  let row = store.fetch(forms_def, fid, None).await?;
  let definition = match row.lookup("definition") {
    Some(Value::String(s)) => s,
    _ => String::new(),
  };
  let fallback = match row.lookup("name") {
    Some(Value::String(s)) => s,
    _ => record.type_name.clone(),
  };
  let form = Arc::new(FormConfig::parse(&fallback, &definition)?);
  ctx.cache_form(fid, form.clone());
  Ok(form)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_fields_attributes_and_options() {
    let xml = r#"
      <form name="notes">
        <field name="title" label="Title" type="string" required="true"/>
        <field name="body" label="Body" type="textarea"/>
        <field name="color" label="Color" type="selection">
          <option value="red">Red</option>
          <option value="blue">Blue</option>
        </field>
      </form>"#;
    let form = FormConfig::parse("fallback", xml).unwrap();
    assert_eq!(form.name, "notes");
    assert_eq!(form.fields.len(), 3);

    let title = form.field("title").unwrap();
    assert!(title.required);
    assert_eq!(title.field_type, FieldType::String);

    let color = form.field("color").unwrap();
    assert_eq!(color.field_type, FieldType::Selection);
    assert_eq!(color.options, vec![
      ("red".to_owned(), "Red".to_owned()),
      ("blue".to_owned(), "Blue".to_owned()),
    ]);
  }

  #[test]
  fn root_name_falls_back_when_absent() {
    let form =
      FormConfig::parse("notes", r#"<form><field name="x"/></form>"#).unwrap();
    assert_eq!(form.name, "notes");
    assert_eq!(form.fields[0].label, "");
    assert_eq!(form.fields[0].field_type, FieldType::String);
  }

  #[test]
  fn unknown_types_are_preserved() {
    let form = FormConfig::parse(
      "n",
      r#"<form><field name="x" type="infofield"/></form>"#,
    )
    .unwrap();
    assert_eq!(
      form.fields[0].field_type,
      FieldType::Other("infofield".to_owned())
    );
  }

  #[test]
  fn field_without_name_is_rejected() {
    let err =
      FormConfig::parse("n", r#"<form><field label="X"/></form>"#).unwrap_err();
    assert!(matches!(err, Error::FormDefinition(_)));
  }

  #[test]
  fn malformed_xml_is_rejected() {
    let err = FormConfig::parse("n", "<form><field name=").unwrap_err();
    assert!(matches!(err, Error::FormDefinition(_)));
  }

  #[test]
  fn empty_library_is_a_configuration_error() {
    let library = FormLibrary::new();
    assert!(matches!(
      library.load("notes").unwrap_err(),
      Error::Configuration(_)
    ));
  }
}
