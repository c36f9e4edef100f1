//! Contact (CRM) handlers: `create_contact`, `update_contact`, `add_tag`.
//!
//! All three are idempotent under retry: create is an upsert keyed by email
//! and tags are a set.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config, require};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  pub contact_id: String,
  pub email: String,
  #[serde(default)]
  pub fields: Map<String, Value>,
  #[serde(default)]
  pub tags: BTreeSet<String>,
}

/// Where contacts live.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
  /// Create a contact, or merge fields into the existing one with this email.
  /// Returns the contact and whether it was newly created.
  async fn upsert(
    &self,
    email: &str,
    fields: Map<String, Value>,
  ) -> Result<(Contact, bool), TaskError>;

  /// Find by contact id or email.
  async fn find(&self, key: &str) -> Result<Option<Contact>, TaskError>;

  async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<Contact, TaskError>;

  async fn add_tags(&self, key: &str, tags: &[String]) -> Result<Contact, TaskError>;
}

/// Process-local contact directory.
#[derive(Debug, Default)]
pub struct InMemoryContacts {
  contacts: Mutex<HashMap<String, Contact>>,
}

impl InMemoryContacts {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_contacts<T>(
    &self,
    f: impl FnOnce(&mut HashMap<String, Contact>) -> Result<T, TaskError>,
  ) -> Result<T, TaskError> {
    let mut contacts = self
      .contacts
      .lock()
      .map_err(|_| TaskError::handler("contact directory lock poisoned"))?;
    f(&mut contacts)
  }
}

fn find_key<'a>(contacts: &'a mut HashMap<String, Contact>, key: &str) -> Option<&'a mut Contact> {
  contacts
    .values_mut()
    .find(|c| c.contact_id == key || c.email.eq_ignore_ascii_case(key))
}

#[async_trait]
impl ContactDirectory for InMemoryContacts {
  async fn upsert(
    &self,
    email: &str,
    fields: Map<String, Value>,
  ) -> Result<(Contact, bool), TaskError> {
    self.with_contacts(|contacts| {
      if let Some(existing) = find_key(contacts, email) {
        existing.fields.extend(fields);
        return Ok((existing.clone(), false));
      }

      let contact = Contact {
        contact_id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        fields,
        tags: BTreeSet::new(),
      };
      contacts.insert(contact.contact_id.clone(), contact.clone());
      Ok((contact, true))
    })
  }

  async fn find(&self, key: &str) -> Result<Option<Contact>, TaskError> {
    self.with_contacts(|contacts| Ok(find_key(contacts, key).cloned()))
  }

  async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<Contact, TaskError> {
    self.with_contacts(|contacts| {
      let contact = find_key(contacts, key)
        .ok_or_else(|| TaskError::handler(format!("contact not found: {}", key)))?;
      contact.fields.extend(fields);
      Ok(contact.clone())
    })
  }

  async fn add_tags(&self, key: &str, tags: &[String]) -> Result<Contact, TaskError> {
    self.with_contacts(|contacts| {
      let contact = find_key(contacts, key)
        .ok_or_else(|| TaskError::handler(format!("contact not found: {}", key)))?;
      contact.tags.extend(tags.iter().cloned());
      Ok(contact.clone())
    })
  }
}

#[derive(Debug, Deserialize)]
struct CreateConfig {
  email: Option<String>,
  #[serde(flatten)]
  fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateConfig {
  contact_id: Option<String>,
  email: Option<String>,
  #[serde(default)]
  fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagList {
  One(String),
  Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct TagConfig {
  contact_id: Option<String>,
  email: Option<String>,
  #[serde(alias = "tags")]
  tag: Option<TagList>,
}

fn contact_key(contact_id: Option<String>, email: Option<String>) -> Result<String, TaskError> {
  match contact_id.filter(|c| !c.is_empty()) {
    Some(id) => Ok(id),
    None => require("contact_id", email),
  }
}

fn contact_output(contact: &Contact, extra: Value) -> TaskOutput {
  let mut output = TaskOutput::from_value(json!({
    "contact_id": contact.contact_id,
    "email": contact.email,
    "tags": contact.tags,
  }));
  if let Value::Object(extra) = extra {
    output.output.extend(extra);
  }
  output
}

/// `create_contact`
pub struct CreateContactHandler {
  contacts: Arc<dyn ContactDirectory>,
}

impl CreateContactHandler {
  pub fn new(contacts: Arc<dyn ContactDirectory>) -> Self {
    Self { contacts }
  }
}

#[async_trait]
impl NodeHandler for CreateContactHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: CreateConfig = parse_config(config)?;
    let email = require("email", config.email)?;

    let (contact, created) = self.contacts.upsert(&email, config.fields).await?;

    Ok(TaskOutcome::Completed(contact_output(
      &contact,
      json!({ "created": created }),
    )))
  }
}

/// `update_contact`
pub struct UpdateContactHandler {
  contacts: Arc<dyn ContactDirectory>,
}

impl UpdateContactHandler {
  pub fn new(contacts: Arc<dyn ContactDirectory>) -> Self {
    Self { contacts }
  }
}

#[async_trait]
impl NodeHandler for UpdateContactHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: UpdateConfig = parse_config(config)?;
    let key = contact_key(config.contact_id, config.email)?;

    let contact = self.contacts.update(&key, config.fields).await?;

    Ok(TaskOutcome::Completed(contact_output(&contact, Value::Null)))
  }
}

/// `add_tag`
pub struct AddTagHandler {
  contacts: Arc<dyn ContactDirectory>,
}

impl AddTagHandler {
  pub fn new(contacts: Arc<dyn ContactDirectory>) -> Self {
    Self { contacts }
  }
}

#[async_trait]
impl NodeHandler for AddTagHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: TagConfig = parse_config(config)?;
    let key = contact_key(config.contact_id, config.email)?;
    let tags: Vec<String> = match config.tag {
      Some(TagList::One(tag)) => vec![tag],
      Some(TagList::Many(tags)) => tags,
      None => vec![],
    }
    .into_iter()
    .filter(|t| !t.trim().is_empty())
    .collect();

    if tags.is_empty() {
      return Err(TaskError::MissingInput {
        field: "tag".to_string(),
      });
    }

    let contact = self.contacts.add_tags(&key, &tags).await?;

    Ok(TaskOutcome::Completed(contact_output(&contact, Value::Null)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_context::RunContext;

  fn ctx() -> TaskContext {
    TaskContext::new("run", "n", Arc::new(RunContext::default()))
  }

  fn completed(outcome: TaskOutcome) -> Map<String, Value> {
    match outcome {
      TaskOutcome::Completed(out) => out.output,
      other => panic!("expected completion, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_create_is_upsert_by_email() {
    let contacts = Arc::new(InMemoryContacts::new());
    let handler = CreateContactHandler::new(contacts.clone());
    let config = json!({ "email": "a@b.com", "name": "Ada" });

    let first = completed(handler.execute(config.as_object().unwrap(), &ctx()).await.unwrap());
    let second = completed(handler.execute(config.as_object().unwrap(), &ctx()).await.unwrap());

    assert_eq!(first["created"], json!(true));
    assert_eq!(second["created"], json!(false));
    assert_eq!(first["contact_id"], second["contact_id"]);

    let stored = contacts.find("a@b.com").await.unwrap().unwrap();
    assert_eq!(stored.fields["name"], json!("Ada"));
  }

  #[tokio::test]
  async fn test_update_and_tag() {
    let contacts = Arc::new(InMemoryContacts::new());
    contacts.upsert("a@b.com", Map::new()).await.unwrap();

    let update = UpdateContactHandler::new(contacts.clone());
    let config = json!({ "email": "a@b.com", "fields": { "stage": "lead" } });
    update.execute(config.as_object().unwrap(), &ctx()).await.unwrap();

    let tag = AddTagHandler::new(contacts.clone());
    let config = json!({ "email": "a@b.com", "tags": ["vip", "vip", "beta"] });
    let out = completed(tag.execute(config.as_object().unwrap(), &ctx()).await.unwrap());

    assert_eq!(out["tags"], json!(["beta", "vip"]));
    let stored = contacts.find("a@b.com").await.unwrap().unwrap();
    assert_eq!(stored.fields["stage"], json!("lead"));
  }

  #[tokio::test]
  async fn test_tag_unknown_contact_is_handler_error() {
    let handler = AddTagHandler::new(Arc::new(InMemoryContacts::new()));
    let config = json!({ "email": "ghost@b.com", "tag": "vip" });

    let err = handler
      .execute(config.as_object().unwrap(), &ctx())
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::Handler { .. }));
  }
}
