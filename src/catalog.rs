//! Action catalog: the registry from action type to execution contract.
//!
//! The dispatcher never branches on type names. Everything it needs to know
//! about a type (payload schema, validation policy, executor) lives here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ValidationConfig;
use crate::executor::outbound::{ContentSource, OutboundExecutor};
use crate::executor::{ContentGenerator, Executor, Transport};
use crate::models::action::NewAction;
use crate::persistence::db::Database;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::prospect_repo::ProspectRepo;
use crate::{AppError, Result};

/// Composed first message to a new connection.
pub const SEND_FIRST_CONTACT: &str = "send_first_contact";
/// Reply to an inbound message; text supplied in the payload.
pub const SEND_REPLY: &str = "send_reply";
/// Follow-up stages composed by the content generator.
pub const COMPOSED_FOLLOWUPS: [&str; 4] = [
    "send_followup_a1",
    "send_followup_a2",
    "send_followup_a3",
    "send_followup_b",
];
/// Final follow-up stage; payload content wins over composition.
pub const SEND_FOLLOWUP_C: &str = "send_followup_c";

/// Execution contract for one action type.
#[derive(Clone)]
pub struct ActionSpec {
    /// Registered type name.
    pub name: String,
    /// Payload fields that must be non-empty strings.
    pub required_fields: Vec<&'static str>,
    /// Payload fields that must be strings when present.
    pub optional_fields: Vec<&'static str>,
    /// Hold drafts for a human decision before delivery.
    pub requires_validation: bool,
    /// Reject enqueue requests without a prospect.
    pub requires_prospect: bool,
    /// Executor invoked by every dispatch path.
    pub executor: Arc<dyn Executor>,
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("required_fields", &self.required_fields)
            .field("optional_fields", &self.optional_fields)
            .field("requires_validation", &self.requires_validation)
            .field("requires_prospect", &self.requires_prospect)
            .finish_non_exhaustive()
    }
}

impl ActionSpec {
    /// Prospect-addressed spec with no payload fields and no validation.
    #[must_use]
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            requires_validation: false,
            requires_prospect: true,
            executor,
        }
    }

    /// Require a non-empty string payload field.
    #[must_use]
    pub fn require_field(mut self, field: &'static str) -> Self {
        self.required_fields.push(field);
        self
    }

    /// Accept an optional string payload field.
    #[must_use]
    pub fn optional_field(mut self, field: &'static str) -> Self {
        self.optional_fields.push(field);
        self
    }

    /// Set whether drafts are held for review.
    #[must_use]
    pub fn validated(mut self, requires_validation: bool) -> Self {
        self.requires_validation = requires_validation;
        self
    }

    /// Allow account-level actions without a prospect.
    #[must_use]
    pub fn account_level(mut self) -> Self {
        self.requires_prospect = false;
        self
    }

    fn check_payload(&self, payload: &Value) -> Result<()> {
        let Some(object) = payload.as_object() else {
            return Err(AppError::InvalidPayload(format!(
                "{} payload must be a JSON object",
                self.name
            )));
        };

        for field in &self.required_fields {
            match object.get(*field).and_then(Value::as_str) {
                Some(text) if !text.trim().is_empty() => {}
                _ => {
                    return Err(AppError::InvalidPayload(format!(
                        "{} requires non-empty string field '{field}'",
                        self.name
                    )));
                }
            }
        }

        for field in &self.optional_fields {
            if let Some(value) = object.get(*field) {
                if !value.is_string() && !value.is_null() {
                    return Err(AppError::InvalidPayload(format!(
                        "{} field '{field}' must be a string",
                        self.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Registry of action types.
#[derive(Debug, Default)]
pub struct ActionCatalog {
    specs: BTreeMap<String, ActionSpec>,
}

impl ActionCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default outbound catalog sharing one composer and transport.
    ///
    /// `send_first_contact` and `send_reply` are always validated; types in
    /// `validation.required` are validated as well.
    #[must_use]
    pub fn outbound(
        composer: Arc<dyn ContentGenerator>,
        transport: Arc<dyn Transport>,
        db: Arc<Database>,
        validation: &ValidationConfig,
    ) -> Self {
        let executor = |source: ContentSource| -> Arc<dyn Executor> {
            Arc::new(OutboundExecutor::new(
                source,
                Arc::clone(&composer),
                Arc::clone(&transport),
                ProspectRepo::new(Arc::clone(&db)),
                MessageRepo::new(Arc::clone(&db)),
            ))
        };
        let required = |name: &str| validation.required.iter().any(|t| t == name);

        let mut catalog = Self::new();
        catalog.register(
            ActionSpec::new(SEND_FIRST_CONTACT, executor(ContentSource::Compose)).validated(true),
        );
        catalog.register(
            ActionSpec::new(SEND_REPLY, executor(ContentSource::Payload("content")))
                .require_field("content")
                .optional_field("in_reply_to")
                .validated(true),
        );
        for name in COMPOSED_FOLLOWUPS {
            catalog.register(
                ActionSpec::new(name, executor(ContentSource::Compose)).validated(required(name)),
            );
        }
        catalog.register(
            ActionSpec::new(
                SEND_FOLLOWUP_C,
                executor(ContentSource::PayloadOrCompose("content")),
            )
            .optional_field("content")
            .validated(required(SEND_FOLLOWUP_C)),
        );
        catalog
    }

    /// Add or replace a type.
    pub fn register(&mut self, spec: ActionSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Look up a type.
    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<&ActionSpec> {
        self.specs.get(action_type)
    }

    /// Look up a type, failing when it is not registered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownActionType` for unregistered types.
    pub fn require(&self, action_type: &str) -> Result<&ActionSpec> {
        self.get(action_type)
            .ok_or_else(|| AppError::UnknownActionType(action_type.to_owned()))
    }

    /// Check an enqueue request against the type's contract.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownActionType` for unregistered types and
    /// `AppError::InvalidPayload` for schema violations or a missing prospect.
    pub fn validate(&self, new: &NewAction) -> Result<()> {
        let spec = self.require(&new.action_type)?;
        if spec.requires_prospect && new.prospect_id.is_none() {
            return Err(AppError::InvalidPayload(format!(
                "{} requires a prospect",
                spec.name
            )));
        }
        spec.check_payload(&new.payload)
    }

    /// Registered type names in lexical order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}
