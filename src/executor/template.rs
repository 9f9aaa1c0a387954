//! Template-based content generator.

use std::collections::HashMap;

use crate::models::prospect::ProspectContext;
use crate::{AppError, Result};

use super::{BoxFuture, ContentGenerator};

/// Renders per-action-type templates with prospect placeholders.
///
/// Supported placeholders: `{first_name}`, `{last_name}`, `{company}`,
/// `{job_title}`. Missing optional fields render as empty strings.
#[derive(Debug, Clone, Default)]
pub struct TemplateComposer {
    templates: HashMap<String, String>,
}

impl TemplateComposer {
    /// Construct a composer from an action-type → template map.
    #[must_use]
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Render the template for `action_type`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Composition` if no template is configured.
    pub fn render(&self, action_type: &str, prospect: &ProspectContext) -> Result<String> {
        let template = self.templates.get(action_type).ok_or_else(|| {
            AppError::Composition(format!("no template configured for {action_type}"))
        })?;

        Ok(template
            .replace("{first_name}", &prospect.first_name)
            .replace("{last_name}", &prospect.last_name)
            .replace("{company}", prospect.company.as_deref().unwrap_or_default())
            .replace("{job_title}", prospect.job_title.as_deref().unwrap_or_default()))
    }
}

impl ContentGenerator for TemplateComposer {
    fn compose<'a>(
        &'a self,
        action_type: &'a str,
        prospect: &'a ProspectContext,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { self.render(action_type, prospect) })
    }
}
