//! Merge plans: the operator's answers for a whole session, written ahead of
//! time as TOML.
//!
//! ```toml
//! use_suggestions = true
//!
//! [fields.category]
//! choice = "keep-duplicate"
//!
//! [fields.job_role]
//! choice = "edit-custom"
//! value = "Chief Technology Officer"
//!
//! [fields.emails]
//! move = ["2", "3"]
//! remove_primary = ["7"]
//! add = [{ type = "email", email = "new@example.com" }]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crm_merge::NewItem;
use crm_types::{Choice, FieldKey, ScalarValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanChoice {
    KeepPrimary,
    KeepDuplicate,
    EditCustom,
    Combine,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldPlan {
    pub choice: Option<PlanChoice>,
    /// Literal for `edit-custom`.
    pub value: Option<String>,
    #[serde(rename = "move")]
    pub move_items: Vec<String>,
    pub remove_primary: Vec<String>,
    pub remove_duplicate: Vec<String>,
    pub add: Vec<NewItem>,
}

impl FieldPlan {
    pub fn has_item_actions(&self) -> bool {
        !self.move_items.is_empty()
            || !self.remove_primary.is_empty()
            || !self.remove_duplicate.is_empty()
            || !self.add.is_empty()
    }

    /// The wizard choice this plan names for `field`, if any.
    pub fn choice_for(&self, field: FieldKey) -> anyhow::Result<Option<Choice>> {
        let Some(choice) = self.choice else {
            return Ok(None);
        };
        let choice = match choice {
            PlanChoice::KeepPrimary => Choice::KeepPrimary,
            PlanChoice::KeepDuplicate => Choice::KeepDuplicate,
            PlanChoice::Combine => Choice::Combine,
            PlanChoice::EditCustom => {
                let value = self
                    .value
                    .as_deref()
                    .with_context(|| format!("{field}: edit-custom needs a value"))?;
                Choice::EditCustom(
                    ScalarValue::parse_for(field, value).with_context(|| format!("{field}"))?,
                )
            }
        };
        Ok(Some(choice))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergePlan {
    /// Apply the wizard's suggested choice to fields the plan leaves open.
    pub use_suggestions: bool,
    pub fields: BTreeMap<FieldKey, FieldPlan>,
}

impl MergePlan {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let plan: Self = toml::from_str(input).context("invalid merge plan")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        Self::from_toml_str(&input)
    }

    pub fn field(&self, key: FieldKey) -> Option<&FieldPlan> {
        self.fields.get(&key)
    }

    /// Catch mistakes before the session touches the store.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (field, plan) in &self.fields {
            if let Some(choice) = plan.choice_for(*field)? {
                if !choice.applies_to(field.kind()) {
                    bail!("{field}: {choice} does not apply to this field");
                }
            }
            if !field.is_collection() && plan.has_item_actions() {
                bail!("{field}: item actions are only allowed on collection fields");
            }
            if let Some(item) = plan.add.iter().find(|i| i.field() != *field) {
                bail!("{field}: cannot add {} item {item}", item.field());
            }
        }
        Ok(())
    }
}
