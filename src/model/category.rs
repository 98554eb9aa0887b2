use std::{collections::HashMap, fmt::Display};

use serde::{Deserialize, Serialize};

/// A named group of activities with a display colour, as configured in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub activities: Vec<String>,
}

impl Category {
    pub fn new(name: &str, color: &str, activities: &[&str]) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            activities: activities.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StyleToken {
    #[default]
    WorkOutput,
    Charge,
    Rest,
    Create,
    Gap,
    Entertainment,
}

impl StyleToken {
    /// Unknown colours render like work output.
    pub fn from_color(color: &str) -> Self {
        match color.trim().to_ascii_lowercase().as_str() {
            "green" => Self::Charge,
            "purple" => Self::Rest,
            "orange" => Self::Create,
            "cyan" => Self::Gap,
            "gray" | "grey" => Self::Entertainment,
            _ => Self::WorkOutput,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Self::WorkOutput => "btn-work-output",
            Self::Charge => "btn-charge",
            Self::Rest => "btn-rest",
            Self::Create => "btn-create",
            Self::Gap => "btn-gap",
            Self::Entertainment => "btn-entertainment",
        }
    }
}

impl Display for StyleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Used when the registry can't be fetched.
pub fn fallback_categories() -> Vec<Category> {
    vec![
        Category::new(
            "Work output",
            "blue",
            &["Planning", "Meetings", "Exploring", "Execution", "Retrospective"],
        ),
        Category::new("Recharge", "green", &["Talking with mentors", "Research"]),
    ]
}

/// Single lookup table for categories: category name to style, activity name to category.
/// Built once from the registry response.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
    styles: HashMap<String, StyleToken>,
    activities: HashMap<String, String>,
}

impl CategoryRegistry {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut styles = HashMap::new();
        let mut activities = HashMap::new();
        for category in &categories {
            styles.insert(category.name.clone(), StyleToken::from_color(&category.color));
            for activity in &category.activities {
                // First category listing an activity wins.
                activities
                    .entry(activity.clone())
                    .or_insert_with(|| category.name.clone());
            }
        }
        Self {
            categories,
            styles,
            activities,
        }
    }

    pub fn fallback() -> Self {
        Self::new(fallback_categories())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn is_known(&self, category: &str) -> bool {
        self.styles.contains_key(category)
    }

    pub fn style_for_category(&self, category: &str) -> StyleToken {
        self.styles.get(category).copied().unwrap_or_default()
    }

    pub fn category_for_activity(&self, activity: &str) -> Option<&str> {
        self.activities.get(activity).map(String::as_str)
    }

    /// Category to file an activity under when none was chosen: the registry's category, else the
    /// activity name itself.
    pub fn category_or_activity(&self, activity: &str) -> String {
        self.category_for_activity(activity)
            .unwrap_or(activity)
            .to_string()
    }

    pub fn style_for(&self, activity: &str, category: Option<&str>) -> StyleToken {
        match category.filter(|v| !v.is_empty()) {
            Some(category) => self.style_for_category(category),
            None => self
                .category_for_activity(activity)
                .map(|v| self.style_for_category(v))
                .unwrap_or_default(),
        }
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::fallback()
    }
}
