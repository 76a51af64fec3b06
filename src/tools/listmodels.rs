use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::Model;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListModelsRequest {
    /// Optional filter on the display name (case-insensitive substring).
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub display_name: &'static str,
}

impl From<Model> for ModelInfo {
    fn from(model: Model) -> Self {
        Self {
            name: model.as_str(),
            display_name: model.display_name(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
}

impl ListModelsResponse {
    pub fn for_query(query: Option<&str>) -> Self {
        Self {
            models: Model::choices(query.unwrap_or(""))
                .into_iter()
                .map(ModelInfo::from)
                .collect(),
        }
    }

    pub fn to_markdown(&self) -> String {
        if self.models.is_empty() {
            return "No models match.".to_string();
        }
        let mut out = String::from("| name | model |\n|---|---|\n");
        for m in &self.models {
            out.push_str(&format!("| `{}` | {} |\n", m.name, m.display_name));
        }
        out
    }
}
