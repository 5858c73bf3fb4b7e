//! Items produced by the inference backend.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated insight article (the primary background feed item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub date: String,
    pub category: String,
    #[serde(default)]
    pub read_time: String,
}

impl Article {
    /// Fill the fields the model is not asked to produce.
    pub fn stamped(mut self) -> Self {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.date.is_empty() {
            self.date = Utc::now().format("%b %-d, %Y").to_string();
        }
        if self.author.is_empty() {
            self.author = "Growth Architect AI".to_string();
        }
        if self.read_time.is_empty() {
            let words = self.content.split_whitespace().count();
            self.read_time = format!("{} min read", (words / 200).max(1));
        }
        self
    }

    /// JSON schema sent with the generation request.
    pub fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "excerpt": { "type": "STRING" },
                "content": { "type": "STRING" },
                "category": { "type": "STRING" }
            },
            "required": ["title", "excerpt", "content", "category"]
        })
    }
}

/// A web source backing a grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

/// A market trend (the secondary background item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub topic: String,
    pub description: String,
    pub relevance_score: u8,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Structured strategy returned by the interactive strategy generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingStrategy {
    pub brand_name: String,
    pub target_audience: Vec<String>,
    pub key_channels: Vec<String>,
    pub content_ideas: Vec<String>,
    #[serde(rename = "metricKPIs")]
    pub metric_kpis: Vec<String>,
    pub summary: String,
}

impl MarketingStrategy {
    pub fn response_schema() -> serde_json::Value {
        let list = |description: &str| {
            serde_json::json!({
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": description
            })
        };
        serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "brandName": { "type": "STRING" },
                "targetAudience": list("List of 3 primary target demographics"),
                "keyChannels": list("List of 3 recommended marketing channels"),
                "contentIdeas": list("3 creative content hooks"),
                "metricKPIs": list("Primary success metrics"),
                "summary": { "type": "STRING" }
            },
            "required": ["brandName", "targetAudience", "keyChannels", "contentIdeas", "metricKPIs", "summary"]
        })
    }
}
