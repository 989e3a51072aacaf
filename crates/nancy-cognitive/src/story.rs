//! Story Extractor (spec.md §4.2's project story elements): pulls
//! decisions, meetings, features, eras, and collaborations out of an
//! ingested document's text, for the Graph brain to turn into nodes and
//! edges.
//!
//! Grounded on `llm_client.py`'s `extract_project_story_elements`: the same
//! five-category schema, the same 4000-character text window handed to the
//! model, and a best-effort parse that returns an empty story rather than
//! failing ingestion when the model's output can't be recovered.

use std::collections::HashMap;
use std::sync::Arc;

use nancy_core::contracts::LinguisticModel;
use nancy_types::packet::{GraphData, GraphEntity, GraphEntityRef, GraphRelationship};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How much of a document's text is shown to the model. Mirrors
/// `extract_project_story_elements`'s `text[:4000]` window.
const TEXT_WINDOW_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are analyzing a project document to extract key story elements that \
build the project's knowledge graph. Identify decisions made (decided to/chosen/selected/approved, \
who made them and why), meetings referenced (who attended, what was discussed, outcomes), \
features/components being discussed (who owns each one), project eras or phases (time periods, \
milestones), and key collaborations (cross-team work, coordination, dependencies). Respond with ONLY \
a JSON object with fields: decisions (array of {name, maker, context, era}), meetings (array of \
{name, attendees, outcomes, era}), features (array of {name, owner, influenced_by, era}), eras \
(array of {name, description, key_activities}), collaborations (array of {person1, person2, type, \
context}). Use empty arrays for categories with nothing found. Return no other text.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Decision {
    pub name: String,
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub era: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Meeting {
    pub name: String,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub era: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub influenced_by: Vec<String>,
    #[serde(default)]
    pub era: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Era {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key_activities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Collaboration {
    pub person1: String,
    pub person2: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// The project story elements extracted from one document. An empty
/// `ProjectStory` (every field an empty vec) is a valid, expected outcome
/// when a document has no narrative content to extract — extraction never
/// fails ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectStory {
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub meetings: Vec<Meeting>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub eras: Vec<Era>,
    #[serde(default)]
    pub collaborations: Vec<Collaboration>,
}

impl ProjectStory {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
            && self.meetings.is_empty()
            && self.features.is_empty()
            && self.eras.is_empty()
            && self.collaborations.is_empty()
    }

    /// Converts the extracted story into the foundational graph schema's
    /// node/edge vocabulary (spec.md §3's `Decision`/`Feature`/`Meeting`/`Era`
    /// node kinds and `DECISION_MADE`/`INFLUENCED_BY`/`CREATED_IN`/
    /// `COLLABORATES_WITH` edge kinds), for the packet processor to fold into
    /// a packet's graph payload alongside any entities an extractor already
    /// populated.
    pub fn to_graph_data(&self) -> GraphData {
        let mut entities = Vec::new();
        let mut relationships = Vec::new();

        let person_ref = |name: &str| GraphEntityRef {
            entity_type: "Person".to_string(),
            name: name.to_string(),
        };
        let era_ref = |name: &str| GraphEntityRef {
            entity_type: "Era".to_string(),
            name: name.to_string(),
        };

        for decision in &self.decisions {
            entities.push(GraphEntity {
                entity_type: "Decision".to_string(),
                name: decision.name.clone(),
                properties: decision
                    .context
                    .as_ref()
                    .map(|c| HashMap::from([("context".to_string(), c.clone())]))
                    .unwrap_or_default(),
                confidence: 1.0,
            });
            if let Some(maker) = &decision.maker {
                relationships.push(GraphRelationship {
                    source: person_ref(maker),
                    relationship: "DECISION_MADE".to_string(),
                    target: GraphEntityRef {
                        entity_type: "Decision".to_string(),
                        name: decision.name.clone(),
                    },
                    properties: HashMap::new(),
                });
            }
            if let Some(era) = &decision.era {
                relationships.push(GraphRelationship {
                    source: GraphEntityRef {
                        entity_type: "Decision".to_string(),
                        name: decision.name.clone(),
                    },
                    relationship: "CREATED_IN".to_string(),
                    target: era_ref(era),
                    properties: HashMap::new(),
                });
            }
        }

        for meeting in &self.meetings {
            entities.push(GraphEntity {
                entity_type: "Meeting".to_string(),
                name: meeting.name.clone(),
                properties: if meeting.outcomes.is_empty() {
                    HashMap::new()
                } else {
                    HashMap::from([("outcomes".to_string(), meeting.outcomes.join("; "))])
                },
                confidence: 1.0,
            });
            for attendee in &meeting.attendees {
                relationships.push(GraphRelationship {
                    source: person_ref(attendee),
                    relationship: "MENTIONED_IN".to_string(),
                    target: GraphEntityRef {
                        entity_type: "Meeting".to_string(),
                        name: meeting.name.clone(),
                    },
                    properties: HashMap::new(),
                });
            }
            if let Some(era) = &meeting.era {
                relationships.push(GraphRelationship {
                    source: GraphEntityRef {
                        entity_type: "Meeting".to_string(),
                        name: meeting.name.clone(),
                    },
                    relationship: "CREATED_IN".to_string(),
                    target: era_ref(era),
                    properties: HashMap::new(),
                });
            }
        }

        for feature in &self.features {
            entities.push(GraphEntity {
                entity_type: "Feature".to_string(),
                name: feature.name.clone(),
                properties: HashMap::new(),
                confidence: 1.0,
            });
            if let Some(owner) = &feature.owner {
                relationships.push(GraphRelationship {
                    source: person_ref(owner),
                    relationship: "AUTHORED".to_string(),
                    target: GraphEntityRef {
                        entity_type: "Feature".to_string(),
                        name: feature.name.clone(),
                    },
                    properties: HashMap::new(),
                });
            }
            for influence in &feature.influenced_by {
                relationships.push(GraphRelationship {
                    source: GraphEntityRef {
                        entity_type: "Feature".to_string(),
                        name: feature.name.clone(),
                    },
                    relationship: "INFLUENCED_BY".to_string(),
                    target: GraphEntityRef {
                        entity_type: "Decision".to_string(),
                        name: influence.clone(),
                    },
                    properties: HashMap::new(),
                });
            }
            if let Some(era) = &feature.era {
                relationships.push(GraphRelationship {
                    source: GraphEntityRef {
                        entity_type: "Feature".to_string(),
                        name: feature.name.clone(),
                    },
                    relationship: "CREATED_IN".to_string(),
                    target: era_ref(era),
                    properties: HashMap::new(),
                });
            }
        }

        for era in &self.eras {
            let mut properties = HashMap::new();
            if let Some(description) = &era.description {
                properties.insert("description".to_string(), description.clone());
            }
            if !era.key_activities.is_empty() {
                properties.insert("key_activities".to_string(), era.key_activities.join("; "));
            }
            entities.push(GraphEntity {
                entity_type: "Era".to_string(),
                name: era.name.clone(),
                properties,
                confidence: 1.0,
            });
        }

        for collaboration in &self.collaborations {
            let mut properties = HashMap::new();
            if let Some(kind) = &collaboration.kind {
                properties.insert("type".to_string(), kind.clone());
            }
            if let Some(context) = &collaboration.context {
                properties.insert("context".to_string(), context.clone());
            }
            relationships.push(GraphRelationship {
                source: person_ref(&collaboration.person1),
                relationship: "COLLABORATES_WITH".to_string(),
                target: person_ref(&collaboration.person2),
                properties,
            });
        }

        GraphData {
            entities,
            relationships,
            context: HashMap::new(),
        }
    }
}

pub struct StoryExtractor {
    llm: Option<Arc<dyn LinguisticModel>>,
}

impl StoryExtractor {
    pub fn new(llm: Option<Arc<dyn LinguisticModel>>) -> Self {
        Self { llm }
    }

    /// Extracts a [`ProjectStory`] from `text`. Returns an empty story,
    /// never an error, when no linguistic model is configured or the model's
    /// output can't be parsed after one repair pass — extraction is a
    /// best-effort enrichment, not a required step of ingestion.
    pub async fn extract_story(&self, document_name: &str, text: &str) -> ProjectStory {
        let Some(llm) = &self.llm else {
            return ProjectStory::default();
        };

        let window: String = text.chars().take(TEXT_WINDOW_CHARS).collect();
        let user_prompt = format!("Document: {document_name}\n\nFull text:\n{window}\n\nExtract the project story elements from this document.");

        let raw = match llm.complete(SYSTEM_PROMPT, &user_prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(document_name, error = %e, "story extractor: linguistic model call failed");
                return ProjectStory::default();
            }
        };

        parse_story(&raw).unwrap_or_else(|| {
            warn!(document_name, "story extractor: could not parse model output, returning empty story");
            ProjectStory::default()
        })
    }
}

fn parse_story(raw: &str) -> Option<ProjectStory> {
    if let Ok(story) = serde_json::from_str(raw.trim()) {
        return Some(story);
    }
    let without_fences = strip_code_fences(raw);
    if let Ok(story) = serde_json::from_str(&without_fences) {
        return Some(story);
    }
    let extracted = extract_first_json_object(&without_fences)?;
    serde_json::from_str(&extracted).ok()
}

fn strip_code_fences(raw: &str) -> String {
    static FENCE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = FENCE.get_or_init(|| regex::Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
    match re.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| raw.to_string()),
        None => raw.to_string(),
    }
}

fn extract_first_json_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in raw[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
