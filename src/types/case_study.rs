use serde::{Deserialize, Serialize};

use crate::utils::null_as_default;

/// How demanding a case study is.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    /// Level 1.
    Beginner,
    /// Level 2, and any level the server sends that has no mapping.
    #[default]
    Intermediate,
    /// Level 3.
    Advanced,
}

impl Difficulty {
    /// Map the server's integer level.
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => Difficulty::Beginner,
            2 => Difficulty::Intermediate,
            3 => Difficulty::Advanced,
            _ => Difficulty::Intermediate,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Beginner => f.write_str("Beginner"),
            Difficulty::Intermediate => f.write_str("Intermediate"),
            Difficulty::Advanced => f.write_str("Advanced"),
        }
    }
}

/// A learning milestone within a case study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifier referenced by messages and progress.
    pub id: String,

    /// Short title.
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    /// What the student should demonstrate.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    /// Hints the tutor may reveal.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hints: Vec<String>,
}

/// Background material shown alongside the chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMaterials {
    /// Narrative background.
    pub background: String,
    /// Concepts the student should know.
    pub key_concepts: Vec<String>,
    /// Reading to do before or during the session.
    pub required_reading: String,
}

/// A case study as the chat front-end consumes it.
///
/// Every collection is present (possibly empty), so rendering never has to
/// deal with absent fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStudy {
    /// Server identifier.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Mapped difficulty.
    pub difficulty: Difficulty,
    /// Estimated time, formatted as `"<n> min"`.
    pub estimated_time: String,
    /// Area of specialization.
    pub specialization: String,
    /// Learning objectives, in order.
    pub learning_objectives: Vec<String>,
    /// Context materials.
    pub context_materials: ContextMaterials,
    /// Checkpoint definitions, in order.
    pub checkpoints: Vec<Checkpoint>,
}

impl CaseStudy {
    /// Look up a checkpoint by id.
    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == checkpoint_id)
    }

    /// The first checkpoint, which new sessions start on.
    pub fn first_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.first()
    }
}

/// `context_materials` as it appears on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiContextMaterials {
    #[serde(default, deserialize_with = "null_as_default")]
    background: String,
    #[serde(default, deserialize_with = "null_as_default")]
    key_concepts: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    required_reading: String,
}

/// `GET /case-studies/{id}` as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiCaseStudyDetail {
    id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default)]
    difficulty: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    estimated_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    specialization: String,
    #[serde(default, deserialize_with = "null_as_default")]
    learning_objectives: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    context_materials: ApiContextMaterials,
    #[serde(default, deserialize_with = "null_as_default")]
    checkpoints: Vec<Checkpoint>,
}

impl From<ApiCaseStudyDetail> for CaseStudy {
    fn from(api: ApiCaseStudyDetail) -> Self {
        CaseStudy {
            id: api.id,
            title: api.title,
            description: api.description,
            difficulty: api
                .difficulty
                .map(Difficulty::from_level)
                .unwrap_or(Difficulty::Intermediate),
            estimated_time: format!("{} min", api.estimated_time),
            specialization: api.specialization,
            learning_objectives: api.learning_objectives,
            context_materials: ContextMaterials {
                background: api.context_materials.background,
                key_concepts: api.context_materials.key_concepts,
                required_reading: api.context_materials.required_reading,
            },
            checkpoints: api.checkpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(value: serde_json::Value) -> CaseStudy {
        serde_json::from_value::<ApiCaseStudyDetail>(value)
            .unwrap()
            .into()
    }

    #[test]
    fn full_detail_is_normalized() {
        let case = normalize(json!({
            "id": 7,
            "title": "Marbury v. Madison",
            "description": "Judicial review",
            "difficulty": 3,
            "estimated_time": 45,
            "specialization": "Constitutional law",
            "learning_objectives": ["Explain judicial review", "Assess the remedy"],
            "context_materials": {
                "background": "1803",
                "key_concepts": ["writ of mandamus"],
                "required_reading": "Opinion of Marshall, C.J."
            },
            "checkpoints": [
                {"id": "cp1", "title": "Facts", "description": "State the facts", "hints": ["Who sued?"]}
            ],
            "share_slug": "ab12cd34",
            "subtopic": {"id": 1}
        }));

        assert_eq!(case.id, 7);
        assert_eq!(case.difficulty, Difficulty::Advanced);
        assert_eq!(case.estimated_time, "45 min");
        assert_eq!(case.context_materials.key_concepts, vec!["writ of mandamus"]);
        assert_eq!(
            case.context_materials.required_reading,
            "Opinion of Marshall, C.J."
        );
        assert_eq!(case.checkpoint("cp1").unwrap().hints, vec!["Who sued?"]);
    }

    #[test]
    fn absent_collections_default_to_empty() {
        let case = normalize(json!({
            "id": 1,
            "title": "Sparse",
            "difficulty": 1,
            "estimated_time": 10,
            "learning_objectives": null,
            "context_materials": null
        }));

        assert_eq!(case.difficulty, Difficulty::Beginner);
        assert!(case.learning_objectives.is_empty());
        assert!(case.checkpoints.is_empty());
        assert_eq!(case.context_materials, ContextMaterials::default());
        assert_eq!(case.specialization, "");
        assert!(case.first_checkpoint().is_none());
    }

    #[test]
    fn unmapped_difficulty_is_intermediate() {
        assert_eq!(Difficulty::from_level(5), Difficulty::Intermediate);
        assert_eq!(Difficulty::from_level(0), Difficulty::Intermediate);
        assert_eq!(Difficulty::from_level(2), Difficulty::Intermediate);
        let case = normalize(json!({"id": 1, "estimated_time": 5}));
        assert_eq!(case.difficulty, Difficulty::Intermediate);
    }

    #[test]
    fn domain_serializes_camel_case() {
        let case = normalize(json!({
            "id": 1,
            "estimated_time": 30,
            "context_materials": {"key_concepts": ["stare decisis"]}
        }));
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["estimatedTime"], json!("30 min"));
        assert_eq!(json["contextMaterials"]["keyConcepts"], json!(["stare decisis"]));
        assert_eq!(json["learningObjectives"], json!([]));
    }
}
