use scribe_core::{
    CachedEmbedding, ChapterRequest, ContextNode, OutlineRequest, PolishRequest, TaskPayload,
    TaskSpec
};

pub fn outline_spec(premise: &str) -> TaskSpec {
    TaskSpec::new(TaskPayload::Outline(OutlineRequest {
        premise: premise.to_string(),
        genre: None,
        chapter_count: 10,
        language: "en".to_string()
    }))
}

pub fn chapter_spec(title: &str, synopsis: &str) -> TaskSpec {
    TaskSpec::new(TaskPayload::Chapter(ChapterRequest {
        title: title.to_string(),
        synopsis: synopsis.to_string(),
        previous_excerpt: None,
        language: "en".to_string()
    }))
}

pub fn polish_spec(text: &str) -> TaskSpec {
    TaskSpec::new(TaskPayload::Polish(PolishRequest {
        text: text.to_string(),
        instructions: None,
        language: "en".to_string()
    }))
}

/// A node whose embedding is already cached, bypassing the embedding call.
pub fn embedded_node(id: &str, description: &str, vector: Vec<f32>) -> ContextNode {
    ContextNode::new(id, id, description).with_embedding(CachedEmbedding {
        vector,
        source_hash: utils::compute_content_hash(description)
    })
}

/// Small story bible: a world with two places and two characters.
pub fn story_tree() -> Vec<ContextNode> {
    vec![
        ContextNode::new(
            "world",
            "Saltmarsh",
            "A fishing town on a foggy coast, ruled by a harbor council."
        )
        .with_children(vec![
            ContextNode::new(
                "lighthouse",
                "The Lighthouse",
                "An abandoned lighthouse on the northern cliffs, lamp dark for years."
            ),
            ContextNode::new(
                "market",
                "Fish Market",
                "Crowded stalls by the docks where rumors trade faster than fish."
            ),
        ]),
        ContextNode::new(
            "mara",
            "Mara",
            "The lighthouse keeper's daughter, stubborn, afraid of deep water."
        ),
        ContextNode::new("tomas", "Tomas", "A smuggler who sells maps at the market."),
    ]
}
