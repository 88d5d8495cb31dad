use anyhow::Result;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::embeddings::EmbeddingModel;
use crate::llm::{GenerationConfig, LLMProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub owner_id: String,
    pub document_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Community {
    pub id: String,
    pub members: Vec<String>,
    pub summary: Option<String>,
    /// Embedding of `summary`, cached alongside it so community search doesn't
    /// re-embed on every query.
    pub summary_embedding: Option<Vec<f32>>,
}

/// Entities, relationships and Louvain communities over them.
///
/// Communities are identified purely by string id — never parsed back to an
/// integer — because a store that lets community keys drift between `int`
/// and `str` representations makes `community_summaries` lookups silently
/// miss half the time.
pub struct KnowledgeGraph {
    graph: UnGraph<(), ()>,
    entities: HashMap<String, Entity>,
    id_to_node: HashMap<String, NodeIndex>,
    node_to_id: HashMap<NodeIndex, String>,
    relationships: Vec<Relationship>,
    communities: HashMap<String, Community>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            entities: HashMap::new(),
            id_to_node: HashMap::new(),
            node_to_id: HashMap::new(),
            relationships: Vec::new(),
            communities: HashMap::new(),
        }
    }

    pub fn add_entity(
        &mut self,
        id: &str,
        name: &str,
        entity_type: &str,
        description: &str,
        owner_id: &str,
        document_id: &str,
    ) {
        if self.entities.contains_key(id) {
            return;
        }
        let node = self.graph.add_node(());
        self.id_to_node.insert(id.to_string(), node);
        self.node_to_id.insert(node, id.to_string());
        self.entities.insert(
            id.to_string(),
            Entity {
                id: id.to_string(),
                name: name.to_string(),
                entity_type: entity_type.to_string(),
                description: description.to_string(),
                owner_id: owner_id.to_string(),
                document_id: document_id.to_string(),
            },
        );
    }

    /// Only adds the relationship if both endpoints already exist (I2).
    pub fn add_relationship(&mut self, source: &str, target: &str, relation: &str, description: &str) {
        let (Some(&a), Some(&b)) = (self.id_to_node.get(source), self.id_to_node.get(target)) else {
            return;
        };
        self.graph.update_edge(a, b, ());
        self.relationships.push(Relationship {
            source: source.to_string(),
            target: target.to_string(),
            relation: relation.to_string(),
            description: description.to_string(),
        });
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Modularity-maximizing Louvain partition over the undirected,
    /// unit-weighted relationship graph. Isolated entities become singleton
    /// communities. Existing summaries for communities whose membership is
    /// unchanged are preserved; everything else is invalidated and must be
    /// regenerated via `generate_community_summaries`.
    pub fn detect_communities(&mut self) {
        let partition = louvain_partition(&self.graph);

        let mut by_label: HashMap<usize, Vec<String>> = HashMap::new();
        for (node, label) in partition {
            if let Some(id) = self.node_to_id.get(&node) {
                by_label.entry(label).or_default().push(id.clone());
            }
        }

        let mut new_communities = HashMap::new();
        for (i, (_, mut members)) in by_label.into_iter().enumerate() {
            members.sort();
            let community_id = format!("c{i}");
            let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();

            let (summary, summary_embedding) = self
                .communities
                .values()
                .find(|c| {
                    let existing: HashSet<&str> = c.members.iter().map(String::as_str).collect();
                    existing == member_set
                })
                .map(|c| (c.summary.clone(), c.summary_embedding.clone()))
                .unwrap_or((None, None));

            new_communities.insert(
                community_id.clone(),
                Community {
                    id: community_id,
                    members,
                    summary,
                    summary_embedding,
                },
            );
        }

        self.communities = new_communities;
    }

    pub fn communities_for_owner(&self, owner_id: &str) -> Vec<&Community> {
        self.communities
            .values()
            .filter(|c| {
                c.members
                    .iter()
                    .any(|m| self.entities.get(m).is_some_and(|e| e.owner_id == owner_id))
            })
            .collect()
    }

    /// Generate a thematic summary for every community lacking one, using up
    /// to the top 20 member entity descriptions per community. Skips
    /// communities that already have a cached summary.
    pub async fn generate_community_summaries(
        &mut self,
        llm: &dyn LLMProvider,
    ) -> Result<()> {
        let ids: Vec<String> = self
            .communities
            .iter()
            .filter(|(_, c)| c.summary.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            let Some(community) = self.communities.get(&id) else { continue };
            let descriptions: Vec<String> = community
                .members
                .iter()
                .take(20)
                .filter_map(|m| self.entities.get(m))
                .map(|e| format!("- {} ({}): {}", e.name, e.entity_type, e.description))
                .collect();
            if descriptions.is_empty() {
                continue;
            }

            let prompt = format!(
                "Summarize the common theme connecting these related entities in 2-4 sentences:\n\n{}",
                descriptions.join("\n")
            );
            let config = GenerationConfig {
                max_tokens: 300,
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                repetition_penalty: 1.1,
                stop_sequences: vec![],
                seed: None,
            };

            match llm.generate(&prompt, &config).await {
                Ok(summary) => {
                    if let Some(c) = self.communities.get_mut(&id) {
                        c.summary = Some(summary.trim().to_string());
                        c.summary_embedding = None;
                    }
                }
                Err(e) => {
                    tracing::warn!(community = %id, error = %e, "Community summary generation failed");
                }
            }
        }
        Ok(())
    }

    /// Semantic search over community summaries, pre-filtered to
    /// communities owned by `owner_id`. Falls back to keyword overlap when
    /// no embedder is supplied or when cosine similarity never clears 0.2.
    pub fn search_communities(
        &mut self,
        query: &str,
        embedder: Option<&dyn EmbeddingModel>,
        top_k: usize,
        owner_id: &str,
    ) -> Vec<&Community> {
        let owned_ids: Vec<String> = self
            .communities
            .iter()
            .filter(|(_, c)| {
                c.members
                    .iter()
                    .any(|m| self.entities.get(m).is_some_and(|e| e.owner_id == owner_id))
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut scored: Vec<(String, f32)> = Vec::new();

        if let Some(embedder) = embedder {
            if let Ok(query_vec) = embedder.embed_query(query) {
                for id in &owned_ids {
                    let embedding = {
                        let community = self.communities.get(id).unwrap();
                        match &community.summary_embedding {
                            Some(v) => Some(v.clone()),
                            None => community
                                .summary
                                .as_ref()
                                .and_then(|s| embedder.embed_document(s).ok()),
                        }
                    };
                    if let Some(embedding) = embedding {
                        if let Some(c) = self.communities.get_mut(id) {
                            c.summary_embedding = Some(embedding.clone());
                        }
                        let sim = cosine_similarity(&query_vec, &embedding);
                        scored.push((id.clone(), sim));
                    }
                }
                scored.retain(|(_, s)| *s > 0.2);
            }
        }

        if scored.is_empty() {
            let query_words: HashSet<String> =
                query.to_lowercase().split_whitespace().map(str::to_string).collect();
            for id in &owned_ids {
                let community = self.communities.get(id).unwrap();
                let Some(summary) = &community.summary else { continue };
                let summary_words: HashSet<String> =
                    summary.to_lowercase().split_whitespace().map(str::to_string).collect();
                let overlap = query_words.intersection(&summary_words).count();
                if overlap > 0 {
                    scored.push((id.clone(), overlap as f32));
                }
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
            .into_iter()
            .filter_map(|(id, _)| self.communities.get(&id))
            .collect()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.entities.clear();
        self.id_to_node.clear();
        self.node_to_id.clear();
        self.relationships.clear();
        self.communities.clear();
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let doc = PersistedGraph {
            entities: self.entities.values().cloned().collect(),
            relationships: self.relationships.clone(),
            communities: self.communities.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let doc: PersistedGraph = serde_json::from_str(&json)?;
        let mut kg = Self::new();
        for e in doc.entities {
            kg.add_entity(&e.id, &e.name, &e.entity_type, &e.description, &e.owner_id, &e.document_id);
        }
        for r in doc.relationships {
            kg.add_relationship(&r.source, &r.target, &r.relation, &r.description);
        }
        for c in doc.communities {
            kg.communities.insert(c.id.clone(), c);
        }
        Ok(kg)
    }
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    communities: Vec<Community>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Greedy Louvain modularity maximization. No crate in the dependency stack
/// implements this, so it's hand-rolled on top of petgraph's adjacency
/// iteration: repeated local-move passes followed by community aggregation,
/// until a pass produces no improvement.
fn louvain_partition(graph: &UnGraph<(), ()>) -> HashMap<NodeIndex, usize> {
    let n = graph.node_count();
    if n == 0 {
        return HashMap::new();
    }

    let m2: f64 = (graph.edge_count() * 2).max(1) as f64;
    let degree = |node: NodeIndex| graph.edges(node).count() as f64;

    let mut label: HashMap<NodeIndex, usize> =
        graph.node_indices().enumerate().map(|(i, n)| (n, i)).collect();

    let mut improved = true;
    let mut passes = 0;
    while improved && passes < 20 {
        improved = false;
        passes += 1;

        for node in graph.node_indices() {
            let current_label = label[&node];
            let mut neighbor_label_weight: HashMap<usize, f64> = HashMap::new();
            for edge in graph.edges(node) {
                let neighbor = if edge.source() == node { edge.target() } else { edge.source() };
                *neighbor_label_weight.entry(label[&neighbor]).or_insert(0.0) += 1.0;
            }
            if neighbor_label_weight.is_empty() {
                continue;
            }

            let ki = degree(node);
            let mut best_label = current_label;
            let mut best_gain = 0.0_f64;

            for (&candidate_label, &edges_to) in &neighbor_label_weight {
                if candidate_label == current_label {
                    continue;
                }
                let sigma_tot: f64 = graph
                    .node_indices()
                    .filter(|&other| label[&other] == candidate_label)
                    .map(degree)
                    .sum();
                let gain = edges_to - (sigma_tot * ki) / m2;
                if gain > best_gain {
                    best_gain = gain;
                    best_label = candidate_label;
                }
            }

            if best_label != current_label {
                label.insert(node, best_label);
                improved = true;
            }
        }
    }

    // Canonicalize labels to a dense 0..k range for stable downstream ids.
    let mut remap: HashMap<usize, usize> = HashMap::new();
    for node in graph.node_indices() {
        let raw = label[&node];
        let next_id = remap.len();
        remap.entry(raw).or_insert(next_id);
    }
    label.into_iter().map(|(node, raw)| (node, remap[&raw])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.add_entity("e1", "Alice", "Person", "works on RAG", "u1", "d1");
        kg.add_entity("e2", "Bob", "Person", "works on RAG", "u1", "d1");
        kg.add_entity("e3", "Carol", "Person", "works on graphs", "u1", "d1");
        kg.add_relationship("e1", "e2", "collaborates_with", "co-authored a paper");
        kg
    }

    #[test]
    fn relationship_requires_both_endpoints() {
        let mut kg = KnowledgeGraph::new();
        kg.add_entity("e1", "Alice", "Person", "", "u1", "d1");
        kg.add_relationship("e1", "missing", "knows", "");
        assert_eq!(kg.relationship_count(), 0);
    }

    #[test]
    fn detect_communities_covers_isolated_nodes() {
        let mut kg = sample_graph();
        kg.detect_communities();
        let all_members: usize = kg.communities.values().map(|c| c.members.len()).sum();
        assert_eq!(all_members, 3);
        // Carol has no relationships, so she must land in her own singleton.
        let carol_community = kg
            .communities
            .values()
            .find(|c| c.members.contains(&"e3".to_string()))
            .unwrap();
        assert_eq!(carol_community.members.len(), 1);
    }

    #[test]
    fn save_and_load_round_trips() {
        let mut kg = sample_graph();
        kg.detect_communities();
        let dir = std::env::temp_dir().join(format!("kg_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("graph.json");
        kg.save(&path).unwrap();
        let loaded = KnowledgeGraph::load(&path).unwrap();
        assert_eq!(loaded.entity_count(), kg.entity_count());
        assert_eq!(loaded.relationship_count(), kg.relationship_count());
        std::fs::remove_dir_all(&dir).ok();
    }
}
