//! Persona Harvest FSM (C11): `collecting -> analyzing -> finalizing ->
//! complete`, gathering voice samples, extracting traits through the
//! voice-analyzer adapter, and finalizing a persona profile plus zero or
//! more style profiles.
//!
//! Grounded on `uaos-agent`'s explicit-status-check transition style
//! (`AgentTaskStatus::is_terminal`/per-call `WrongPhase` rejection),
//! adapted here to `HarvestPhase`'s four states, and on `uaos-archive`'s
//! embedding-adapter-plus-store pattern for the archive-sourced sample
//! path.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use uaos_adapters::{EmbeddingAdapter, VoiceAnalyzerAdapter};
use uaos_store::Store;
use uaos_types::{
    HarvestId, HarvestPhase, HarvestSample, NodeId, PersonaError, PersonaHarvest, PersonaId,
    PersonaProfile, StyleId, StyleProfile, Timestamp, UaosResult, UserId, Value, VoiceTraits,
};

/// How long a `complete` harvest record stays loadable before
/// [`PersonaPlane::prune_expired_harvests`] removes it (spec.md §4.10).
const RETENTION_SECONDS: i64 = 60;

/// A caller-supplied style to persist alongside the finalized persona.
#[derive(Debug, Clone)]
pub struct StyleDraft {
    pub name: String,
    pub is_default: Option<bool>,
    pub descriptors: BTreeMap<String, Value>,
    pub example_text_refs: Vec<NodeId>,
}

/// Arguments to [`PersonaPlane::finalize_persona`].
#[derive(Debug, Clone, Default)]
pub struct FinalizeArgs {
    pub voice_traits: Option<VoiceTraits>,
    pub tone_markers: Option<Vec<String>>,
    pub formality_range: Option<(f32, f32)>,
    pub styles: Vec<StyleDraft>,
    pub set_as_default: bool,
}

/// Result of [`PersonaPlane::finalize_persona`].
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub harvest: PersonaHarvest,
    pub persona: PersonaProfile,
    pub styles: Vec<StyleProfile>,
}

/// Filter parameters for [`PersonaPlane::harvest_from_archive`].
#[derive(Debug, Clone)]
pub struct ArchiveHarvestOptions {
    pub limit: usize,
    pub min_relevance: f32,
}

impl Default for ArchiveHarvestOptions {
    fn default() -> Self {
        Self { limit: 20, min_relevance: 0.7 }
    }
}

fn expect_phase(harvest: &PersonaHarvest, expected: HarvestPhase) -> UaosResult<()> {
    if harvest.phase != expected {
        return Err(PersonaError::WrongPhase {
            expected: format!("{expected:?}").to_lowercase(),
            actual: format!("{:?}", harvest.phase).to_lowercase(),
        }
        .into());
    }
    Ok(())
}

/// Owns no state of its own: every harvest/persona/style lives in the
/// injected [`Store`]. Holds the adapters the FSM calls across its
/// `extractTraits`/`harvestFromArchive` transitions.
pub struct PersonaPlane {
    store: Arc<dyn Store>,
    voice_analyzer: Arc<dyn VoiceAnalyzerAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
}

impl PersonaPlane {
    pub fn new(store: Arc<dyn Store>, voice_analyzer: Arc<dyn VoiceAnalyzerAdapter>, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        Self { store, voice_analyzer, embedder }
    }

    async fn load(&self, id: HarvestId) -> UaosResult<PersonaHarvest> {
        self.store
            .load_harvest(id)
            .await?
            .ok_or_else(|| PersonaError::NotFound(id.to_string()).into())
    }

    /// `startHarvest({name}) -> PersonaHarvest` in `collecting`.
    #[instrument(skip(self))]
    pub async fn start_harvest(&self, user_id: UserId, name: String) -> UaosResult<PersonaHarvest> {
        let now = Utc::now();
        let harvest = PersonaHarvest {
            id: HarvestId::now_v7(),
            user_id,
            name,
            phase: HarvestPhase::Collecting,
            samples: Vec::new(),
            seen_node_ids: Default::default(),
            extracted_traits: None,
            persona_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.save_harvest(&harvest).await?;
        Ok(harvest)
    }

    /// `addSample` — only allowed in `collecting`.
    #[instrument(skip(self, text))]
    pub async fn add_sample(
        &self,
        id: HarvestId,
        text: String,
        source_node_id: Option<NodeId>,
        relevance: Option<f32>,
    ) -> UaosResult<PersonaHarvest> {
        let mut harvest = self.load(id).await?;
        expect_phase(&harvest, HarvestPhase::Collecting)?;
        if let Some(node_id) = source_node_id {
            harvest.seen_node_ids.insert(node_id);
        }
        harvest.samples.push(HarvestSample { text, source_node_id, relevance });
        harvest.updated_at = Utc::now();
        self.store.save_harvest(&harvest).await?;
        Ok(harvest)
    }

    /// `harvestFromArchive(query, limit, minRelevance)` — embeds the query,
    /// pulls the store's nearest neighbors, de-duplicates against samples
    /// already seen by archive node id, and restricts to author role
    /// `user` (or absent). Only allowed in `collecting`.
    #[instrument(skip(self, query))]
    pub async fn harvest_from_archive(
        &self,
        id: HarvestId,
        query: &str,
        opts: &ArchiveHarvestOptions,
    ) -> UaosResult<PersonaHarvest> {
        let mut harvest = self.load(id).await?;
        expect_phase(&harvest, HarvestPhase::Collecting)?;

        let query_vector = self.embedder.embed_text(query).await?;
        let matches = self.store.search_by_embedding(&query_vector, opts.limit, opts.min_relevance).await?;

        for m in matches {
            if harvest.seen_node_ids.contains(&m.node_id) {
                continue;
            }
            let Some(node) = self.store.get_node(m.node_id).await? else { continue };
            let role_ok = node.author_role.as_deref().map_or(true, |r| r == "user");
            if !role_ok {
                continue;
            }
            harvest.seen_node_ids.insert(node.id);
            harvest.samples.push(HarvestSample {
                text: node.content,
                source_node_id: Some(node.id),
                relevance: Some(m.similarity),
            });
        }
        harvest.updated_at = Utc::now();
        self.store.save_harvest(&harvest).await?;
        Ok(harvest)
    }

    /// `extractTraits` — transitions `collecting -> analyzing`, calling the
    /// voice-analyzer adapter over every sample's text. Fails `NoSamples`
    /// if none have been collected.
    #[instrument(skip(self))]
    pub async fn extract_traits(&self, id: HarvestId) -> UaosResult<PersonaHarvest> {
        let mut harvest = self.load(id).await?;
        expect_phase(&harvest, HarvestPhase::Collecting)?;
        if harvest.samples.is_empty() {
            return Err(PersonaError::NoSamples.into());
        }

        let texts: Vec<String> = harvest.samples.iter().map(|s| s.text.clone()).collect();
        let traits = self.voice_analyzer.analyze(&texts).await?;

        harvest.extracted_traits = Some(traits);
        harvest.phase = HarvestPhase::Analyzing;
        harvest.updated_at = Utc::now();
        self.store.save_harvest(&harvest).await?;
        Ok(harvest)
    }

    /// `finalizePersona({voiceTraits?, toneMarkers?, formalityRange?,
    /// styles?, setAsDefault?})` — transitions `analyzing -> finalizing ->
    /// complete`, persisting the persona and any style profiles (the first
    /// is marked default if none of the drafts specify one).
    #[instrument(skip(self, args))]
    pub async fn finalize_persona(&self, id: HarvestId, args: FinalizeArgs) -> UaosResult<FinalizeOutcome> {
        let mut harvest = self.load(id).await?;
        expect_phase(&harvest, HarvestPhase::Analyzing)?;
        harvest.phase = HarvestPhase::Finalizing;

        let mut traits = args
            .voice_traits
            .or_else(|| harvest.extracted_traits.clone())
            .unwrap_or(VoiceTraits { traits: Default::default(), tone_markers: Vec::new(), formality_range: None });
        if let Some(tone_markers) = args.tone_markers {
            traits.tone_markers = tone_markers;
        }
        if let Some(range) = args.formality_range {
            traits.formality_range = Some(range);
        }

        let persona = PersonaProfile {
            id: PersonaId::now_v7(),
            user_id: harvest.user_id,
            name: harvest.name.clone(),
            is_default: args.set_as_default,
            voice_traits: traits,
            example_text_refs: harvest.samples.iter().filter_map(|s| s.source_node_id).collect(),
            created_at: Utc::now(),
        };
        self.store.save_persona(&persona).await?;

        let any_explicit_default = args.styles.iter().any(|s| s.is_default == Some(true));
        let mut styles = Vec::with_capacity(args.styles.len());
        for (index, draft) in args.styles.into_iter().enumerate() {
            let is_default = draft.is_default.unwrap_or(!any_explicit_default && index == 0);
            let style = StyleProfile {
                id: StyleId::now_v7(),
                persona_id: persona.id,
                name: draft.name,
                is_default,
                descriptors: draft.descriptors,
                example_text_refs: draft.example_text_refs,
            };
            self.store.save_style(&style).await?;
            styles.push(style);
        }

        let now = Utc::now();
        harvest.persona_id = Some(persona.id);
        harvest.phase = HarvestPhase::Complete;
        harvest.completed_at = Some(now);
        harvest.updated_at = now;
        self.store.save_harvest(&harvest).await?;

        Ok(FinalizeOutcome { harvest, persona, styles })
    }

    /// Deletes every `complete` harvest whose `completedAt` is older than
    /// the 60-second inspection window. Returns the number pruned.
    #[instrument(skip(self))]
    pub async fn prune_expired_harvests(&self, user_id: Option<UserId>) -> UaosResult<usize> {
        let now = Utc::now();
        let cutoff: Timestamp = now - Duration::seconds(RETENTION_SECONDS);
        let harvests = self.store.list_harvests(user_id).await?;
        let mut pruned = 0;
        for harvest in harvests {
            let expired = harvest.phase == HarvestPhase::Complete
                && harvest.completed_at.map_or(false, |completed_at| completed_at <= cutoff);
            if expired {
                self.store.delete_harvest(harvest.id).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_adapters::{MockEmbeddingAdapter, StaticVoiceAnalyzerAdapter};
    use uaos_store::InMemoryStore;
    use uaos_types::identity::EntityIdType;

    fn plane() -> (PersonaPlane, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let traits = VoiceTraits { traits: Default::default(), tone_markers: vec!["wry".into()], formality_range: Some((0.2, 0.5)) };
        let analyzer = Arc::new(StaticVoiceAnalyzerAdapter::new(traits));
        let embedder = Arc::new(MockEmbeddingAdapter::new("mock-embed-1", 8));
        (PersonaPlane::new(store.clone(), analyzer, embedder), store)
    }

    #[tokio::test]
    async fn full_happy_path_transitions_through_all_phases() {
        let (plane, _store) = plane();
        let user = UserId::now_v7();
        let harvest = plane.start_harvest(user, "my voice".into()).await.unwrap();
        assert_eq!(harvest.phase, HarvestPhase::Collecting);

        let harvest = plane.add_sample(harvest.id, "first sample".into(), None, None).await.unwrap();
        let harvest = plane.add_sample(harvest.id, "second sample".into(), None, None).await.unwrap();
        assert_eq!(harvest.samples.len(), 2);

        let harvest = plane.extract_traits(harvest.id).await.unwrap();
        assert_eq!(harvest.phase, HarvestPhase::Analyzing);
        assert!(harvest.extracted_traits.is_some());

        let outcome = plane
            .finalize_persona(
                harvest.id,
                FinalizeArgs {
                    styles: vec![StyleDraft { name: "default".into(), is_default: None, descriptors: Default::default(), example_text_refs: vec![] }],
                    set_as_default: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.harvest.phase, HarvestPhase::Complete);
        assert!(outcome.persona.is_default);
        assert_eq!(outcome.styles.len(), 1);
        assert!(outcome.styles[0].is_default);
    }

    #[tokio::test]
    async fn extract_traits_with_zero_samples_fails_no_samples() {
        let (plane, _store) = plane();
        let harvest = plane.start_harvest(UserId::now_v7(), "empty".into()).await.unwrap();
        let err = plane.extract_traits(harvest.id).await.unwrap_err();
        assert!(err.to_string().contains("zero samples"));
    }

    #[tokio::test]
    async fn adding_samples_after_collecting_fails_wrong_phase() {
        let (plane, _store) = plane();
        let harvest = plane.start_harvest(UserId::now_v7(), "voice".into()).await.unwrap();
        let harvest = plane.add_sample(harvest.id, "sample".into(), None, None).await.unwrap();
        let harvest = plane.extract_traits(harvest.id).await.unwrap();
        assert!(plane.add_sample(harvest.id, "late sample".into(), None, None).await.is_err());
    }

    #[tokio::test]
    async fn harvest_from_archive_dedupes_and_restricts_to_user_role() {
        let (plane, store) = plane();
        let user_node = NodeId::now_v7();
        let assistant_node = NodeId::now_v7();
        store.seed_nodes([
            uaos_types::ArchiveNode {
                id: user_node,
                content: "hello world".into(),
                source_type: "message".into(),
                author_role: Some("user".into()),
                word_count: 2,
                source_created_at: None,
                embedding: Some(vec![1.0; 8]),
                embedding_model: Some("mock-embed-1".into()),
            },
            uaos_types::ArchiveNode {
                id: assistant_node,
                content: "assistant reply".into(),
                source_type: "message".into(),
                author_role: Some("assistant".into()),
                word_count: 2,
                source_created_at: None,
                embedding: Some(vec![1.0; 8]),
                embedding_model: Some("mock-embed-1".into()),
            },
        ]);

        let harvest = plane.start_harvest(UserId::now_v7(), "voice".into()).await.unwrap();
        let harvest = plane
            .harvest_from_archive(harvest.id, "hello", &ArchiveHarvestOptions { limit: 10, min_relevance: 0.0 })
            .await
            .unwrap();
        assert_eq!(harvest.samples.len(), 1);
        assert_eq!(harvest.samples[0].source_node_id, Some(user_node));

        // Repeated call does not re-add the same node.
        let harvest = plane
            .harvest_from_archive(harvest.id, "hello", &ArchiveHarvestOptions { limit: 10, min_relevance: 0.0 })
            .await
            .unwrap();
        assert_eq!(harvest.samples.len(), 1);
    }

    #[tokio::test]
    async fn prune_expired_harvests_removes_only_old_complete_records() {
        let (plane, store) = plane();
        let user = UserId::now_v7();
        let harvest = plane.start_harvest(user, "voice".into()).await.unwrap();
        let harvest = plane.add_sample(harvest.id, "sample".into(), None, None).await.unwrap();
        let harvest = plane.extract_traits(harvest.id).await.unwrap();
        let outcome = plane.finalize_persona(harvest.id, FinalizeArgs::default()).await.unwrap();

        // Freshly completed: not pruned yet.
        let pruned = plane.prune_expired_harvests(Some(user)).await.unwrap();
        assert_eq!(pruned, 0);
        assert!(store.load_harvest(outcome.harvest.id).await.unwrap().is_some());

        // Backdate completion past the retention window directly through the store.
        let mut stale = store.load_harvest(outcome.harvest.id).await.unwrap().unwrap();
        stale.completed_at = Some(Utc::now() - Duration::seconds(RETENTION_SECONDS + 1));
        store.save_harvest(&stale).await.unwrap();

        let pruned = plane.prune_expired_harvests(Some(user)).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(store.load_harvest(outcome.harvest.id).await.unwrap().is_none());
    }
}
