//! Read side over stored quest progress.

use common::SubjectId;
use domain::{ProgressAggregate, QuestDefinition};
use serde::Serialize;
use store::{AggregateStore, Document, DocumentQuery, Repository};

use crate::catalog::QuestCatalog;
use crate::error::Result;

/// One quest as seen by a subject: stored progress plus its definition.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerQuest {
    pub progress: ProgressAggregate,
    /// `None` if the quest was removed from the catalog.
    pub definition: Option<QuestDefinition>,
}

/// Queries progress aggregates and joins them with the catalog.
pub struct ProgressQueries<S, C> {
    progress: Repository<S, ProgressAggregate>,
    catalog: C,
}

impl<S: AggregateStore, C: QuestCatalog> ProgressQueries<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self {
            progress: Repository::new(store),
            catalog,
        }
    }

    /// Returns every quest the subject has progress on, ordered by last update.
    pub async fn for_subject(&self, subject_id: SubjectId) -> Result<Vec<PlayerQuest>> {
        let aggregates = self
            .progress
            .query(
                DocumentQuery::for_collection(ProgressAggregate::COLLECTION)
                    .key_prefix(ProgressAggregate::key_prefix_for(subject_id)),
            )
            .await?;

        let mut quests = Vec::with_capacity(aggregates.len());
        for progress in aggregates {
            let definition = self.catalog.get(progress.quest_id()).await?;
            quests.push(PlayerQuest {
                progress,
                definition,
            });
        }
        Ok(quests)
    }
}
