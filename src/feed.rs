//! Personalized feed resolution.
//!
//! A user's follow graph (followed tags, sources of followed organisations,
//! home location and radius) becomes one disjunctive [`Predicate`] over
//! visible articles, evaluated with sort and pagination applied afterwards.

use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{NewsError, Result};
use crate::models::{Article, GeoPoint};
use crate::predicate::{Flag, GeoTarget, Pagination, Predicate, TextField};

#[derive(Debug, Clone, PartialEq)]
pub struct FollowGraph {
    pub tag_ids: Vec<i64>,
    /// Sources owned by the organisations the user follows.
    pub source_ids: Vec<i64>,
    pub location: Option<GeoPoint>,
    pub radius: f64,
}

pub async fn resolve_follow_graph(db: &Database, user_id: i64) -> Result<FollowGraph> {
    let user = db
        .get_user(user_id)
        .await?
        .ok_or(NewsError::UserNotFound(user_id))?;

    let tag_ids = db.user_tag_ids(user.id).await?;
    let organisation_ids = db.user_organisation_ids(user.id).await?;
    let source_ids = db.source_ids_for_organisations(&organisation_ids).await?;

    Ok(FollowGraph {
        tag_ids,
        source_ids,
        location: user.location(),
        radius: user.radius,
    })
}

/// Visible articles that match any branch of the follow graph, or are hot.
///
/// Without a user location the proximity branches are left out entirely.
/// Organisation proximity is its own branch and does not require the user
/// to follow or belong to that organisation.
pub fn feed_predicate(graph: &FollowGraph) -> Predicate {
    let mut branches = vec![
        Predicate::HasAnyTag(graph.tag_ids.clone()),
        Predicate::SourceIn(graph.source_ids.clone()),
        Predicate::Flag(Flag::IsHot, true),
    ];

    match graph.location {
        Some(center) => {
            branches.push(Predicate::Within {
                target: GeoTarget::Article,
                center,
                radius: graph.radius,
            });
            branches.push(Predicate::Within {
                target: GeoTarget::SourceOrganisation,
                center,
                radius: graph.radius,
            });
        }
        None => debug!("User has no location; geo clause skipped"),
    }

    Predicate::Flag(Flag::IsVisible, true).and(Predicate::Or(branches))
}

/// The user's ranked page of articles, or `None` when no personalized feed
/// can be produced (unknown user, storage failure).
pub async fn resolve_personalized_feed(
    db: &Database,
    user_id: i64,
    pagination: &Pagination,
) -> Option<Vec<Article>> {
    let result = async {
        let graph = resolve_follow_graph(db, user_id).await?;
        db.find_articles(&feed_predicate(&graph), pagination).await
    }
    .await;

    match result {
        Ok(articles) => Some(articles),
        Err(e) => {
            warn!("No personalized feed for user {}: {}", user_id, e);
            None
        }
    }
}

/// Case-insensitive keyword search over visible titles and teasers.
pub fn search_predicate(query: &str, excluded_sources: &[i64]) -> Predicate {
    let mut predicate = Predicate::Flag(Flag::IsVisible, true).and(Predicate::Or(vec![
        Predicate::Contains(TextField::Title, query.to_string()),
        Predicate::Contains(TextField::Teaser, query.to_string()),
    ]));
    if !excluded_sources.is_empty() {
        predicate =
            predicate.and(Predicate::not(Predicate::SourceIn(excluded_sources.to_vec())));
    }
    predicate
}
