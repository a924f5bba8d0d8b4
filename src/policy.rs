//! Ownership checks consulted by the request authorization layer.

use crate::models::{Article, User};

pub fn is_own_organisation(user: &User, organisation_id: i64) -> bool {
    user.organisation_id == Some(organisation_id)
}

/// `organisation_source_ids` are the sources owned by the caller's organisation.
pub fn is_own_article(organisation_source_ids: &[i64], article: &Article) -> bool {
    organisation_source_ids.contains(&article.source_id)
}

pub fn is_own_profile(user: &User, requested_user_id: i64) -> bool {
    user.id == requested_user_id
}
