//! Backend-neutral article filters and their SQLite translation.
//!
//! A [`Predicate`] is a tree of boolean nodes over article columns. Storage
//! backends walk the tree to produce their native query; the SQLite backend
//! pushes it into an [`sqlx::QueryBuilder`] with every value bound.

use std::str::FromStr;

use sqlx::{QueryBuilder, Sqlite};
use thiserror::Error;

use crate::models::{fold_case, GeoPoint};

/// Boolean curation columns of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    IsVisible,
    IsHot,
}

impl Flag {
    fn sql(self) -> &'static str {
        match self {
            Flag::IsVisible => "a.is_visible",
            Flag::IsHot => "a.is_hot",
        }
    }
}

/// Text columns that support substring search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Teaser,
}

impl TextField {
    /// The case-folded copy written alongside the column on every upsert.
    fn folded_sql(self) -> &'static str {
        match self {
            TextField::Title => "a.title_folded",
            TextField::Teaser => "a.teaser_folded",
        }
    }
}

/// Whose coordinates a radius check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoTarget {
    Article,
    /// The organisation owning the article's source.
    SourceOrganisation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Flag(Flag, bool),
    SourceIn(Vec<i64>),
    /// The article carries at least one of these tags.
    HasAnyTag(Vec<i64>),
    /// Substring match, case-insensitive over all of Unicode.
    Contains(TextField, String),
    /// Inclusive planar radius containment.
    Within {
        target: GeoTarget,
        center: GeoPoint,
        radius: f64,
    },
}

impl Predicate {
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Append this predicate as SQL over the `articles a` alias.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Predicate::True => {
                qb.push("1");
            }
            Predicate::False => {
                qb.push("0");
            }
            Predicate::And(parts) => push_joined(qb, parts, " AND ", "1"),
            Predicate::Or(parts) => push_joined(qb, parts, " OR ", "0"),
            Predicate::Not(inner) => {
                qb.push("NOT (");
                inner.push_sql(qb);
                qb.push(")");
            }
            Predicate::Flag(flag, value) => {
                qb.push(flag.sql());
                qb.push(" = ");
                qb.push_bind(*value);
            }
            Predicate::SourceIn(ids) => {
                if ids.is_empty() {
                    qb.push("0");
                } else {
                    qb.push("a.source_id IN (");
                    push_ids(qb, ids);
                    qb.push(")");
                }
            }
            Predicate::HasAnyTag(ids) => {
                if ids.is_empty() {
                    qb.push("0");
                } else {
                    qb.push("a.id IN (SELECT article_id FROM article_tags WHERE tag_id IN (");
                    push_ids(qb, ids);
                    qb.push("))");
                }
            }
            Predicate::Contains(field, needle) => {
                qb.push("instr(");
                qb.push(field.folded_sql());
                qb.push(", ");
                qb.push_bind(fold_case(needle));
                qb.push(") > 0");
            }
            Predicate::Within {
                target,
                center,
                radius,
            } => match target {
                GeoTarget::Article => push_within(qb, "a", center, *radius),
                GeoTarget::SourceOrganisation => {
                    qb.push(
                        "a.source_id IN (SELECT s.id FROM sources s \
                         JOIN organisations o ON o.id = s.organisation_id WHERE ",
                    );
                    push_within(qb, "o", center, *radius);
                    qb.push(")");
                }
            },
        }
    }
}

fn push_joined(
    qb: &mut QueryBuilder<'_, Sqlite>,
    parts: &[Predicate],
    separator: &str,
    empty: &str,
) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        part.push_sql(qb);
    }
    qb.push(")");
}

fn push_ids(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
}

fn push_within(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, center: &GeoPoint, radius: f64) {
    let radius = radius.max(0.0);
    qb.push(format!(
        "({alias}.lat IS NOT NULL AND {alias}.lng IS NOT NULL AND ({alias}.lat - "
    ));
    qb.push_bind(center.lat);
    qb.push(format!(") * ({alias}.lat - "));
    qb.push_bind(center.lat);
    qb.push(format!(") + ({alias}.lng - "));
    qb.push_bind(center.lng);
    qb.push(format!(") * ({alias}.lng - "));
    qb.push_bind(center.lng);
    qb.push(") <= ");
    qb.push_bind(radius * radius);
    qb.push(")");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Date,
    Title,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: SortField::Date,
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sort '{0}'")]
pub struct ParseSortError(String);

/// Accepts `field` or `field:order`, e.g. `date:desc`.
impl FromStr for Sort {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, order) = match s.split_once(':') {
            Some((field, order)) => (field, Some(order)),
            None => (s, None),
        };
        let field = match field.trim().to_lowercase().as_str() {
            "date" => SortField::Date,
            "title" => SortField::Title,
            "id" => SortField::Id,
            _ => return Err(ParseSortError(s.to_string())),
        };
        let order = match order.map(|o| o.trim().to_lowercase()).as_deref() {
            None | Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            Some(_) => return Err(ParseSortError(s.to_string())),
        };
        Ok(Self { field, order })
    }
}

/// Sort, skip and limit applied after the predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub sort: Sort,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            sort: Sort::default(),
        }
    }
}

impl Pagination {
    pub fn new(limit: i64, offset: i64, sort: Sort) -> Self {
        Self {
            limit,
            offset,
            sort,
        }
    }

    /// Append ORDER BY, LIMIT and OFFSET. Ties break on id so pages never overlap.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let direction = match self.sort.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let column = match self.sort.field {
            SortField::Date => "a.date",
            SortField::Title => "a.title",
            SortField::Id => "a.id",
        };
        qb.push(format!(" ORDER BY {column} {direction} NULLS LAST"));
        if self.sort.field != SortField::Id {
            qb.push(format!(", a.id {direction}"));
        }
        qb.push(" LIMIT ");
        qb.push_bind(self.limit.max(0));
        qb.push(" OFFSET ");
        qb.push_bind(self.offset.max(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(predicate: &Predicate) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("");
        predicate.push_sql(&mut qb);
        qb.sql().to_string()
    }

    mod translation_tests {
        use super::*;

        #[test]
        fn test_empty_or_is_false() {
            assert_eq!(render(&Predicate::Or(vec![])), "0");
        }

        #[test]
        fn test_empty_and_is_true() {
            assert_eq!(render(&Predicate::And(vec![])), "1");
        }

        #[test]
        fn test_empty_in_is_false() {
            assert_eq!(render(&Predicate::SourceIn(vec![])), "0");
            assert_eq!(render(&Predicate::HasAnyTag(vec![])), "0");
        }

        #[test]
        fn test_in_binds_every_id() {
            let sql = render(&Predicate::SourceIn(vec![1, 2, 3]));
            assert_eq!(sql, "a.source_id IN (?, ?, ?)");
        }

        #[test]
        fn test_nested_tree() {
            let predicate = Predicate::Flag(Flag::IsVisible, true).and(Predicate::Or(vec![
                Predicate::HasAnyTag(vec![7]),
                Predicate::Flag(Flag::IsHot, true),
            ]));
            let sql = render(&predicate);
            assert_eq!(
                sql,
                "(a.is_visible = ? AND (a.id IN (SELECT article_id FROM article_tags \
                 WHERE tag_id IN (?)) OR a.is_hot = ?))"
            );
        }

        #[test]
        fn test_not_wraps_inner() {
            let sql = render(&Predicate::not(Predicate::SourceIn(vec![4])));
            assert_eq!(sql, "NOT (a.source_id IN (?))");
        }

        #[test]
        fn test_contains_matches_folded_column() {
            let sql = render(&Predicate::Contains(TextField::Title, "Vote".to_string()));
            assert_eq!(sql, "instr(a.title_folded, ?) > 0");
        }

        #[test]
        fn test_organisation_geo_uses_subquery() {
            let sql = render(&Predicate::Within {
                target: GeoTarget::SourceOrganisation,
                center: GeoPoint::new(1.0, 2.0),
                radius: 3.0,
            });
            assert!(sql.starts_with("a.source_id IN (SELECT s.id FROM sources s"));
            assert!(sql.contains("o.lat IS NOT NULL"));
        }

        #[test]
        fn test_and_flattens() {
            let predicate = Predicate::True.and(Predicate::False).and(Predicate::True);
            match predicate {
                Predicate::And(parts) => assert_eq!(parts.len(), 3),
                other => panic!("expected And, got {:?}", other),
            }
        }
    }

    mod sort_tests {
        use super::*;

        #[test]
        fn test_parse_field_and_order() {
            let sort: Sort = "date:desc".parse().unwrap();
            assert_eq!(sort.field, SortField::Date);
            assert_eq!(sort.order, SortOrder::Desc);
        }

        #[test]
        fn test_parse_defaults_to_ascending() {
            let sort: Sort = "title".parse().unwrap();
            assert_eq!(sort.order, SortOrder::Asc);
        }

        #[test]
        fn test_parse_is_case_insensitive() {
            let sort: Sort = "DATE:DESC".parse().unwrap();
            assert_eq!(sort, Sort::default());
        }

        #[test]
        fn test_parse_rejects_unknown_field() {
            assert!("teaser:asc".parse::<Sort>().is_err());
            assert!("date:sideways".parse::<Sort>().is_err());
        }

        #[test]
        fn test_parse_error_names_input() {
            let err = "votes".parse::<Sort>().unwrap_err();
            assert_eq!(err.to_string(), "invalid sort 'votes'");
        }

        #[test]
        fn test_pagination_sql_breaks_ties_on_id() {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM articles a");
            Pagination::default().push_sql(&mut qb);
            assert_eq!(
                qb.sql(),
                "SELECT * FROM articles a ORDER BY a.date DESC NULLS LAST, \
                 a.id DESC LIMIT ? OFFSET ?"
            );
        }
    }
}
