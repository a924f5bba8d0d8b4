//! Statically declared associations between stored entities.
//!
//! Removal walks this table instead of discovering relations at runtime:
//! owned children are removed with their owner, join rows are pulled and
//! plain references are cleared.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Organisation,
    Source,
    Article,
    Tag,
    User,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Organisation => "organisations",
            Entity::Source => "sources",
            Entity::Article => "articles",
            Entity::Tag => "tags",
            Entity::User => "users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Remove the referencing entities as well.
    Cascade,
    /// Set the referencing column to NULL.
    Nullify,
    /// Delete the join rows.
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub owner: Entity,
    pub target: Entity,
    /// Table holding the reference back to `owner`.
    pub table: &'static str,
    /// Column in `table` holding the owner's id.
    pub column: &'static str,
    pub on_delete: OnDelete,
}

pub const RELATIONS: &[Relation] = &[
    Relation {
        owner: Entity::Organisation,
        target: Entity::Source,
        table: "sources",
        column: "organisation_id",
        on_delete: OnDelete::Cascade,
    },
    Relation {
        owner: Entity::Organisation,
        target: Entity::User,
        table: "users",
        column: "organisation_id",
        on_delete: OnDelete::Nullify,
    },
    Relation {
        owner: Entity::Organisation,
        target: Entity::User,
        table: "user_organisations",
        column: "organisation_id",
        on_delete: OnDelete::Pull,
    },
    Relation {
        owner: Entity::Source,
        target: Entity::Article,
        table: "articles",
        column: "source_id",
        on_delete: OnDelete::Cascade,
    },
    Relation {
        owner: Entity::Article,
        target: Entity::Tag,
        table: "article_tags",
        column: "article_id",
        on_delete: OnDelete::Pull,
    },
    Relation {
        owner: Entity::Tag,
        target: Entity::Article,
        table: "article_tags",
        column: "tag_id",
        on_delete: OnDelete::Pull,
    },
    Relation {
        owner: Entity::Tag,
        target: Entity::User,
        table: "user_tags",
        column: "tag_id",
        on_delete: OnDelete::Pull,
    },
    Relation {
        owner: Entity::User,
        target: Entity::Tag,
        table: "user_tags",
        column: "user_id",
        on_delete: OnDelete::Pull,
    },
    Relation {
        owner: Entity::User,
        target: Entity::Organisation,
        table: "user_organisations",
        column: "user_id",
        on_delete: OnDelete::Pull,
    },
];

pub fn relations_of(entity: Entity) -> impl Iterator<Item = &'static Relation> {
    RELATIONS.iter().filter(move |r| r.owner == entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascades_follow_ownership() {
        let cascades: Vec<(Entity, Entity)> = RELATIONS
            .iter()
            .filter(|r| r.on_delete == OnDelete::Cascade)
            .map(|r| (r.owner, r.target))
            .collect();
        assert_eq!(
            cascades,
            vec![
                (Entity::Organisation, Entity::Source),
                (Entity::Source, Entity::Article),
            ]
        );
    }

    #[test]
    fn test_follow_references_never_cascade() {
        for relation in RELATIONS.iter().filter(|r| r.target == Entity::User) {
            assert_ne!(relation.on_delete, OnDelete::Cascade);
        }
        let tag_cascades = relations_of(Entity::Tag).filter(|r| r.on_delete == OnDelete::Cascade);
        assert_eq!(tag_cascades.count(), 0);
    }

    #[test]
    fn test_join_tables_are_pulled() {
        for relation in RELATIONS.iter().filter(|r| r.table.contains('_')) {
            assert_eq!(relation.on_delete, OnDelete::Pull, "{}", relation.table);
        }
    }

    #[test]
    fn test_relations_of_user() {
        let tables: Vec<&str> = relations_of(Entity::User).map(|r| r.table).collect();
        assert_eq!(tables, vec!["user_tags", "user_organisations"]);
    }

    #[test]
    fn test_member_reference_is_nullified() {
        let members = relations_of(Entity::Organisation)
            .find(|r| r.table == "users")
            .unwrap();
        assert_eq!(members.column, "organisation_id");
        assert_eq!(members.on_delete, OnDelete::Nullify);
    }
}
