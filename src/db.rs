use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

use crate::config::OrganisationConfig;
use crate::error::Result;
use crate::models::{
    fold_case, Article, GeoPoint, NewArticle, NewSource, NewUser, Organisation, Source, Tag, User,
};
use crate::predicate::{Pagination, Predicate};
use crate::relations::{relations_of, Entity, OnDelete};

const ARTICLE_COLUMNS: &str = "a.id AS id, a.source_id AS source_id, a.date AS date, \
     a.title AS title, a.teaser AS teaser, a.image_url AS image_url, a.link AS link, \
     a.guid AS guid, a.published AS published, a.is_visible AS is_visible, \
     a.is_hot AS is_hot, a.lat AS lat, a.lng AS lng";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organisations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                lat REAL,
                lng REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                organisation_id INTEGER REFERENCES organisations(id),
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL DEFAULT 'RSS',
                filter TEXT,
                last_fetched TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                source_id INTEGER NOT NULL REFERENCES sources(id),
                date TEXT,
                title TEXT NOT NULL,
                teaser TEXT NOT NULL DEFAULT '',
                title_folded TEXT NOT NULL DEFAULT '',
                teaser_folded TEXT NOT NULL DEFAULT '',
                image_url TEXT,
                link TEXT NOT NULL UNIQUE,
                guid TEXT,
                published INTEGER NOT NULL DEFAULT 1,
                is_visible INTEGER NOT NULL DEFAULT 1,
                is_hot INTEGER NOT NULL DEFAULT 0,
                lat REAL,
                lng REAL,
                UNIQUE(source_id, guid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_visible_date
            ON articles(is_visible, date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                organisation_id INTEGER REFERENCES organisations(id),
                lat REAL,
                lng REAL,
                radius REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (table, owner, owner_table, target, target_table) in [
            ("article_tags", "article_id", "articles", "tag_id", "tags"),
            ("user_tags", "user_id", "users", "tag_id", "tags"),
            ("user_organisations", "user_id", "users", "organisation_id", "organisations"),
        ] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    {owner} INTEGER NOT NULL REFERENCES {owner_table}(id),
                    {target} INTEGER NOT NULL REFERENCES {target_table}(id),
                    PRIMARY KEY ({owner}, {target})
                )"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Upsert configured organisations (by name) and their sources (by URL).
    pub async fn sync_sources(&self, configs: &[OrganisationConfig]) -> Result<()> {
        for config in configs {
            let (organisation_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO organisations (name, lat, lng)
                VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    lat = excluded.lat,
                    lng = excluded.lng
                RETURNING id
                "#,
            )
            .bind(&config.name)
            .bind(config.location.map(|l| l.lat))
            .bind(config.location.map(|l| l.lng))
            .fetch_one(&self.pool)
            .await?;

            for source in &config.sources {
                self.upsert_source(&NewSource {
                    organisation_id: Some(organisation_id),
                    name: source.name.clone(),
                    url: source.url.clone(),
                    source_type: source.source_type.clone(),
                    filter: source.filter.clone(),
                })
                .await?;
            }
        }
        Ok(())
    }

    pub async fn create_organisation(&self, name: &str, location: Option<GeoPoint>) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO organisations (name, lat, lng) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(location.map(|l| l.lat))
        .bind(location.map(|l| l.lng))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_organisation(&self, organisation_id: i64) -> Result<Option<Organisation>> {
        let organisation =
            sqlx::query_as::<_, Organisation>("SELECT * FROM organisations WHERE id = ?")
                .bind(organisation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(organisation)
    }

    pub async fn get_all_organisations(&self) -> Result<Vec<Organisation>> {
        let organisations =
            sqlx::query_as::<_, Organisation>("SELECT * FROM organisations ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(organisations)
    }

    pub async fn upsert_source(&self, source: &NewSource) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sources (organisation_id, name, url, type, filter)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                organisation_id = excluded.organisation_id,
                name = excluded.name,
                type = excluded.type,
                filter = excluded.filter
            RETURNING id
            "#,
        )
        .bind(source.organisation_id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.source_type)
        .bind(&source.filter)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_all_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    /// Union of the sources owned by the given organisations.
    pub async fn source_ids_for_organisations(&self, organisation_ids: &[i64]) -> Result<Vec<i64>> {
        if organisation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT id FROM sources WHERE organisation_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in organisation_ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY id");

        let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn update_source_fetched(&self, source_id: i64, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        sqlx::query("UPDATE sources SET last_fetched = ?, last_error = ? WHERE id = ?")
            .bind(&now)
            .bind(error)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether `source_id` already stored an article with this guid.
    pub async fn article_exists(&self, source_id: i64, guid: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE source_id = ? AND guid = ?")
                .bind(source_id)
                .bind(guid)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Insert an article, or overwrite the row that already holds its
    /// `(source, guid)` or its `link`.
    ///
    /// When the guid row and the link row are different articles, the guid
    /// row takes the link and the other row is deleted with its tag links.
    /// Runs in one transaction, so concurrent writers of the same link or
    /// guid converge on a single row. Curation fields (`is_visible`,
    /// `is_hot`, tags, geodata) of the surviving row are left untouched.
    pub async fn upsert_article(&self, article: &NewArticle) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        if let Some(guid) = &article.guid {
            for sql in [
                "DELETE FROM article_tags WHERE article_id IN (SELECT id FROM articles \
                 WHERE link = ? AND id <> (SELECT id FROM articles \
                 WHERE source_id = ? AND guid = ?))",
                "DELETE FROM articles WHERE link = ? AND id <> (SELECT id FROM articles \
                 WHERE source_id = ? AND guid = ?)",
            ] {
                sqlx::query(sql)
                    .bind(&article.link)
                    .bind(article.source_id)
                    .bind(guid)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO articles (source_id, date, title, teaser, title_folded, teaser_folded,
                                  image_url, link, guid, published)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, guid) DO UPDATE SET
                date = excluded.date,
                title = excluded.title,
                teaser = excluded.teaser,
                title_folded = excluded.title_folded,
                teaser_folded = excluded.teaser_folded,
                image_url = excluded.image_url,
                link = excluded.link,
                published = excluded.published
            ON CONFLICT(link) DO UPDATE SET
                source_id = excluded.source_id,
                date = excluded.date,
                title = excluded.title,
                teaser = excluded.teaser,
                title_folded = excluded.title_folded,
                teaser_folded = excluded.teaser_folded,
                image_url = excluded.image_url,
                guid = excluded.guid,
                published = excluded.published
            RETURNING id
            "#,
        )
        .bind(article.source_id)
        .bind(article.date_string())
        .bind(&article.title)
        .bind(&article.teaser)
        .bind(fold_case(&article.title))
        .bind(fold_case(&article.teaser))
        .bind(&article.image_url)
        .bind(&article.link)
        .bind(&article.guid)
        .bind(article.published)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = "
        ));
        qb.push_bind(article_id);
        let article = qb.build_query_as::<Article>().fetch_optional(&self.pool).await?;
        match article {
            Some(article) => {
                let mut articles = vec![article];
                self.attach_tags(&mut articles).await?;
                Ok(articles.pop())
            }
            None => Ok(None),
        }
    }

    /// Articles matching `predicate`, sorted then paginated.
    pub async fn find_articles(
        &self,
        predicate: &Predicate,
        pagination: &Pagination,
    ) -> Result<Vec<Article>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE "
        ));
        predicate.push_sql(&mut qb);
        pagination.push_sql(&mut qb);

        let mut articles = qb.build_query_as::<Article>().fetch_all(&self.pool).await?;
        self.attach_tags(&mut articles).await?;
        Ok(articles)
    }

    pub async fn count_articles(&self, predicate: &Predicate) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles a WHERE ");
        predicate.push_sql(&mut qb);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn attach_tags(&self, articles: &mut [Article]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT article_id, tag_id FROM article_tags WHERE article_id IN (",
        );
        let mut separated = qb.separated(", ");
        for article in articles.iter() {
            separated.push_bind(article.id);
        }
        qb.push(") ORDER BY tag_id");

        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut by_article: HashMap<i64, Vec<i64>> = HashMap::new();
        for (article_id, tag_id) in rows {
            by_article.entry(article_id).or_default().push(tag_id);
        }
        for article in articles.iter_mut() {
            article.tags = by_article.remove(&article.id).unwrap_or_default();
        }
        Ok(())
    }

    pub async fn set_article_tags(&self, article_id: i64, tag_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM article_tags WHERE article_id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await?;
        for tag_id in tag_ids {
            sqlx::query("INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?, ?)")
                .bind(article_id)
                .bind(*tag_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_article_hot(&self, article_id: i64, is_hot: bool) -> Result<()> {
        sqlx::query("UPDATE articles SET is_hot = ? WHERE id = ?")
            .bind(is_hot)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_article_visible(&self, article_id: i64, is_visible: bool) -> Result<()> {
        sqlx::query("UPDATE articles SET is_visible = ? WHERE id = ?")
            .bind(is_visible)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_article_location(
        &self,
        article_id: i64,
        location: Option<GeoPoint>,
    ) -> Result<()> {
        sqlx::query("UPDATE articles SET lat = ?, lng = ? WHERE id = ?")
            .bind(location.map(|l| l.lat))
            .bind(location.map(|l| l.lng))
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_tag(&self, name: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO tags (name) VALUES (?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_all_tags(&self) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (name, organisation_id, lat, lng, radius)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&user.name)
        .bind(user.organisation_id)
        .bind(user.location.map(|l| l.lat))
        .bind(user.location.map(|l| l.lng))
        .bind(user.radius)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn follow_tag(&self, user_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_tags (user_id, tag_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn follow_organisation(&self, user_id: i64, organisation_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_organisations (user_id, organisation_id) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(organisation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_tag_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT tag_id FROM user_tags WHERE user_id = ? ORDER BY tag_id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn user_organisation_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT organisation_id FROM user_organisations WHERE user_id = ? \
             ORDER BY organisation_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Remove an entity and apply the delete rules of its declared relations.
    ///
    /// Returns `false` when no such row exists.
    pub async fn remove(&self, entity: Entity, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let (exists,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {} WHERE id = ?", entity.table()))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if exists == 0 {
            return Ok(false);
        }

        // Owners are discovered before their children; removal runs in reverse.
        let mut pending = vec![(entity, id)];
        let mut ordered = Vec::new();
        while let Some((entity, id)) = pending.pop() {
            for relation in relations_of(entity).filter(|r| r.on_delete == OnDelete::Cascade) {
                let children: Vec<(i64,)> = sqlx::query_as(&format!(
                    "SELECT id FROM {} WHERE {} = ?",
                    relation.table, relation.column
                ))
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
                pending.extend(children.into_iter().map(|(child,)| (relation.target, child)));
            }
            ordered.push((entity, id));
        }

        for (entity, id) in ordered.into_iter().rev() {
            for relation in relations_of(entity) {
                let sql = match relation.on_delete {
                    OnDelete::Cascade => continue,
                    OnDelete::Nullify => format!(
                        "UPDATE {} SET {} = NULL WHERE {} = ?",
                        relation.table, relation.column, relation.column
                    ),
                    OnDelete::Pull => {
                        format!("DELETE FROM {} WHERE {} = ?", relation.table, relation.column)
                    }
                };
                sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
            }
            sqlx::query(&format!("DELETE FROM {} WHERE id = ?", entity.table()))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
