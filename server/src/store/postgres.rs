use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Category, Event, EventId, EventStatus, GeoPoint, Notification, NotificationId,
    NotificationKind, StatsDelta, User, UserId,
};
use crate::store::{Commit, EventQuery, Store, StoreError};

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, category, starts_at, ends_at, \
     lat, lng, location_alias, status, finalized, started_notified, confirmed_participants, \
     pending_approval_participants, version, created_at, updated_at";

const USER_COLUMNS: &str = "id, name, phone, description, events_visited, events_organized, \
     no_shows, rating, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_user_id, kind, title, message, event_id, created_at, read";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Successfully connected to database");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        info!("Migrations run successfully");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    phone: Option<String>,
    description: Option<String>,
    events_visited: i64,
    events_organized: i64,
    no_shows: i64,
    rating: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            name: row.name,
            phone: row.phone,
            description: row.description,
            events_visited: row.events_visited,
            events_organized: row.events_organized,
            no_shows: row.no_shows,
            rating: row.rating,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: Uuid,
    title: String,
    description: Option<String>,
    category: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    lat: f64,
    lng: f64,
    location_alias: Option<String>,
    status: String,
    finalized: bool,
    started_notified: bool,
    confirmed_participants: Vec<Uuid>,
    pending_approval_participants: Vec<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let category = row
            .category
            .parse::<Category>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let status = row
            .status
            .parse::<EventStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Event {
            id: row.id.into(),
            organizer_id: row.organizer_id.into(),
            title: row.title,
            description: row.description,
            category,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            location: GeoPoint {
                lat: row.lat,
                lng: row.lng,
            },
            location_alias: row.location_alias,
            status,
            finalized: row.finalized,
            started_notified: row.started_notified,
            confirmed_participants: row
                .confirmed_participants
                .into_iter()
                .map(UserId::from)
                .collect(),
            pending_approval_participants: row
                .pending_approval_participants
                .into_iter()
                .map(UserId::from)
                .collect(),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_user_id: Uuid,
    kind: String,
    title: String,
    message: String,
    event_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    read: bool,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown notification kind '{}'", row.kind)))?;
        Ok(Notification {
            id: row.id.into(),
            recipient_user_id: row.recipient_user_id.into(),
            kind,
            title: row.title,
            message: row.message,
            event_id: row.event_id.map(EventId::from),
            created_at: row.created_at,
            read: row.read,
        })
    }
}

/// Serializes blacklist writes against applies for the same pair until the
/// surrounding transaction ends. Row locks cannot cover a row that does not
/// exist yet.
async fn lock_blacklist_pair(
    conn: &mut PgConnection,
    organizer: UserId,
    user: UserId,
) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || ':' || $2::text, 0))")
        .bind(organizer.into_inner())
        .bind(user.into_inner())
        .execute(conn)
        .await?;
    Ok(())
}

fn uuids(ids: impl IntoIterator<Item = UserId>) -> Vec<Uuid> {
    ids.into_iter().map(Uuid::from).collect()
}

fn events_from_rows(rows: Vec<EventRow>) -> Result<Vec<Event>, StoreError> {
    rows.into_iter().map(Event::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            USER_COLUMNS
        ))
        .bind(user.id.into_inner())
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.description)
        .bind(user.events_visited)
        .bind(user.events_organized)
        .bind(user.no_shows)
        .bind(user.rating)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateName(user.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE name = $1",
            USER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ANY($1)",
            USER_COLUMNS
        ))
        .bind(uuids(ids.iter().copied()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO events ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            EVENT_COLUMNS
        ))
        .bind(event.id.into_inner())
        .bind(event.organizer_id.into_inner())
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.category.as_str())
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.location.lat)
        .bind(event.location.lng)
        .bind(&event.location_alias)
        .bind(event.status.as_str())
        .bind(event.finalized)
        .bind(event.started_notified)
        .bind(uuids(event.confirmed_participants.iter().copied()))
        .bind(uuids(event.pending_approval_participants.iter().copied()))
        .bind(event.version)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM events WHERE finalized = FALSE AND status = ",
            EVENT_COLUMNS
        ));
        builder.push_bind(query.status.as_str());
        if let Some(category) = query.category {
            builder.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(from) = query.from {
            builder.push(" AND starts_at >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND starts_at <= ").push_bind(to);
        }
        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            builder
                .push(" AND title ILIKE ")
                .push_bind(format!("%{}%", q.replace('%', "\\%").replace('_', "\\_")));
        }
        builder
            .push(" ORDER BY starts_at ASC OFFSET ")
            .push_bind(query.offset())
            .push(" LIMIT ")
            .push_bind(query.clamped_limit() as i64);

        let rows = builder
            .build_query_as::<EventRow>()
            .fetch_all(&self.pool)
            .await?;
        events_from_rows(rows)
    }

    async fn events_by_organizer(&self, organizer: UserId) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE organizer_id = $1",
            EVENT_COLUMNS
        ))
        .bind(organizer.into_inner())
        .fetch_all(&self.pool)
        .await?;
        events_from_rows(rows)
    }

    async fn events_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE status = 'active' AND finalized = FALSE \
             AND started_notified = FALSE AND starts_at <= $1",
            EVENT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        events_from_rows(rows)
    }

    async fn is_blacklisted(&self, organizer: UserId, user: UserId) -> Result<bool, StoreError> {
        let found: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM blacklist WHERE organizer_id = $1 AND user_id = $2")
                .bind(organizer.into_inner())
                .bind(user.into_inner())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn commit(&self, commit: Commit) -> Result<Event, StoreError> {
        let event = &commit.event;
        let mut tx = self.pool.begin().await?;

        if let Some((organizer, user)) = commit.applicant_not_blacklisted {
            lock_blacklist_pair(&mut *tx, organizer, user).await?;
            let blocked: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM blacklist WHERE organizer_id = $1 AND user_id = $2")
                    .bind(organizer.into_inner())
                    .bind(user.into_inner())
                    .fetch_optional(&mut *tx)
                    .await?;
            if blocked.is_some() {
                return Err(StoreError::Blacklisted { organizer, user });
            }
        }

        let updated = sqlx::query(
            "UPDATE events SET status = $3, finalized = $4, started_notified = $5, \
             confirmed_participants = $6, pending_approval_participants = $7, version = $8, \
             updated_at = $9 WHERE id = $1 AND version = $2",
        )
        .bind(event.id.into_inner())
        .bind(commit.expected_version)
        .bind(event.status.as_str())
        .bind(event.finalized)
        .bind(event.started_notified)
        .bind(uuids(event.confirmed_participants.iter().copied()))
        .bind(uuids(event.pending_approval_participants.iter().copied()))
        .bind(event.version)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping `tx` rolls back.
            let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM events WHERE id = $1")
                .bind(event.id.into_inner())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::VersionConflict(event.id),
                None => StoreError::EventNotFound(event.id),
            });
        }

        for delta in &commit.stats {
            let column = match delta {
                StatsDelta::EventVisited(_) => "events_visited",
                StatsDelta::EventOrganized(_) => "events_organized",
                StatsDelta::NoShow(_) => "no_shows",
            };
            sqlx::query(&format!(
                "UPDATE users SET {0} = {0} + 1, updated_at = $2 WHERE id = $1",
                column
            ))
            .bind(delta.user().into_inner())
            .bind(event.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(entry) = &commit.blacklist {
            lock_blacklist_pair(&mut *tx, entry.organizer_id, entry.user_id).await?;
            sqlx::query(
                "INSERT INTO blacklist (organizer_id, user_id, event_id, created_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (organizer_id, user_id) DO NOTHING",
            )
            .bind(entry.organizer_id.into_inner())
            .bind(entry.user_id.into_inner())
            .bind(entry.event_id.into_inner())
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for n in &commit.notifications {
            sqlx::query(&format!(
                "INSERT INTO notifications ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                NOTIFICATION_COLUMNS
            ))
            .bind(n.id.into_inner())
            .bind(n.recipient_user_id.into_inner())
            .bind(n.kind.as_str())
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.event_id.map(EventId::into_inner))
            .bind(n.created_at)
            .bind(n.read)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(commit.event)
    }

    async fn notifications(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {} FROM notifications WHERE recipient_user_id = $1 ORDER BY seq DESC LIMIT $2",
            NOTIFICATION_COLUMNS
        ))
        .bind(recipient.into_inner())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn mark_read(&self, recipient: UserId, id: NotificationId) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND recipient_user_id = $2")
                .bind(id.into_inner())
                .bind(recipient.into_inner())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, recipient: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE recipient_user_id = $1 AND read = FALSE",
        )
        .bind(recipient.into_inner())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
