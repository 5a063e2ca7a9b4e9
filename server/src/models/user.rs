use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::UserId;
use crate::utils::error::AppError;

const NAME_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub events_visited: i64,
    pub events_organized: i64,
    pub no_shows: i64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /users/register` and `POST /users/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
}

impl NewUser {
    pub fn into_user(self, now: DateTime<Utc>) -> Result<User, AppError> {
        let name = self.validated_name()?;
        Ok(User {
            id: UserId::new(),
            name,
            phone: None,
            description: None,
            events_visited: 0,
            events_organized: 0,
            no_shows: 0,
            rating: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn validated_name(&self) -> Result<String, AppError> {
        let name = self.name.trim();
        let len = name.chars().count();
        if len == 0 || len > NAME_MAX_CHARS {
            return Err(AppError::ValidationError(format!(
                "Name must be between 1 and {} characters",
                NAME_MAX_CHARS
            )));
        }
        Ok(name.to_string())
    }
}

/// What the participant lists need to render a user: name and rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub rating: f64,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            rating: user.rating,
        }
    }
}

/// Counter updates applied alongside a committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsDelta {
    EventVisited(UserId),
    EventOrganized(UserId),
    NoShow(UserId),
}

impl StatsDelta {
    pub fn user(&self) -> UserId {
        match self {
            StatsDelta::EventVisited(user)
            | StatsDelta::EventOrganized(user)
            | StatsDelta::NoShow(user) => *user,
        }
    }

    pub fn apply_to(&self, user: &mut User) {
        match self {
            StatsDelta::EventVisited(_) => user.events_visited += 1,
            StatsDelta::EventOrganized(_) => user.events_organized += 1,
            StatsDelta::NoShow(_) => user.no_shows += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_trims_name() {
        let user = NewUser {
            name: "  ana ".to_string(),
        }
        .into_user(Utc::now())
        .unwrap();
        assert_eq!(user.name, "ana");
        assert_eq!(user.events_visited, 0);
    }

    #[test]
    fn test_new_user_rejects_empty_and_long_names() {
        assert!(NewUser {
            name: " ".to_string()
        }
        .into_user(Utc::now())
        .is_err());
        assert!(NewUser {
            name: "x".repeat(81)
        }
        .into_user(Utc::now())
        .is_err());
    }

    #[test]
    fn test_stats_delta_increments_one_counter() {
        let mut user = NewUser {
            name: "bo".to_string(),
        }
        .into_user(Utc::now())
        .unwrap();
        StatsDelta::NoShow(user.id).apply_to(&mut user);
        StatsDelta::EventVisited(user.id).apply_to(&mut user);
        assert_eq!(user.no_shows, 1);
        assert_eq!(user.events_visited, 1);
        assert_eq!(user.events_organized, 0);
    }
}
