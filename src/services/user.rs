use crate::db::Database;
use crate::error::AppResult;
use crate::models::user::{User, UserNameResponse};

const USER_SELECT: &str = r#"
    SELECT id, name, email, phone, role, profile_image_url,
           CAST(push_endpoints AS TEXT) as push_endpoints_str,
           created_at, updated_at
    FROM "user"
"#;

pub struct UserService<'a> {
    db: &'a Database,
}

impl<'a> UserService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{} WHERE id = $1", USER_SELECT))
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(user.map(|mut u| {
            u.parse_push_endpoints();
            u
        }))
    }

    /// Lightweight id/name/avatar lookup for hydrating responses.
    pub async fn get_names(&self, user_ids: &[String]) -> AppResult<Vec<UserNameResponse>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UserNameResponse>(
            r#"SELECT id, name, role, profile_image_url FROM "user" WHERE id = ANY($1)"#,
        )
        .bind(user_ids)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
