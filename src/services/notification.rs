/// Notification engine: relevance scoring, priority, channel resolution,
/// persistence, fan-out and digest generation.
use chrono::{TimeZone, Timelike, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::notification::{
    group_for_display, Channel, DeliveryRecord, DeliveryStatus, InteractionRecord, Notification,
    NotificationContext, NotificationListItem, NotificationResponse, NotificationType, Priority,
    RichContent,
};
use crate::models::preferences::NotificationPreferences;
use crate::models::user::User;
use crate::realtime::registry::{user_topic, Registry};
use crate::services::connection::ConnectionService;
use crate::services::delivery::DeliveryService;
use crate::services::preferences::PreferencesService;
use crate::services::user::UserService;
use crate::utils::time::current_timestamp;

/// Scoring constants. Fixed product policy, not configuration.
const BASE_SCORE: i32 = 50;
const CONNECTION_BONUS: i32 = 20;
const HIGH_RELEVANCE_BONUS: i32 = 30;
const LOW_FATIGUE_BONUS: i32 = 10;
const FATIGUE_WINDOW_SECS: i64 = 24 * 3600;
const FATIGUE_THRESHOLD: i64 = 10;

const NOTIFICATION_SELECT: &str = r#"
    SELECT id, recipient_id, sender_id, notification_type, title, body,
           CAST(rich_content AS TEXT) as rich_content_str,
           CAST(context AS TEXT) as context_str,
           CAST(delivery AS TEXT) as delivery_str,
           CAST(interaction AS TEXT) as interaction_str,
           priority, relevance_score, grouping_id, digest_id, expires_at,
           created_at, updated_at
    FROM notification
"#;

pub struct NotificationInput {
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub rich_content: Option<RichContent>,
    pub context: Option<NotificationContext>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ListFilters {
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub module: Option<String>,
    pub priority: Option<Priority>,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct NotificationList {
    pub items: Vec<NotificationListItem>,
    pub total: i64,
    pub unread: i64,
}

/// Relevance score for one notification. Clamped to 0..=100.
pub fn relevance_score(connected: bool, high_relevance: bool, recent_24h: i64) -> i32 {
    let mut score = BASE_SCORE;
    if connected {
        score += CONNECTION_BONUS;
    }
    if high_relevance {
        score += HIGH_RELEVANCE_BONUS;
    }
    if recent_24h < FATIGUE_THRESHOLD {
        score += LOW_FATIGUE_BONUS;
    }
    score.clamp(0, 100)
}

/// Priority resolution order: per-type user override, then the fixed
/// type table, then score thresholds.
pub fn derive_priority(
    ty: NotificationType,
    score: i32,
    user_override: Option<Priority>,
) -> Priority {
    if let Some(p) = user_override {
        return p;
    }
    if let Some(p) = ty.default_priority() {
        return p;
    }
    if score > 80 {
        Priority::High
    } else if score > 60 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Summary notification for a digest batch. Any unread batch qualifies,
/// a single member included.
fn digest_summary_input(user_id: &str, member_count: usize, window_secs: i64) -> NotificationInput {
    let noun = if member_count == 1 { "notification" } else { "notifications" };
    NotificationInput {
        recipient_id: user_id.to_string(),
        sender_id: None,
        notification_type: NotificationType::UnifiedActivitySummary,
        title: "Activity summary".to_string(),
        body: format!("You have {} {} waiting for you", member_count, noun),
        rich_content: None,
        context: Some(NotificationContext {
            module: "system".to_string(),
            related_entity: None,
        }),
        expires_at: Some(current_timestamp() + window_secs),
    }
}

/// WHERE conditions for a notification listing, with `$1` bound to the
/// recipient and `$2` to the current time. Returns the next free
/// parameter number for LIMIT/OFFSET.
fn filter_conditions(filters: &ListFilters) -> (Vec<String>, usize) {
    let mut conditions = vec![
        "recipient_id = $1".to_string(),
        "(expires_at IS NULL OR expires_at > $2)".to_string(),
    ];
    let mut next_param = 3;
    if filters.unread_only {
        conditions.push("COALESCE((interaction->>'is_read')::boolean, false) = false".to_string());
    }
    if filters.notification_type.is_some() {
        conditions.push(format!("notification_type = ${}", next_param));
        next_param += 1;
    }
    if filters.module.is_some() {
        conditions.push(format!("context->>'module' = ${}", next_param));
        next_param += 1;
    }
    if filters.priority.is_some() {
        conditions.push(format!("priority = ${}", next_param));
        next_param += 1;
    }
    (conditions, next_param)
}

/// Rich content for a new notification: caller-supplied content enriched
/// with the fixed per-type action buttons and the sender's name and avatar.
/// Returns None when there is nothing to show.
pub fn compose_rich_content(
    provided: Option<RichContent>,
    ty: NotificationType,
    sender: Option<&User>,
) -> Option<RichContent> {
    let mut content = provided.unwrap_or_else(|| RichContent {
        image: None,
        avatar: None,
        preview: None,
        action_buttons: Vec::new(),
        metadata: serde_json::Map::new(),
    });
    if content.action_buttons.is_empty() {
        content.action_buttons = ty.action_buttons();
    }
    if let Some(sender) = sender {
        if content.avatar.is_none() {
            content.avatar = sender.profile_image_url.clone();
        }
        content
            .metadata
            .entry("sender_name".to_string())
            .or_insert_with(|| json!(sender.name));
    }
    if content.image.is_none()
        && content.avatar.is_none()
        && content.preview.is_none()
        && content.action_buttons.is_empty()
        && content.metadata.is_empty()
    {
        None
    } else {
        Some(content)
    }
}

/// Whether the given epoch-seconds instant falls inside a quiet-hours
/// window. Windows may span midnight.
pub fn in_quiet_hours(start: &str, end: &str, now_secs: i64) -> bool {
    fn parse_hm(s: &str) -> Option<u32> {
        let (h, m) = s.split_once(':')?;
        let h: u32 = h.parse().ok()?;
        let m: u32 = m.parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some(h * 60 + m)
    }
    let (Some(start), Some(end)) = (parse_hm(start), parse_hm(end)) else {
        return false;
    };
    let Some(now) = Utc.timestamp_opt(now_secs, 0).single() else {
        return false;
    };
    let minute_of_day = now.hour() * 60 + now.minute();
    if start <= end {
        minute_of_day >= start && minute_of_day < end
    } else {
        minute_of_day >= start || minute_of_day < end
    }
}

#[derive(Clone)]
pub struct NotificationEngine {
    db: Database,
    registry: Registry,
    delivery: DeliveryService,
}

impl NotificationEngine {
    pub fn new(db: Database, registry: Registry, delivery: DeliveryService) -> Self {
        Self {
            db,
            registry,
            delivery,
        }
    }

    async fn recent_count(&self, recipient_id: &str, window_secs: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = $1 AND created_at > $2",
        )
        .bind(recipient_id)
        .bind(current_timestamp() - window_secs)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// Create, score and deliver a notification. Returns None when the
    /// recipient has the type switched off.
    pub async fn create(&self, input: NotificationInput) -> AppResult<Option<NotificationResponse>> {
        let recipient = UserService::new(&self.db)
            .get_user_by_id(&input.recipient_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Recipient not found".to_string()))?;

        let preferences = PreferencesService::new(&self.db)
            .get(&input.recipient_id)
            .await?;
        let type_pref = preferences.type_preference(input.notification_type);
        if !type_pref.enabled {
            tracing::debug!(
                "Notification type {} disabled for {}",
                input.notification_type.as_str(),
                input.recipient_id
            );
            return Ok(None);
        }

        let connected = match input.sender_id.as_deref() {
            Some(sender) if sender != input.recipient_id => {
                ConnectionService::new(&self.db)
                    .are_connected(sender, &input.recipient_id)
                    .await?
            }
            _ => false,
        };
        let recent_24h = self
            .recent_count(&input.recipient_id, FATIGUE_WINDOW_SECS)
            .await?;
        let score = relevance_score(
            connected,
            input.notification_type.is_high_relevance(),
            recent_24h,
        );
        let priority = derive_priority(input.notification_type, score, type_pref.priority);

        // best-effort; an unresolved sender just means plainer content
        let sender = match input.sender_id.as_deref() {
            Some(sid) => UserService::new(&self.db)
                .get_user_by_id(sid)
                .await
                .unwrap_or(None),
            None => None,
        };

        let channels = self
            .resolve_channels(&input.recipient_id, &preferences, input.notification_type, priority)
            .await?;

        let now = current_timestamp();
        let notification = self
            .persist_new(&input, sender.as_ref(), &preferences, score, priority, &channels, now)
            .await?;
        let response = NotificationResponse::from(notification.clone());

        // in-app is websocket fan-out to the personal topic, synchronous
        self.registry.publish(
            &user_topic(&input.recipient_id),
            "notification",
            &serde_json::to_value(&response).unwrap_or_default(),
            None,
        );

        let external: Vec<Channel> = channels
            .iter()
            .copied()
            .filter(|c| *c != Channel::InApp)
            .collect();
        if !external.is_empty() {
            let engine = self.clone();
            tokio::spawn(async move {
                engine
                    .deliver_external(recipient, notification, external)
                    .await;
            });
        }

        Ok(Some(response))
    }

    /// Channel set after preferences, rate caps and quiet hours. In-app is
    /// unconditional; rate caps and quiet hours strip external channels,
    /// except urgent notifications which punch through quiet hours.
    async fn resolve_channels(
        &self,
        recipient_id: &str,
        preferences: &NotificationPreferences,
        ty: NotificationType,
        priority: Priority,
    ) -> AppResult<Vec<Channel>> {
        let mut channels = preferences.channels_for(ty);

        let mut external_ok = true;
        if preferences.rate_caps.enabled {
            let hourly = self.recent_count(recipient_id, 3600).await?;
            let daily = self.recent_count(recipient_id, 24 * 3600).await?;
            if hourly >= preferences.rate_caps.max_per_hour
                || daily >= preferences.rate_caps.max_per_day
            {
                tracing::debug!("Rate cap reached for {}, in-app only", recipient_id);
                external_ok = false;
            }
        }
        if external_ok
            && preferences.quiet_hours.enabled
            && priority < Priority::Urgent
            && in_quiet_hours(
                &preferences.quiet_hours.start,
                &preferences.quiet_hours.end,
                current_timestamp(),
            )
        {
            tracing::debug!("Quiet hours for {}, in-app only", recipient_id);
            external_ok = false;
        }
        if !external_ok {
            channels.retain(|c| *c == Channel::InApp);
        }
        Ok(channels)
    }

    async fn persist_new(
        &self,
        input: &NotificationInput,
        sender: Option<&User>,
        preferences: &NotificationPreferences,
        score: i32,
        priority: Priority,
        channels: &[Channel],
        now: i64,
    ) -> AppResult<Notification> {
        let rich_content =
            compose_rich_content(input.rich_content.clone(), input.notification_type, sender);

        let module = input
            .context
            .as_ref()
            .map(|c| c.module.clone())
            .unwrap_or_else(|| "system".to_string());
        let grouping_id = if preferences.smart.grouping {
            Some(format!("{}:{}", input.notification_type.as_str(), module))
        } else {
            None
        };

        let delivery = DeliveryRecord {
            channels: channels.to_vec(),
            status: channels
                .iter()
                .filter(|c| **c != Channel::InApp)
                .map(|c| (c.as_str().to_string(), DeliveryStatus::Pending))
                .collect(),
            sent_at: None,
            failed_at: None,
            failure_reason: None,
        };

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO notification
                (id, recipient_id, sender_id, notification_type, title, body,
                 rich_content, context, delivery, interaction,
                 priority, relevance_score, grouping_id, expires_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9::jsonb, $10::jsonb,
                    $11, $12, $13, $14, $15, $15)
            "#,
        )
        .bind(&id)
        .bind(&input.recipient_id)
        .bind(&input.sender_id)
        .bind(input.notification_type.as_str())
        .bind(&input.title)
        .bind(&input.body)
        .bind(rich_content.as_ref().map(|r| serde_json::to_string(r).unwrap_or_default()))
        .bind(input.context.as_ref().map(|c| serde_json::to_string(c).unwrap_or_default()))
        .bind(serde_json::to_string(&delivery).unwrap_or_default())
        .bind(serde_json::to_string(&InteractionRecord::default()).unwrap_or_default())
        .bind(priority.as_str())
        .bind(score)
        .bind(&grouping_id)
        .bind(input.expires_at)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Notification vanished after insert".to_string()))
    }

    async fn deliver_external(
        &self,
        recipient: User,
        notification: Notification,
        channels: Vec<Channel>,
    ) {
        let outcome = self
            .delivery
            .deliver(&recipient, &notification, &channels)
            .await;

        let mut delivery = notification.delivery.clone();
        let now = current_timestamp();
        let mut any_sent = false;
        let mut any_failed = false;
        for (channel, status) in &outcome.status {
            delivery.status.insert(channel.clone(), *status);
            match status {
                DeliveryStatus::Sent | DeliveryStatus::Delivered => any_sent = true,
                DeliveryStatus::Failed => any_failed = true,
                DeliveryStatus::Pending => {}
            }
        }
        if any_sent {
            delivery.sent_at = Some(now);
        }
        if any_failed {
            delivery.failed_at = Some(now);
            delivery.failure_reason = outcome.failure_reason;
        }

        if let Err(err) = sqlx::query(
            "UPDATE notification SET delivery = $2::jsonb, updated_at = $3 WHERE id = $1",
        )
        .bind(&notification.id)
        .bind(serde_json::to_string(&delivery).unwrap_or_default())
        .bind(now)
        .execute(self.db.pool())
        .await
        {
            tracing::error!(
                "Failed to record delivery outcome for {}: {}",
                notification.id,
                err
            );
        }
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            "{} WHERE id = $1",
            NOTIFICATION_SELECT
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(|mut n| {
            n.parse_json_fields();
            n
        }))
    }

    async fn get_owned(&self, id: &str, user_id: &str) -> AppResult<Notification> {
        let notification = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;
        if notification.recipient_id != user_id {
            return Err(AppError::Forbidden("Not your notification".to_string()));
        }
        Ok(notification)
    }

    /// Filtered, paginated listing with unread/total counters. Grouping
    /// (same type, same module) is applied per page when requested.
    pub async fn list(
        &self,
        user_id: &str,
        filters: &ListFilters,
        grouped: bool,
    ) -> AppResult<NotificationList> {
        let limit = if filters.limit > 0 { filters.limit.min(100) } else { 20 };
        let offset = (filters.page.max(1) - 1) * limit;
        let now = current_timestamp();

        let (conditions, next_param) = filter_conditions(filters);
        let where_clause = conditions.join(" AND ");

        let sql = format!(
            "{} WHERE {} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            NOTIFICATION_SELECT,
            where_clause,
            next_param,
            next_param + 1
        );
        let mut query = sqlx::query_as::<_, Notification>(&sql)
            .bind(user_id)
            .bind(now);
        if let Some(ty) = filters.notification_type {
            query = query.bind(ty.as_str());
        }
        if let Some(ref module) = filters.module {
            query = query.bind(module.clone());
        }
        if let Some(priority) = filters.priority {
            query = query.bind(priority.as_str());
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.pool())
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM notification WHERE {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(user_id)
            .bind(now);
        if let Some(ty) = filters.notification_type {
            count_query = count_query.bind(ty.as_str());
        }
        if let Some(ref module) = filters.module {
            count_query = count_query.bind(module.clone());
        }
        if let Some(priority) = filters.priority {
            count_query = count_query.bind(priority.as_str());
        }
        let total = count_query.fetch_one(self.db.pool()).await?;

        let unread = self.unread_count(user_id).await?;

        let responses: Vec<NotificationResponse> = rows
            .into_iter()
            .map(NotificationResponse::from)
            .collect();
        let items = if grouped {
            group_for_display(responses)
        } else {
            responses.into_iter().map(NotificationListItem::Single).collect()
        };

        Ok(NotificationList {
            items,
            total,
            unread,
        })
    }

    pub async fn unread_count(&self, user_id: &str) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notification
            WHERE recipient_id = $1
              AND COALESCE((interaction->>'is_read')::boolean, false) = false
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(user_id)
        .bind(current_timestamp())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    async fn write_interaction(
        &self,
        id: &str,
        interaction: &InteractionRecord,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE notification SET interaction = $2::jsonb, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_string(interaction).unwrap_or_default())
        .bind(current_timestamp())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Idempotent read marking.
    pub async fn mark_read(&self, id: &str, user_id: &str) -> AppResult<NotificationResponse> {
        let mut notification = self.get_owned(id, user_id).await?;
        if !notification.interaction.is_read {
            notification.interaction.is_read = true;
            notification.interaction.read_at = Some(current_timestamp());
            self.write_interaction(id, &notification.interaction).await?;
        }
        Ok(NotificationResponse::from(notification))
    }

    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<u64> {
        let now = current_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE notification
            SET interaction = interaction
                    || jsonb_build_object('is_read', true, 'read_at', $2::bigint),
                updated_at = $2
            WHERE recipient_id = $1
              AND COALESCE((interaction->>'is_read')::boolean, false) = false
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Click / dismiss / action-taken tracking. Any interaction implies
    /// the notification was read.
    pub async fn record_interaction(
        &self,
        id: &str,
        user_id: &str,
        kind: &str,
        action: Option<&str>,
    ) -> AppResult<NotificationResponse> {
        let mut notification = self.get_owned(id, user_id).await?;
        let now = current_timestamp();
        match kind {
            "clicked" => notification.interaction.clicked_at = Some(now),
            "dismissed" => notification.interaction.dismissed_at = Some(now),
            "action" => {
                let action = action
                    .ok_or_else(|| AppError::BadRequest("Missing action".to_string()))?;
                notification.interaction.action_taken = Some(action.to_string());
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unknown interaction: {}",
                    other
                )))
            }
        }
        if !notification.interaction.is_read {
            notification.interaction.is_read = true;
            notification.interaction.read_at = Some(now);
        }
        self.write_interaction(id, &notification.interaction).await?;
        Ok(NotificationResponse::from(notification))
    }

    /// Generate digest summaries. For every user with digests enabled,
    /// un-digested low/medium unread notifications inside the window are
    /// rolled into one activity-summary notification.
    pub async fn run_digests(&self) -> AppResult<u64> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM notification_preferences WHERE (data->'digest'->>'enabled')::boolean = true")
                .fetch_all(self.db.pool())
                .await?;

        let mut generated = 0u64;
        for (user_id,) in rows {
            let preferences = PreferencesService::new(&self.db).get(&user_id).await?;
            let window_secs = preferences.digest.window_hours() * 3600;
            let since = current_timestamp() - window_secs;

            let members: Vec<(String,)> = sqlx::query_as(
                r#"
                SELECT id FROM notification
                WHERE recipient_id = $1 AND created_at > $2
                  AND digest_id IS NULL
                  AND notification_type <> 'unified_activity_summary'
                  AND COALESCE((interaction->>'is_read')::boolean, false) = false
                "#,
            )
            .bind(&user_id)
            .bind(since)
            .fetch_all(self.db.pool())
            .await?;

            if members.is_empty() {
                continue;
            }

            let digest_id = Uuid::new_v4().to_string();
            let member_ids: Vec<String> = members.into_iter().map(|(id,)| id).collect();
            sqlx::query("UPDATE notification SET digest_id = $2, updated_at = $3 WHERE id = ANY($1)")
                .bind(&member_ids)
                .bind(&digest_id)
                .bind(current_timestamp())
                .execute(self.db.pool())
                .await?;

            let input = digest_summary_input(&user_id, member_ids.len(), window_secs);
            if let Some(summary) = self.create(input).await? {
                sqlx::query("UPDATE notification SET digest_id = $2 WHERE id = $1")
                    .bind(&summary.id)
                    .bind(&digest_id)
                    .execute(self.db.pool())
                    .await?;
                generated += 1;
            }
        }
        if generated > 0 {
            tracing::info!("Generated {} digest summaries", generated);
        }
        Ok(generated)
    }

    pub async fn delete(&self, id: &str, user_id: &str) -> AppResult<()> {
        self.get_owned(id, user_id).await?;
        sqlx::query("DELETE FROM notification WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Per-recipient delivery and priority tallies.
    pub async fn delivery_stats(&self, user_id: &str) -> AppResult<serde_json::Value> {
        let by_priority: Vec<(String, i64)> = sqlx::query_as(
            "SELECT priority, COUNT(*) FROM notification WHERE recipient_id = $1 GROUP BY priority",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification WHERE recipient_id = $1")
                .bind(user_id)
                .fetch_one(self.db.pool())
                .await?;
        let failed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = $1 AND delivery->>'failed_at' IS NOT NULL",
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;
        let unread = self.unread_count(user_id).await?;

        Ok(json!({
            "total": total,
            "unread": unread,
            "delivery_failures": failed,
            "by_priority": by_priority
                .into_iter()
                .collect::<std::collections::HashMap<String, i64>>(),
        }))
    }

    /// Drop notifications past their expiry.
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notification WHERE expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(current_timestamp())
        .execute(self.db.pool())
        .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!("Purged {} expired notifications", purged);
        }
        Ok(purged)
    }

    /// Emit a read-count update to the user's live sessions.
    pub async fn push_unread_count(&self, user_id: &str) {
        if let Ok(count) = self.unread_count(user_id).await {
            self.registry.emit_to_user(
                user_id,
                "notification_count",
                &json!({ "unread": count }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_score_base() {
        // quiet inbox alone earns the fatigue bonus
        assert_eq!(relevance_score(false, false, 0), 60);
        assert_eq!(relevance_score(false, false, FATIGUE_THRESHOLD), 50);
    }

    #[test]
    fn test_relevance_score_stacking_clamps() {
        assert_eq!(relevance_score(true, true, 0), 100);
        assert_eq!(relevance_score(true, true, 20), 100);
        assert_eq!(relevance_score(true, false, 20), 70);
    }

    fn sender_fixture() -> User {
        User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: None,
            phone: None,
            role: "worker".to_string(),
            profile_image_url: Some("https://cdn.example/ada.png".to_string()),
            push_endpoints: None,
            push_endpoints_str: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_rich_content_carries_sender_identity() {
        let sender = sender_fixture();
        let content =
            compose_rich_content(None, NotificationType::NewMessage, Some(&sender)).unwrap();
        assert_eq!(content.avatar.as_deref(), Some("https://cdn.example/ada.png"));
        assert_eq!(content.metadata["sender_name"], json!("Ada"));
    }

    #[test]
    fn test_rich_content_keeps_caller_avatar() {
        let sender = sender_fixture();
        let provided = RichContent {
            image: None,
            avatar: Some("custom.png".to_string()),
            preview: None,
            action_buttons: Vec::new(),
            metadata: serde_json::Map::new(),
        };
        let content =
            compose_rich_content(Some(provided), NotificationType::System, Some(&sender))
                .unwrap();
        assert_eq!(content.avatar.as_deref(), Some("custom.png"));
    }

    #[test]
    fn test_rich_content_empty_without_sender_or_buttons() {
        assert!(compose_rich_content(None, NotificationType::System, None).is_none());
    }

    #[test]
    fn test_digest_summarizes_a_single_member() {
        let input = digest_summary_input("u1", 1, 3600);
        assert_eq!(input.notification_type, NotificationType::UnifiedActivitySummary);
        assert_eq!(input.body, "You have 1 notification waiting for you");
    }

    #[test]
    fn test_list_filters_include_type() {
        let filters = ListFilters {
            notification_type: Some(NotificationType::JobApproved),
            ..Default::default()
        };
        let (conditions, next_param) = filter_conditions(&filters);
        assert!(conditions.contains(&"notification_type = $3".to_string()));
        assert_eq!(next_param, 4);

        let all = ListFilters {
            unread_only: true,
            notification_type: Some(NotificationType::JobApproved),
            module: Some("jobs".to_string()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        let (conditions, next_param) = filter_conditions(&all);
        assert!(conditions.contains(&"notification_type = $3".to_string()));
        assert!(conditions.contains(&"context->>'module' = $4".to_string()));
        assert!(conditions.contains(&"priority = $5".to_string()));
        assert_eq!(next_param, 6);
    }

    #[test]
    fn test_priority_table_wins_over_score() {
        assert_eq!(
            derive_priority(NotificationType::PaymentReceived, 0, None),
            Priority::Urgent
        );
        assert_eq!(
            derive_priority(NotificationType::NewMessage, 0, None),
            Priority::High
        );
        assert_eq!(
            derive_priority(NotificationType::JobApplication, 100, None),
            Priority::Medium
        );
    }

    #[test]
    fn test_priority_from_score_for_untabled_types() {
        assert_eq!(
            derive_priority(NotificationType::System, 85, None),
            Priority::High
        );
        assert_eq!(
            derive_priority(NotificationType::System, 70, None),
            Priority::Medium
        );
        assert_eq!(
            derive_priority(NotificationType::System, 60, None),
            Priority::Low
        );
    }

    #[test]
    fn test_priority_user_override() {
        assert_eq!(
            derive_priority(NotificationType::NewMessage, 0, Some(Priority::Low)),
            Priority::Low
        );
    }

    #[test]
    fn test_quiet_hours_spanning_midnight() {
        // 2026-01-01 23:00 UTC
        let late = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap().timestamp();
        let morning = Utc.with_ymd_and_hms(2026, 1, 1, 7, 30, 0).unwrap().timestamp();
        let midday = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap().timestamp();
        assert!(in_quiet_hours("22:00", "08:00", late));
        assert!(in_quiet_hours("22:00", "08:00", morning));
        assert!(!in_quiet_hours("22:00", "08:00", midday));
    }

    #[test]
    fn test_quiet_hours_same_day_window() {
        let inside = Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap().timestamp();
        let outside = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap().timestamp();
        assert!(in_quiet_hours("12:00", "14:00", inside));
        assert!(!in_quiet_hours("12:00", "14:00", outside));
    }

    #[test]
    fn test_quiet_hours_garbage_input() {
        assert!(!in_quiet_hours("25:00", "08:00", 0));
        assert!(!in_quiet_hours("", "08:00", 0));
    }
}
