//! Background sweep for expired ghost posts.
//!
//! Expiry is enforced at read time; this task only reclaims storage once a
//! post has been expired for longer than the configured grace period, so the
//! externally observable behavior does not depend on it running.

use rusqlite::params;
use std::time::Duration;

use crate::config::ReaperConfig;
use crate::error::ApiResult;
use crate::state::DbPool;

/// Delete ghost posts whose expiry passed more than `grace_hours` ago.
/// Returns the number of posts removed.
pub fn reap_expired(pool: &DbPool, grace_hours: u64) -> ApiResult<usize> {
    let mut conn = pool.get()?;
    let cutoff = format!("-{} hours", grace_hours);

    let ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM posts \
             WHERE is_ghost = 1 AND expires_at IS NOT NULL \
               AND expires_at <= datetime('now', ?1)",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    // Likes/comments/notifications cascade; media rows are generic and
    // cleaned up explicitly. One transaction so a failure cannot leave
    // orphaned media rows behind.
    let tx = conn.transaction()?;
    for id in &ids {
        tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM media WHERE entity_type = 'post' AND entity_id = ?1",
            params![id],
        )?;
    }
    tx.commit()?;

    Ok(ids.len())
}

/// Spawn the periodic sweep. No-op when disabled in config.
pub fn spawn(pool: DbPool, config: ReaperConfig) {
    if !config.enabled {
        tracing::info!("Ghost post reaper disabled");
        return;
    }

    let interval = Duration::from_secs(config.interval_minutes.max(1) * 60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match reap_expired(&pool, config.grace_hours) {
                Ok(0) => {}
                Ok(n) => tracing::info!("Reaped {} expired ghost posts", n),
                Err(e) => tracing::warn!("Ghost post sweep failed: {}", e),
            }
        }
    });
}
