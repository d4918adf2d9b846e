//! Tenant-scoped context aggregation for AI content generation. Pulls the
//! game profile, document chunks, competitor signals, strategy cards,
//! trends, and viral hooks, each capped to keep prompts affordable. Viral
//! hooks get a cross-tenant "global niche" pass first: tenants sharing a
//! primary genre pool their outliers.

use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use playpulse_common::{Platform, Result};

// Caps per context field, sized against prompt budgets.
const DOC_CHUNKS_CAP: i64 = 3;
const COMPETITOR_HOOKS_CAP: i64 = 3;
const COMPETITOR_HASHTAGS_CAP: i64 = 5;
const STRATEGY_CARDS_CAP: i64 = 2;
const TRENDING_TOPICS_CAP: i64 = 3;
const VIRAL_HOOKS_CAP: i64 = 5;

const HOOK_MAX_CHARS: usize = 150;
const VIRAL_HOOK_MAX_CHARS: usize = 280;

const DOW_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[derive(Debug, Clone, Serialize)]
pub struct StrategyCardSummary {
    pub tactic: String,
    pub steps: serde_json::Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViralHook {
    pub hook: String,
    pub username: String,
    pub multiplier: i32,
    pub engagement: i64,
    pub support_count: i32,
}

/// Everything the content generator gets to see for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct ContentContext {
    pub game_title: String,
    pub genre: String,
    pub tone: String,
    pub audience: String,
    pub key_mechanics: String,

    pub doc_chunks: Vec<String>,

    pub top_hooks: Vec<String>,
    pub top_hashtags: Vec<String>,
    pub competitor_handles: Vec<String>,
    pub best_posting_day: String,
    pub avg_engagement: f64,

    pub strategy_cards: Vec<StrategyCardSummary>,
    pub trending_topics: Vec<String>,

    pub viral_hooks: Vec<ViralHook>,

    pub has_data: bool,
    pub confidence: String,
}

impl Default for ContentContext {
    fn default() -> Self {
        Self {
            game_title: String::new(),
            genre: String::new(),
            tone: String::new(),
            audience: String::new(),
            key_mechanics: String::new(),
            doc_chunks: Vec::new(),
            top_hooks: Vec::new(),
            top_hashtags: Vec::new(),
            competitor_handles: Vec::new(),
            best_posting_day: "Wednesday".to_string(),
            avg_engagement: 0.0,
            strategy_cards: Vec::new(),
            trending_topics: Vec::new(),
            viral_hooks: Vec::new(),
            has_data: false,
            confidence: "low".to_string(),
        }
    }
}

pub struct ContextAggregator {
    pool: PgPool,
}

impl ContextAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch all available context for one tenant and platform.
    pub async fn aggregate(
        &self,
        owner_id: i64,
        group_id: i64,
        platform: Platform,
    ) -> Result<ContentContext> {
        let mut ctx = ContentContext::default();

        self.fetch_game_context(owner_id, group_id, &mut ctx).await?;
        self.fetch_doc_chunks(group_id, platform, &mut ctx).await?;
        self.fetch_competitor_data(owner_id, group_id, &mut ctx).await?;
        self.fetch_strategy_cards(owner_id, group_id, &mut ctx).await?;
        self.fetch_trending_topics(owner_id, group_id, &mut ctx).await?;

        // Viral hooks degrade gracefully: a missing viral_outliers relation
        // must not fail the whole aggregation.
        if let Err(e) = self
            .fetch_viral_hooks(owner_id, group_id, platform, &mut ctx)
            .await
        {
            warn!(error = %e, "Could not fetch viral hooks");
        }

        ctx.has_data = !ctx.game_title.is_empty();
        ctx.confidence = confidence_label(&ctx).to_string();

        info!(
            game = %ctx.game_title,
            docs = ctx.doc_chunks.len(),
            hooks = ctx.top_hooks.len(),
            viral = ctx.viral_hooks.len(),
            cards = ctx.strategy_cards.len(),
            confidence = %ctx.confidence,
            "Context aggregated"
        );

        Ok(ctx)
    }

    async fn fetch_game_context(
        &self,
        owner_id: i64,
        group_id: i64,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        let row: Option<(
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            r#"
            SELECT game_title, primary_genre, tone, intended_audience, key_mechanics
            FROM game_contexts
            WHERE user_id = $1 AND group_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((title, genre, tone, audience, mechanics)) => {
                ctx.game_title = title.unwrap_or_default();
                ctx.genre = genre.unwrap_or_default();
                ctx.tone = tone.unwrap_or_default();
                ctx.audience = audience.unwrap_or_default();
                ctx.key_mechanics = mechanics.unwrap_or_default();
            }
            None => warn!(owner_id, group_id, "No game context for tenant"),
        }
        Ok(())
    }

    async fn fetch_doc_chunks(
        &self,
        group_id: i64,
        platform: Platform,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        let search_terms = format!("{platform} marketing social media content");

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.content
            FROM workshop_chunks c
            JOIN workshop_documents d ON c.document_id = d.id
            WHERE d.group_id = $1 AND d.status = 'ready'
            ORDER BY ts_rank(c.tsv, plainto_tsquery('english', $2)) DESC
            LIMIT $3
            "#,
        )
        .bind(group_id)
        .bind(&search_terms)
        .bind(DOC_CHUNKS_CAP)
        .fetch_all(&self.pool)
        .await?;

        ctx.doc_chunks = rows
            .into_iter()
            .map(|(content,)| content)
            .filter(|c| !c.is_empty())
            .collect();
        Ok(())
    }

    async fn fetch_competitor_data(
        &self,
        owner_id: i64,
        group_id: i64,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        // Top hooks: the opening line of the best-performing posts.
        let hook_rows: Vec<(Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT cp.content, cpf.handle, (cp.engagement->>'likes')::bigint AS likes
            FROM competitor_posts cp
            JOIN competitor_profiles cpf ON cp.profile_id = cpf.id
            JOIN user_competitors uc ON cpf.competitor_id = uc.competitor_id
            WHERE uc.user_id = $1
              AND uc.group_id = $2
              AND cp.posted_at > NOW() - INTERVAL '14 days'
              AND cp.content IS NOT NULL
            ORDER BY likes DESC NULLS LAST
            LIMIT $3
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .bind(COMPETITOR_HOOKS_CAP)
        .fetch_all(&self.pool)
        .await?;

        let mut total_likes = 0i64;
        let sample = hook_rows.len();
        for (content, handle, likes) in hook_rows {
            if let Some(content) = content {
                let hook = first_line_hook(&content);
                if !hook.is_empty() {
                    ctx.top_hooks.push(hook);
                }
            }
            if let Some(handle) = handle {
                let handle = handle.to_lowercase();
                if !ctx.competitor_handles.contains(&handle) {
                    ctx.competitor_handles.push(handle);
                }
            }
            total_likes += likes.unwrap_or(0);
        }
        ctx.avg_engagement = total_likes as f64 / sample.max(1) as f64;

        // Hashtag frequency over the same window.
        let hashtag_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT UNNEST(cp.hashtags) AS tag
            FROM competitor_posts cp
            JOIN competitor_profiles cpf ON cp.profile_id = cpf.id
            JOIN user_competitors uc ON cpf.competitor_id = uc.competitor_id
            WHERE uc.user_id = $1
              AND uc.group_id = $2
              AND cp.posted_at > NOW() - INTERVAL '14 days'
            GROUP BY tag
            ORDER BY COUNT(*) DESC
            LIMIT $3
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .bind(COMPETITOR_HASHTAGS_CAP)
        .fetch_all(&self.pool)
        .await?;
        ctx.top_hashtags = hashtag_rows.into_iter().map(|(tag,)| tag).collect();

        // Best posting day over a wider window.
        let dow_row: Option<(Option<i32>,)> = sqlx::query_as(
            r#"
            SELECT EXTRACT(DOW FROM cp.posted_at)::int AS dow
            FROM competitor_posts cp
            JOIN competitor_profiles cpf ON cp.profile_id = cpf.id
            JOIN user_competitors uc ON cpf.competitor_id = uc.competitor_id
            WHERE uc.user_id = $1
              AND uc.group_id = $2
              AND cp.posted_at > NOW() - INTERVAL '28 days'
            GROUP BY dow
            ORDER BY AVG((cp.engagement->>'likes')::bigint) DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((Some(dow),)) = dow_row {
            if let Some(name) = DOW_NAMES.get(dow as usize) {
                ctx.best_posting_day = (*name).to_string();
            }
        }

        debug!(
            hooks = ctx.top_hooks.len(),
            hashtags = ctx.top_hashtags.len(),
            best_day = %ctx.best_posting_day,
            "Competitor data fetched"
        );
        Ok(())
    }

    async fn fetch_strategy_cards(
        &self,
        owner_id: i64,
        group_id: i64,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        let rows: Vec<(String, serde_json::Value, f64)> = sqlx::query_as(
            r#"
            SELECT sc.tactic, sc.steps, sc.confidence
            FROM strategy_cards sc
            JOIN reddit_items ri ON sc.item_id = ri.id
            JOIN reddit_sources rs ON ri.source_id = rs.id
            WHERE rs.user_id = $1
              AND rs.group_id = $2
              AND sc.confidence >= 0.7
            ORDER BY sc.confidence DESC, sc.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .bind(STRATEGY_CARDS_CAP)
        .fetch_all(&self.pool)
        .await?;

        ctx.strategy_cards = rows
            .into_iter()
            .filter(|(tactic, _, _)| !tactic.is_empty())
            .map(|(tactic, steps, confidence)| StrategyCardSummary {
                tactic,
                steps,
                confidence,
            })
            .collect();
        Ok(())
    }

    async fn fetch_trending_topics(
        &self,
        owner_id: i64,
        group_id: i64,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT ri.title
            FROM reddit_items ri
            JOIN reddit_sources rs ON ri.source_id = rs.id
            WHERE rs.user_id = $1
              AND rs.group_id = $2
              AND ri.created_utc > NOW() - INTERVAL '7 days'
            ORDER BY ri.score DESC
            LIMIT $3
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .bind(TRENDING_TOPICS_CAP)
        .fetch_all(&self.pool)
        .await?;

        ctx.trending_topics = rows
            .into_iter()
            .map(|(title,)| title)
            .filter(|t| !t.is_empty())
            .collect();
        Ok(())
    }

    /// Viral hooks with the global-niche pass first.
    ///
    /// When the tenant's game context names a genre, outliers found by ANY
    /// tenant in the same genre are eligible; only when that search comes
    /// back empty does the strictly tenant-scoped query run.
    async fn fetch_viral_hooks(
        &self,
        owner_id: i64,
        group_id: i64,
        platform: Platform,
        ctx: &mut ContentContext,
    ) -> Result<()> {
        if !ctx.genre.is_empty() {
            info!(genre = %ctx.genre, "Attempting global niche search");

            let rows: Vec<(String, Option<String>, i32, i64, i32)> = sqlx::query_as(
                r#"
                WITH niche_groups AS (
                    SELECT group_id
                    FROM game_contexts
                    WHERE primary_genre ILIKE '%' || $1 || '%'
                ),
                niche_competitors AS (
                    SELECT DISTINCT uc.competitor_id
                    FROM user_competitors uc
                    JOIN niche_groups ng ON uc.group_id = ng.group_id
                )
                SELECT vo.hook, vo.username, vo.multiplier, vo.actual_engagement, vo.support_count
                FROM viral_outliers vo
                JOIN competitor_profiles cp
                  ON vo.username = cp.handle AND vo.platform = cp.platform
                JOIN niche_competitors nc ON cp.competitor_id = nc.competitor_id
                WHERE vo.platform = $2
                  AND vo.expires_at > NOW()
                  AND vo.multiplier >= 10
                ORDER BY vo.multiplier DESC, vo.actual_engagement DESC
                LIMIT $3
                "#,
            )
            .bind(&ctx.genre)
            .bind(platform.as_str())
            .bind(VIRAL_HOOKS_CAP)
            .fetch_all(&self.pool)
            .await?;

            if !rows.is_empty() {
                info!(count = rows.len(), "Global niche viral hooks found");
                ctx.viral_hooks = populate_viral_hooks(rows);
                return Ok(());
            }
            info!("No global niche data, falling back to tenant-local hooks");
        }

        let rows: Vec<(String, Option<String>, i32, i64, i32)> = sqlx::query_as(
            r#"
            SELECT vo.hook, vo.username, vo.multiplier, vo.actual_engagement, vo.support_count
            FROM viral_outliers vo
            JOIN competitor_profiles cp
              ON vo.username = cp.handle AND vo.platform = cp.platform
            JOIN user_competitors uc ON cp.competitor_id = uc.competitor_id
            WHERE uc.user_id = $1
              AND uc.group_id = $2
              AND vo.platform = $3
              AND vo.expires_at > NOW()
              AND vo.multiplier >= 10
            ORDER BY vo.multiplier DESC, vo.actual_engagement DESC
            LIMIT $4
            "#,
        )
        .bind(owner_id)
        .bind(group_id)
        .bind(platform.as_str())
        .bind(VIRAL_HOOKS_CAP)
        .fetch_all(&self.pool)
        .await?;

        ctx.viral_hooks = populate_viral_hooks(rows);
        Ok(())
    }
}

fn populate_viral_hooks(rows: Vec<(String, Option<String>, i32, i64, i32)>) -> Vec<ViralHook> {
    rows.into_iter()
        .filter(|(hook, ..)| !hook.is_empty())
        .map(|(hook, username, multiplier, engagement, support_count)| ViralHook {
            hook: truncate_chars(&hook, VIRAL_HOOK_MAX_CHARS),
            username: username.unwrap_or_else(|| "unknown".to_string()),
            multiplier,
            engagement,
            support_count,
        })
        .collect()
}

/// The first line of a post, bounded, as a reusable hook.
pub fn first_line_hook(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    truncate_chars(first_line, HOOK_MAX_CHARS)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Confidence labeling: weighted presence points over the context fields.
pub fn confidence_label(ctx: &ContentContext) -> &'static str {
    let mut score = 0u32;

    if !ctx.game_title.is_empty() {
        score += 2;
    }
    if !ctx.doc_chunks.is_empty() {
        score += 1;
    }
    if ctx.top_hooks.len() >= 2 {
        score += 2;
    }
    if !ctx.strategy_cards.is_empty() {
        score += 1;
    }
    if !ctx.viral_hooks.is_empty() {
        score += 2;
    }

    if score >= 5 {
        "high"
    } else if score >= 3 {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(multiplier: i32) -> ViralHook {
        ViralHook {
            hook: "watch this".to_string(),
            username: "studio".to_string(),
            multiplier,
            engagement: 1000,
            support_count: 2,
        }
    }

    #[test]
    fn defaults_are_wednesday_and_low() {
        let ctx = ContentContext::default();
        assert_eq!(ctx.best_posting_day, "Wednesday");
        assert_eq!(ctx.confidence, "low");
        assert!(!ctx.has_data);
    }

    #[test]
    fn first_line_hook_takes_opening_line() {
        assert_eq!(
            first_line_hook("Big news today!\nMore details below."),
            "Big news today!"
        );
        let long = "a".repeat(300);
        assert_eq!(first_line_hook(&long).chars().count(), 150);
    }

    #[test]
    fn confidence_scores_accumulate() {
        let mut ctx = ContentContext::default();
        assert_eq!(confidence_label(&ctx), "low");

        // Game title alone: 2 points, still low.
        ctx.game_title = "Voidfarer".to_string();
        assert_eq!(confidence_label(&ctx), "low");

        // Plus doc chunks: 3 points, medium.
        ctx.doc_chunks = vec!["chunk".to_string()];
        assert_eq!(confidence_label(&ctx), "medium");

        // Plus two hooks: 5 points, high.
        ctx.top_hooks = vec!["h1".to_string(), "h2".to_string()];
        assert_eq!(confidence_label(&ctx), "high");
    }

    #[test]
    fn one_hook_earns_no_points() {
        let mut ctx = ContentContext::default();
        ctx.top_hooks = vec!["only one".to_string()];
        ctx.game_title = "Voidfarer".to_string();
        assert_eq!(confidence_label(&ctx), "low");
    }

    #[test]
    fn viral_hooks_are_worth_two_points() {
        let mut ctx = ContentContext::default();
        ctx.viral_hooks = vec![hook(50)];
        ctx.strategy_cards = vec![StrategyCardSummary {
            tactic: "t".to_string(),
            steps: serde_json::Value::Null,
            confidence: 0.9,
        }];
        // 2 + 1 = 3 → medium.
        assert_eq!(confidence_label(&ctx), "medium");
    }

    #[test]
    fn viral_hook_rows_truncate_and_default_username() {
        let rows = vec![(
            "x".repeat(400),
            None,
            50,
            9000,
            2,
        )];
        let hooks = populate_viral_hooks(rows);
        assert_eq!(hooks[0].hook.chars().count(), 280);
        assert_eq!(hooks[0].username, "unknown");
    }

    #[test]
    fn empty_hooks_are_dropped() {
        let rows = vec![(String::new(), Some("u".to_string()), 10, 100, 1)];
        assert!(populate_viral_hooks(rows).is_empty());
    }
}
