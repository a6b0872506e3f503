//! PostgreSQL 规则存储
//!
//! 条件树以校验后的 JSON 原样写入 JSONB 列，读取时再次经过校验还原为条件树。

use crate::error::{Result, RuleError};
use crate::models::{Condition, NewRule, Rule, RuleUpdate};
use crate::store::RuleStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// PostgreSQL 唯一约束冲突错误码
const UNIQUE_VIOLATION: &str = "23505";

const RULE_COLUMNS: &str =
    "id, name, condition, is_active, created_by, created_at, updated_at";

/// 数据库规则行
#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    condition: serde_json::Value,
    is_active: bool,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = RuleError;

    fn try_from(row: RuleRow) -> Result<Self> {
        let condition = Condition::try_from(&row.condition).map_err(|e| {
            warn!(rule_name = %row.name, error = %e, "存储的条件无法解析");
            e
        })?;

        Ok(Rule {
            id: row.id,
            name: row.name,
            condition,
            is_active: row.is_active,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL 规则存储
#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn rows_to_rules(rows: Vec<RuleRow>) -> Result<Vec<Rule>> {
        rows.into_iter().map(Rule::try_from).collect()
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn find_active_by_name(&self, name: &str) -> Result<Option<Rule>> {
        let sql = format!(
            "SELECT {} FROM rules WHERE name = $1 AND is_active = TRUE",
            RULE_COLUMNS
        );
        sqlx::query_as::<_, RuleRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(Rule::try_from)
            .transpose()
    }

    #[instrument(skip(self, names), fields(rule_count = names.len()))]
    async fn find_active_by_names(&self, names: &[String]) -> Result<Vec<Rule>> {
        let sql = format!(
            "SELECT {} FROM rules WHERE name = ANY($1) AND is_active = TRUE",
            RULE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;

        Self::rows_to_rules(rows)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Rule>> {
        let sql = format!("SELECT {} FROM rules WHERE name = $1", RULE_COLUMNS);
        sqlx::query_as::<_, RuleRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(Rule::try_from)
            .transpose()
    }

    #[instrument(skip(self, new_rule), fields(rule_name = %new_rule.name))]
    async fn create(&self, new_rule: NewRule) -> Result<Rule> {
        let rule = Rule::from_new(new_rule);

        let result = sqlx::query(
            r#"
            INSERT INTO rules (id, name, condition, is_active, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.condition.to_value())
        .bind(rule.is_active)
        .bind(&rule.created_by)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("规则已创建: {}", rule.name);
                Ok(rule)
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                warn!("重复创建规则: {}", rule.name);
                Err(RuleError::DuplicateRule(rule.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, update))]
    async fn update(&self, name: &str, update: RuleUpdate) -> Result<Rule> {
        let condition = update.condition.as_ref().map(Condition::to_value);

        let sql = format!(
            r#"
            UPDATE rules
            SET condition = COALESCE($2, condition),
                is_active = COALESCE($3, is_active),
                updated_at = NOW()
            WHERE name = $1
            RETURNING {}
            "#,
            RULE_COLUMNS
        );

        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(name)
            .bind(condition)
            .bind(update.is_active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                warn!("更新不存在的规则: {}", name);
                RuleError::rule_not_found([name])
            })?;

        info!(is_active = row.is_active, "规则已更新: {}", name);
        Rule::try_from(row)
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let sql = format!("SELECT {} FROM rules ORDER BY name", RULE_COLUMNS);
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Self::rows_to_rules(rows)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM rules WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!("删除不存在的规则: {}", name);
            return Err(RuleError::rule_not_found([name]));
        }

        info!("规则已删除: {}", name);
        Ok(())
    }
}
