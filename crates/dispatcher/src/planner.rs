use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use migration_core::{
    models::{MigrationContext, MigrationMessage, PageMessage, PageSpec, StatusCheck},
    traits::MigrationQueue,
    MigrationError, MigrationResult,
};

use crate::registry::{MigrationDefinition, PagingStrategy};

/// 偏移分页的页数
pub fn page_count(estimated_count: i64, page_size: i64) -> i64 {
    if estimated_count <= 0 || page_size <= 0 {
        return 0;
    }
    (estimated_count + page_size - 1) / page_size
}

/// 计算一次迁移的全部页
pub fn plan_pages(
    definition: &MigrationDefinition,
    filter: &Value,
    estimated_count: i64,
) -> MigrationResult<Vec<PageSpec>> {
    match definition.paging {
        PagingStrategy::ByPageNumber { page_size } => Ok((0..page_count(estimated_count, page_size))
            .map(|page_number| PageSpec::Offset {
                page_number,
                page_size,
            })
            .collect()),
        PagingStrategy::ByExplicitDivision => {
            let ids = explicit_ids(definition, filter)?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![PageSpec::Explicit { ids }])
        }
    }
}

/// 显式划分要求过滤条件本身列出 ID
pub fn explicit_ids(
    definition: &MigrationDefinition,
    filter: &Value,
) -> MigrationResult<Vec<String>> {
    definition.source.ids_from_filter(filter)?.ok_or_else(|| {
        MigrationError::validation_error(format!(
            "{} 使用显式划分，过滤条件必须列出ID",
            definition.migration_type
        ))
    })
}

/// 将迁移划分为页，再将页展开为单条记录消息
pub struct Planner {
    queue: Arc<dyn MigrationQueue>,
}

impl Planner {
    pub fn new(queue: Arc<dyn MigrationQueue>) -> Self {
        Self { queue }
    }

    /// 发送全部页消息，随后发送一条计数为 0 的状态检查消息
    pub async fn divide(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
        filter: &Value,
    ) -> MigrationResult<usize> {
        let pages = plan_pages(definition, filter, context.estimated_count)?;
        let page_total = pages.len();

        for page in pages {
            let message = MigrationMessage::page(context.clone(), filter.clone(), page);
            self.queue.send(context.migration_type, &message, Duration::ZERO).await?;
        }

        let check = MigrationMessage::status_check(context.clone(), StatusCheck::default());
        self.queue.send(context.migration_type, &check, Duration::ZERO).await?;

        info!(
            "迁移 {} ({}) 已划分为 {} 页，预计记录数 {}",
            context.run_id, context.migration_type, page_total, context.estimated_count
        );
        Ok(page_total)
    }

    /// 列出一页的源记录 ID，每个 ID 发送一条记录消息
    pub async fn fan_out(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
        page: &PageMessage,
    ) -> MigrationResult<usize> {
        let ids = match &page.page {
            PageSpec::Offset {
                page_number,
                page_size,
            } => {
                definition
                    .source
                    .list_ids(&page.filter, *page_number, *page_size)
                    .await?
                    .ids
            }
            PageSpec::Explicit { ids } => ids.clone(),
        };

        for source_id in &ids {
            let message = MigrationMessage::entity(context.clone(), source_id.as_str());
            self.queue.send(context.migration_type, &message, Duration::ZERO).await?;
        }

        debug!(
            "迁移 {} 的页 {:?} 展开为 {} 条记录消息",
            context.run_id,
            page.page,
            ids.len()
        );
        Ok(ids.len())
    }
}
