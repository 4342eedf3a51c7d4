pub mod current_time;
pub mod fetch_url;

use std::sync::Arc;

use crate::registry::ToolRegistry;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(current_time::CurrentTimeTool));
    registry.register(Arc::new(fetch_url::FetchUrlTool::new()));
    registry
}

#[cfg(test)]
pub(crate) fn test_ctx() -> loom_core::tools::ToolContext {
    loom_core::tools::ToolContext {
        graph_id: loom_core::ids::GraphId::from_raw("test"),
        task_name: "root".into(),
        abort_signal: tokio_util::sync::CancellationToken::new(),
    }
}
