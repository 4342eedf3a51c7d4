use async_trait::async_trait;
use chrono::{FixedOffset, Utc};

use loom_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Current date and time as RFC 3339, optionally at a fixed UTC offset"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Offset from UTC in minutes, e.g. 60 or -300"
                }
            }
        })
    }

    async fn execute(
        &self,
        kwargs: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let now = Utc::now();
        let Some(raw) = kwargs.get("utc_offset_minutes").filter(|v| !v.is_null()) else {
            return Ok(now.to_rfc3339().into());
        };
        let minutes = raw
            .as_i64()
            .ok_or_else(|| ToolError::InvalidArguments("utc_offset_minutes must be an integer".into()))?;
        let offset = i32::try_from(minutes)
            .ok()
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::InvalidArguments(format!("offset out of range: {minutes}")))?;
        Ok(now.with_timezone(&offset).to_rfc3339().into())
    }
}
