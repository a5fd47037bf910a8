use serde_json::json;

use crate::registry::Handler;

/// The built-in `health` method every worker exposes regardless of what the
/// host registers, so a supervisor can probe liveness without depending on
/// application-specific handlers.
pub fn health_handler() -> impl Handler {
    |_req: serde_json::Value| async move {
        Ok(json!({
            "status": "healthy",
            "pid": std::process::id(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_healthy_with_the_current_pid() {
        let handler = health_handler();
        let response = handler.call(json!({}), None).await.unwrap();
        assert_eq!(response["status"], "healthy");
        assert_eq!(response["pid"], std::process::id());
    }
}
