use super::{AuIdArgs, NO_SUCH_AU, Service, ServiceContext, not_found_as, parse_args, reply, unknown_operation};
use crate::credentials::{self, InboundCall};
use crate::errors::BridgeFault;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use http::Method;
use serde_json::{Map, Value};

/// Status of a single archival unit, as reported by the configuration
/// backend at `GET /austatuses/{auid}`.
pub struct AuService {
    context: ServiceContext,
}

impl AuService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// A 404 becomes a fault: there is no slot in the status object for
    /// "not found".
    pub async fn get_au_status(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<Map<String, Value>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;

        let request = OutboundRequest::builder(
            Method::GET,
            &self.context.configuration(),
            "/austatuses/{auid}",
        )
        .path_var("auid", au_id)
        .credentials(&creds)
        .build()?;

        self.context
            .client()
            .execute_json(request)
            .await
            .map_err(|e| not_found_as(e, NO_SUCH_AU))
    }
}

#[async_trait]
impl Service for AuService {
    fn name(&self) -> &'static str {
        "AuService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        match call.operation.as_str() {
            "getAuStatus" => {
                let args: AuIdArgs = parse_args(&call.operation, args)?;
                reply(self.get_au_status(call, args.au_id.as_deref()).await?)
            }
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{TestBackend, TestResponse, test_call};
    use http::StatusCode;
    use serde_json::json;

    const AU_ID: &str = "org|lockss|plugin|TestPlugin&base_url~http%3A%2F%2Fexample%2Ecom%2F";

    #[tokio::test]
    async fn test_status_round_trip() {
        let status = json!({
            "volume": "2024",
            "contentSize": 1024,
            "recentPollAgreement": 0.98,
            "substanceState": "Yes",
            "accessType": null,
        });
        let body = status.clone();
        let backend = TestBackend::spawn(move |_| TestResponse::json(StatusCode::OK, body.clone())).await;
        let service = AuService::new(backend.service_context());

        let result = service
            .invoke(&test_call("AuService", "getAuStatus"), json!({"auId": AU_ID}))
            .await
            .unwrap();
        assert_eq!(result, status);

        let path = &backend.requests()[0].path;
        assert_eq!(
            path,
            "/austatuses/org|lockss|plugin|TestPlugin&base_url~http%253A%252F%252Fexample%252Ecom%252F"
        );
    }

    #[tokio::test]
    async fn test_missing_au_id() {
        let backend = TestBackend::spawn(|_| TestResponse::empty(StatusCode::OK)).await;
        let service = AuService::new(backend.service_context());

        for args in [json!({}), json!({"auId": ""}), json!({"auId": "   "})] {
            let err = service
                .invoke(&test_call("AuService", "getAuStatus"), args)
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeFault::CallerArgument(_)));
        }
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_fault() {
        let backend = TestBackend::spawn(|_| TestResponse::empty(StatusCode::NOT_FOUND)).await;
        let service = AuService::new(backend.service_context());

        let err = service
            .get_au_status(&test_call("AuService", "getAuStatus"), Some("unknown"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.message(), NO_SUCH_AU);
    }

    #[tokio::test]
    async fn test_server_error_is_fault() {
        let backend = TestBackend::spawn(|_| {
            TestResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"message": "database unavailable"}),
            )
        })
        .await;
        let service = AuService::new(backend.service_context());

        let err = service
            .get_au_status(&test_call("AuService", "getAuStatus"), Some("au"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "database unavailable");
    }
}
