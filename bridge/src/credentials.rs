//! Caller credentials and origin metadata carried from the inbound call to
//! every outbound request it causes.

use crate::errors::BridgeFault;
use http::HeaderValue;

/// Header carrying the original caller's address to the backends.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Credentials and origin attached to an inbound call by the protocol layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Authorization header value exactly as the caller sent it
    pub authorization: Option<Vec<u8>>,
    /// Address the call originated from
    pub origin_ip: Option<String>,
}

/// One inbound RPC call as handed over by the protocol layer.
#[derive(Clone, Debug)]
pub struct InboundCall {
    pub service: String,
    pub operation: String,
    context: Option<CallContext>,
}

impl InboundCall {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        context: CallContext,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            context: Some(context),
        }
    }

    /// A call whose protocol layer did not attach a context.
    pub fn without_context(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            context: None,
        }
    }

    pub fn context(&self) -> Option<&CallContext> {
        self.context.as_ref()
    }
}

/// Header values forwarded to the backends on behalf of the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardedCredentials {
    pub authorization: Option<HeaderValue>,
    pub forwarded_for: Option<HeaderValue>,
}

impl ForwardedCredentials {
    /// No credentials and no origin; used for calls to third-party sources.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Pulls the forwarded credential and origin IP out of the call.
///
/// The credential is copied byte for byte and never validated; authorization
/// is the backend's decision. A call without a context is refused so it can
/// never reach a backend looking like an intentionally anonymous one.
pub fn extract(call: &InboundCall) -> Result<ForwardedCredentials, BridgeFault> {
    let Some(context) = call.context() else {
        tracing::error!(
            service = %call.service,
            operation = %call.operation,
            "Inbound call has no context attached, refusing to forward"
        );
        return Err(BridgeFault::caller_argument(
            "Internal error: call context is unavailable",
        ));
    };

    let authorization = match &context.authorization {
        Some(raw) => Some(HeaderValue::from_bytes(raw).map_err(|_| {
            BridgeFault::caller_argument("Authorization credential is not a valid header value")
        })?),
        None => {
            tracing::debug!(
                service = %call.service,
                operation = %call.operation,
                "Forwarding anonymous call"
            );
            None
        }
    };

    // An unusable origin is dropped rather than failing the call.
    let forwarded_for = context
        .origin_ip
        .as_deref()
        .and_then(|ip| match HeaderValue::from_str(ip) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin_ip = %ip, "Ignoring origin address that is not a valid header value");
                None
            }
        });

    Ok(ForwardedCredentials {
        authorization,
        forwarded_for,
    })
}
