use serde::Serialize;

/// Envelope every route handler returns, success or failure.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_has_no_error() {
        let resp = ApiResponse::success(42);
        let json = serde_json::to_value(&resp).expect("serializable");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_envelope_has_no_data() {
        let resp: ApiResponse<()> = ApiResponse::error("bad request");
        let json = serde_json::to_value(&resp).expect("serializable");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "bad request");
        assert!(json.get("data").is_none());
    }
}
