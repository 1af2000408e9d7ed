use super::{ChannelError, ChannelResult, ColumnInfo, CommandChannel, QueryResult, SessionContext};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    OAuth,
    KeyPairJwt,
    ProgrammaticAccessToken,
}

impl TokenType {
    fn header_value(&self) -> &'static str {
        match self {
            TokenType::OAuth => "OAUTH",
            TokenType::KeyPairJwt => "KEYPAIR_JWT",
            TokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

impl std::str::FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OAUTH" => Ok(TokenType::OAuth),
            "KEYPAIR_JWT" | "JWT" => Ok(TokenType::KeyPairJwt),
            "PROGRAMMATIC_ACCESS_TOKEN" | "PAT" => Ok(TokenType::ProgrammaticAccessToken),
            other => Err(format!("unknown token type '{other}'")),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_status_url: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type", default)]
    column_type: String,
}

impl StatementResponse {
    fn into_result(self) -> QueryResult {
        let columns = self
            .result_set_meta_data
            .map(|m| {
                m.row_type
                    .into_iter()
                    .map(|r| ColumnInfo {
                        name: r.name,
                        column_type: r.column_type,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let rows = self
            .data
            .into_iter()
            .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
            .collect();
        QueryResult { columns, rows }
    }

    fn error_message(&self, status: StatusCode) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.clone(),
            _ => format!("HTTP {status}"),
        }
    }
}

/// Snowflake SQL API v2 channel.
///
/// The API is stateless, so the session context travels with every request.
pub struct SqlApiChannel {
    client: Client,
    base_url: String,
    token: String,
    token_type: TokenType,
    timeout: Duration,
}

impl SqlApiChannel {
    pub fn new(
        account: &str,
        token: impl Into<String>,
        token_type: TokenType,
        timeout: Duration,
    ) -> ChannelResult<Self> {
        let base_url = if account.starts_with("http://") || account.starts_with("https://") {
            account.trim_end_matches('/').to_string()
        } else {
            format!("https://{}.snowflakecomputing.com", account.to_ascii_lowercase())
        };
        let client = Client::builder()
            .timeout(timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: token.into(),
            token_type,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.token_type.header_value(),
            )
            .header("Accept", "application/json")
            .header("User-Agent", concat!("sfdrift/", env!("CARGO_PKG_VERSION")))
    }

    async fn read(
        &self,
        response: reqwest::Response,
    ) -> ChannelResult<(StatusCode, StatementResponse)> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let parsed = if text.trim().is_empty() {
            StatementResponse {
                code: None,
                message: None,
                statement_status_url: None,
                result_set_meta_data: None,
                data: Vec::new(),
            }
        } else {
            serde_json::from_str(&text).map_err(|e| {
                ChannelError::Connection(format!("unreadable SQL API response ({status}): {e}"))
            })?
        };
        Ok((status, parsed))
    }

    fn classify(status: StatusCode, body: &StatementResponse) -> ChannelError {
        let message = body.error_message(status);
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status.is_server_error()
        {
            ChannelError::Connection(message)
        } else {
            ChannelError::Statement(message)
        }
    }

    async fn poll(&self, status_url: &str, started: Instant) -> ChannelResult<QueryResult> {
        let url = format!("{}{}", self.base_url, status_url);
        loop {
            if started.elapsed() > self.timeout {
                return Err(ChannelError::Statement(format!(
                    "statement did not finish within {}s",
                    self.timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .authorized(self.client.get(&url))
                .send()
                .await
                .map_err(|e| ChannelError::Connection(e.to_string()))?;
            let (status, body) = self.read(response).await?;
            match status {
                StatusCode::OK => return Ok(body.into_result()),
                StatusCode::ACCEPTED => debug!(url = %url, "statement still running"),
                _ => return Err(Self::classify(status, &body)),
            }
        }
    }
}

#[async_trait]
impl CommandChannel for SqlApiChannel {
    async fn execute(&self, context: &SessionContext, sql: &str) -> ChannelResult<QueryResult> {
        let request = StatementRequest {
            statement: sql,
            timeout: self.timeout.as_secs(),
            database: context.database.as_deref(),
            schema: context.schema.as_deref(),
            warehouse: context.warehouse.as_deref(),
            role: context.role.as_deref(),
        };

        let started = Instant::now();
        let response = self
            .authorized(self.client.post(format!("{}{}", self.base_url, STATEMENTS_PATH)))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let (status, body) = self.read(response).await?;
        match status {
            StatusCode::OK => Ok(body.into_result()),
            StatusCode::ACCEPTED => match body.statement_status_url.clone() {
                Some(url) => self.poll(&url, started).await,
                None => Ok(body.into_result()),
            },
            _ => {
                let err = Self::classify(status, &body);
                if matches!(err, ChannelError::Connection(_)) {
                    warn!(status = %status, "SQL API rejected the connection");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_type_parse() {
        assert_eq!("oauth".parse::<TokenType>().unwrap(), TokenType::OAuth);
        assert_eq!("JWT".parse::<TokenType>().unwrap(), TokenType::KeyPairJwt);
        assert_eq!(
            "pat".parse::<TokenType>().unwrap(),
            TokenType::ProgrammaticAccessToken
        );
        assert!("password".parse::<TokenType>().is_err());
    }

    #[test]
    fn test_base_url_from_account() {
        let channel =
            SqlApiChannel::new("XY12345.us-east-1", "t", TokenType::OAuth, Duration::from_secs(30))
                .unwrap();
        assert_eq!(
            channel.base_url(),
            "https://xy12345.us-east-1.snowflakecomputing.com"
        );

        let local = SqlApiChannel::new(
            "http://localhost:8080/",
            "t",
            TokenType::OAuth,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(local.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_response_into_result_maps_nulls() {
        let body: StatementResponse = serde_json::from_str(
            r#"{
                "code": "090001",
                "message": "Statement executed successfully.",
                "resultSetMetaData": {"rowType": [{"name": "name", "type": "text"}, {"name": "comment", "type": "text"}]},
                "data": [["ADDRESS_MASK", null]]
            }"#,
        )
        .unwrap();
        let result = body.into_result();
        assert_eq!(result.column_index("comment"), Some(1));
        assert_eq!(result.rows, vec![vec!["ADDRESS_MASK".to_string(), String::new()]]);
    }

    #[test]
    fn test_classify_statement_vs_connection() {
        let body: StatementResponse =
            serde_json::from_str(r#"{"code": "002003", "message": "Object does not exist"}"#)
                .unwrap();
        assert!(matches!(
            SqlApiChannel::classify(StatusCode::UNPROCESSABLE_ENTITY, &body),
            ChannelError::Statement(m) if m.starts_with("002003")
        ));
        assert!(matches!(
            SqlApiChannel::classify(StatusCode::UNAUTHORIZED, &body),
            ChannelError::Connection(_)
        ));
        assert!(matches!(
            SqlApiChannel::classify(StatusCode::SERVICE_UNAVAILABLE, &body),
            ChannelError::Connection(_)
        ));
    }
}
